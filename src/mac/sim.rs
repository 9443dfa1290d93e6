//! Simulation helpers for MAC tests

use crate::{Device, Ts};
use crate::device::mock::MockTransceiver;
use crate::timer::mock::MockTimer;

use super::{Config, ContikiMac};

pub type SimMac = ContikiMac<MockTransceiver, MockTimer>;

// Data frame, Ack request, PAN ID compression, short addressing
pub const UNICAST: [u8; 12] = [0x61, 0x88, 0x07, 0x34, 0x12, 0x02, 0x00, 0x01, 0x00, 0xaa, 0xbb, 0xcc];

// Data frame, PAN ID compression, broadcast destination
pub const BROADCAST: [u8; 11] = [0x41, 0x88, 0x08, 0x34, 0x12, 0xff, 0xff, 0x01, 0x00, 0xaa, 0xbb];

// Unicast data frame with the frame pending bit set
pub const PENDING: [u8; 12] = [0x71, 0x88, 0x09, 0x34, 0x12, 0x02, 0x00, 0x01, 0x00, 0xaa, 0xbb, 0xcc];

pub fn setup(config: Config) -> (MockTimer, MockTransceiver, SimMac) {
    setup_with(config, |_dev| ())
}

/// Create and initialise a MAC, `f` configures the device before init
pub fn setup_with<F: FnOnce(&MockTransceiver)>(config: Config, f: F) -> (MockTimer, MockTransceiver, SimMac) {
    let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

    let timer = MockTimer::new();
    let dev = MockTransceiver::new(timer.clone());
    f(&dev);

    let mut mac = ContikiMac::new(dev.clone(), timer.clone(), config);
    mac.init().unwrap();

    (timer, dev, mac)
}

/// Advance simulated time event by event until `end`
pub fn run_until(mac: &mut SimMac, dev: &MockTransceiver, timer: &MockTimer, end: Ts) {
    let mut timer = timer.clone();

    for _ in 0..1_000_000 {
        let next = [mac.next_deadline(), dev.next_event_at()].iter().flatten().min().copied();

        match next {
            Some(t) if t <= end => {
                if t > timer.val() {
                    timer.set_us(t);
                }
                mac.tick();
            }
            _ => {
                if end > timer.val() {
                    timer.set_us(end);
                }
                mac.tick();
                return;
            }
        }
    }

    panic!("Simulation did not settle before {} us", end);
}
