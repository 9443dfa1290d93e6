//! Simulated transceiver for tests and the strobe simulation
//!
//! Clones share state, so a test keeps one handle to script the channel and
//! inspect the transmit / mode history while the MAC owns another. Time comes
//! from the shared [`MockTimer`].
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use log::trace;

use crate::{Ts, packet, timer::{Timer, mock::MockTimer}};

use super::{DeviceEvents, RadioMode, Transceiver};

/// Error returned by the simulated transceiver when failure injection is enabled
#[derive(Debug, Clone, PartialEq)]
pub struct SimError;

/// Acknowledgement behaviour of the simulated peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AckPolicy {
    /// Every unicast transmission is acknowledged
    Always,
    /// No unicast transmission is acknowledged
    Never,
    /// Acknowledge from the nth transmission (1-based) onwards
    OnAttempt(usize),
}

#[derive(Debug)]
struct Inner {
    timer: MockTimer,

    mode: RadioMode,
    transitions: Vec<(Ts, RadioMode)>,

    cca_script: VecDeque<bool>,
    cca_default: bool,
    cca_times: Vec<Ts>,

    ack: AckPolicy,
    airtime_us: u32,
    frame: Vec<u8>,
    tx_times: Vec<Ts>,
    tx_done: Option<(Ts, DeviceEvents)>,

    pending: DeviceEvents,
    irqs: DeviceEvents,
    rx: Option<Vec<u8>>,

    channel: u16,
    channel_page: u16,
    csma: bool,
    retransmissions: u8,
    preloading: bool,

    fail: bool,
}

/// Shared handle to a simulated transceiver
#[derive(Debug, Clone)]
pub struct MockTransceiver(Arc<Mutex<Inner>>);

impl MockTransceiver {
    pub fn new(timer: MockTimer) -> Self {
        let inner = Inner {
            timer,
            mode: RadioMode::Sleep,
            transitions: Vec::new(),
            cca_script: VecDeque::new(),
            cca_default: true,
            cca_times: Vec::new(),
            ack: AckPolicy::Always,
            airtime_us: 1000,
            frame: Vec::new(),
            tx_times: Vec::new(),
            tx_done: None,
            pending: DeviceEvents::empty(),
            irqs: DeviceEvents::all(),
            rx: None,
            channel: 26,
            channel_page: 0,
            // Hardware defaults, expected to be overridden by the MAC
            csma: true,
            retransmissions: 3,
            preloading: false,
            fail: false,
        };

        Self(Arc::new(Mutex::new(inner)))
    }

    fn inner(&self) -> MutexGuard<Inner> {
        self.0.lock().unwrap()
    }

    /// Queue CCA results (`true` is clear), consumed one per check
    pub fn script_cca(&self, clear: &[bool]) {
        self.inner().cca_script.extend(clear.iter().copied());
    }

    /// CCA result once the script is exhausted
    pub fn set_cca_default(&self, clear: bool) {
        self.inner().cca_default = clear;
    }

    pub fn set_ack(&self, ack: AckPolicy) {
        self.inner().ack = ack;
    }

    /// Time from transmit trigger to completion
    pub fn set_airtime(&self, us: u32) {
        self.inner().airtime_us = us;
    }

    pub fn airtime(&self) -> u32 {
        self.inner().airtime_us
    }

    pub fn configure_channel(&self, channel: u16, page: u16) {
        let mut i = self.inner();
        i.channel = channel;
        i.channel_page = page;
    }

    /// Fail every subsequent device command
    pub fn set_fail(&self, fail: bool) {
        self.inner().fail = fail;
    }

    /// Simulate a detected start of frame
    pub fn start_rx(&self) {
        self.inner().pending |= DeviceEvents::RX_STARTED;
    }

    /// Simulate a completed reception
    pub fn complete_rx(&self, frame: &[u8]) {
        let mut i = self.inner();
        i.rx = Some(frame.to_vec());
        i.pending |= DeviceEvents::RX_COMPLETE;
    }

    pub fn mode(&self) -> RadioMode {
        self.inner().mode
    }

    /// Modes requested by the MAC, in order
    pub fn modes(&self) -> Vec<RadioMode> {
        self.inner().transitions.iter().map(|(_t, m)| *m).collect()
    }

    /// Timestamped mode requests
    pub fn transitions(&self) -> Vec<(Ts, RadioMode)> {
        self.inner().transitions.clone()
    }

    pub fn clear_history(&self) {
        let mut i = self.inner();
        i.transitions.clear();
        i.cca_times.clear();
        i.tx_times.clear();
    }

    pub fn cca_count(&self) -> usize {
        self.inner().cca_times.len()
    }

    pub fn cca_times(&self) -> Vec<Ts> {
        self.inner().cca_times.clone()
    }

    pub fn tx_count(&self) -> usize {
        self.inner().tx_times.len()
    }

    /// Transmit trigger times
    pub fn tx_times(&self) -> Vec<Ts> {
        self.inner().tx_times.clone()
    }

    pub fn preloaded(&self) -> Vec<u8> {
        self.inner().frame.clone()
    }

    pub fn csma(&self) -> bool {
        self.inner().csma
    }

    pub fn retransmissions(&self) -> u8 {
        self.inner().retransmissions
    }

    pub fn preloading(&self) -> bool {
        self.inner().preloading
    }

    pub fn irqs(&self) -> DeviceEvents {
        self.inner().irqs
    }

    /// Time of the next device initiated event (transmission completion)
    pub fn next_event_at(&self) -> Option<Ts> {
        self.inner().tx_done.map(|(t, _)| t)
    }
}

impl Inner {
    fn check(&self) -> Result<(), SimError> {
        match self.fail {
            true => Err(SimError),
            false => Ok(()),
        }
    }

    fn tx_outcome(&self) -> DeviceEvents {
        if packet::is_broadcast(&self.frame) || !packet::ack_request(&self.frame) {
            return DeviceEvents::TX_COMPLETE;
        }

        let attempt = self.tx_times.len();
        let acked = match self.ack {
            AckPolicy::Always => true,
            AckPolicy::Never => false,
            AckPolicy::OnAttempt(n) => attempt >= n,
        };

        match acked {
            true => DeviceEvents::TX_COMPLETE,
            false => DeviceEvents::TX_NOACK,
        }
    }
}

impl Transceiver for MockTransceiver {
    type Error = SimError;

    fn init(&mut self) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.mode = RadioMode::Standby;
        Ok(())
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;

        let now = i.timer.ticks_us();
        trace!("Sim mode {:?} at {} us", mode, now);
        i.transitions.push((now, mode));

        match mode {
            RadioMode::Transmit => {
                i.tx_times.push(now);
                let outcome = i.tx_outcome();
                i.tx_done = Some((now + i.airtime_us as Ts, outcome));
                i.mode = RadioMode::Transmit;
            }
            RadioMode::Reset => {
                i.tx_done = None;
                i.mode = RadioMode::Standby;
            }
            m => {
                i.tx_done = None;
                i.mode = m;
            }
        }

        Ok(())
    }

    fn is_channel_clear(&mut self) -> Result<bool, SimError> {
        let mut i = self.inner();
        i.check()?;

        let now = i.timer.ticks_us();
        i.cca_times.push(now);

        let clear = match i.cca_script.pop_front() {
            Some(c) => c,
            None => i.cca_default,
        };
        trace!("Sim CCA at {} us: {}", now, if clear { "clear" } else { "busy" });

        Ok(clear)
    }

    fn preload(&mut self, frame: &[u8]) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.frame = frame.to_vec();
        Ok(())
    }

    fn recv(&mut self, buff: &mut [u8]) -> Result<usize, SimError> {
        let mut i = self.inner();
        i.check()?;

        let len = i.rx.as_ref().map(|f| f.len()).unwrap_or(0);
        if buff.is_empty() {
            return Ok(len);
        }

        match i.rx.take() {
            Some(f) => {
                let n = f.len().min(buff.len());
                buff[..n].copy_from_slice(&f[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn set_csma(&mut self, enabled: bool) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.csma = enabled;
        Ok(())
    }

    fn set_retransmissions(&mut self, retries: u8) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.retransmissions = retries;
        Ok(())
    }

    fn set_preloading(&mut self, enabled: bool) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.preloading = enabled;
        Ok(())
    }

    fn enable_irqs(&mut self, irqs: DeviceEvents) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.irqs = irqs;
        Ok(())
    }

    fn channel(&mut self) -> Result<u16, SimError> {
        let i = self.inner();
        i.check()?;
        Ok(i.channel)
    }

    fn channel_page(&mut self) -> Result<u16, SimError> {
        let i = self.inner();
        i.check()?;
        Ok(i.channel_page)
    }

    fn set_channel(&mut self, channel: u16) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.channel = channel;
        Ok(())
    }

    fn set_channel_page(&mut self, page: u16) -> Result<(), SimError> {
        let mut i = self.inner();
        i.check()?;
        i.channel_page = page;
        Ok(())
    }

    fn irq_pending(&mut self) -> bool {
        let i = self.inner();
        let now = i.timer.ticks_us();

        !i.pending.is_empty() || matches!(i.tx_done, Some((t, _)) if t <= now)
    }

    fn isr(&mut self) -> Result<DeviceEvents, SimError> {
        let mut i = self.inner();
        let now = i.timer.ticks_us();

        if let Some((t, outcome)) = i.tx_done {
            if t <= now {
                i.tx_done = None;
                i.pending |= outcome;
                // Transceivers return to receive after transmission
                i.mode = RadioMode::Listen;
            }
        }

        let ev = i.pending & i.irqs;
        i.pending = DeviceEvents::empty();

        Ok(ev)
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use super::*;

    const UNICAST: [u8; 12] = [0x61, 0x88, 0x07, 0x34, 0x12, 0x02, 0x00, 0x01, 0x00, 0xaa, 0xbb, 0xcc];

    #[test]
    fn ack_on_attempt() {
        let mut timer = MockTimer::new();
        let mut dev = MockTransceiver::new(timer.clone());
        dev.set_ack(AckPolicy::OnAttempt(2));
        dev.set_airtime(500);
        dev.preload(&UNICAST).unwrap();

        dev.set_mode(RadioMode::Transmit).unwrap();
        assert!(!dev.irq_pending());
        assert_eq!(dev.next_event_at(), Some(500));

        timer.set_us(500);
        assert!(dev.irq_pending());
        assert_eq!(dev.isr().unwrap(), DeviceEvents::TX_NOACK);
        assert_eq!(dev.mode(), RadioMode::Listen);

        dev.set_mode(RadioMode::Transmit).unwrap();
        timer.set_us(1000);
        assert_eq!(dev.isr().unwrap(), DeviceEvents::TX_COMPLETE);

        assert_eq!(dev.tx_times(), vec![0, 500]);
    }

    #[test]
    fn cca_script_then_default() {
        let timer = MockTimer::new();
        let mut dev = MockTransceiver::new(timer.clone());

        dev.script_cca(&[false, true]);
        dev.set_cca_default(false);

        assert_eq!(dev.is_channel_clear(), Ok(false));
        assert_eq!(dev.is_channel_clear(), Ok(true));
        assert_eq!(dev.is_channel_clear(), Ok(false));
        assert_eq!(dev.cca_count(), 3);
    }

    #[test]
    fn injected_reception() {
        let timer = MockTimer::new();
        let mut dev = MockTransceiver::new(timer.clone());

        dev.start_rx();
        dev.complete_rx(&UNICAST);
        assert_eq!(dev.isr().unwrap(), DeviceEvents::RX_STARTED | DeviceEvents::RX_COMPLETE);
        assert_eq!(dev.isr().unwrap(), DeviceEvents::empty());

        let mut buff = [0u8; 128];
        assert_eq!(dev.recv(&mut []).unwrap(), UNICAST.len());
        let n = dev.recv(&mut buff).unwrap();
        assert_eq!(&buff[..n], &UNICAST[..]);
    }
}
