//! Duty cycling simulation
//!
//! Runs the MAC over a simulated transceiver and clock, periodically sending
//! a unicast or broadcast frame and reporting radio activity.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use std::time::Duration;

use log::{debug, info, error};

use structopt::StructOpt;

use lpwan_rdc::prelude::*;
use lpwan_rdc::device::mock::{MockTransceiver, AckPolicy};
use lpwan_rdc::timer::mock::MockTimer;

// Data frame, Ack request, PAN ID compression, short addressing
const UNICAST: [u8; 12] = [0x61, 0x88, 0x01, 0x34, 0x12, 0x02, 0x00, 0x01, 0x00, 0xaa, 0xbb, 0xcc];

// Data frame, PAN ID compression, broadcast destination
const BROADCAST: [u8; 11] = [0x41, 0x88, 0x01, 0x34, 0x12, 0xff, 0xff, 0x01, 0x00, 0xaa, 0xbb];

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "10s", parse(try_from_str = humantime::parse_duration))]
    /// Simulated run time
    pub duration: Duration,

    #[structopt(long, default_value = "2s", parse(try_from_str = humantime::parse_duration))]
    /// Interval between sends
    pub tx_interval: Duration,

    #[structopt(long, default_value = "125ms", parse(try_from_str = humantime::parse_duration))]
    /// Channel check period
    pub channel_check_period: Duration,

    #[structopt(long)]
    /// Send broadcast rather than unicast frames
    pub broadcast: bool,

    #[structopt(long)]
    /// Transmission the simulated peer first acknowledges (never when unset)
    pub ack_on: Option<usize>,

    #[structopt(long, default_value = "26")]
    /// Radio channel
    pub channel: u16,

    #[structopt(long)]
    /// Disable duty cycling
    pub no_sleep: bool,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting strobe-sim");

    let mut timer = MockTimer::new();
    let dev = MockTransceiver::new(timer.clone());
    dev.configure_channel(opts.channel, 0);
    dev.set_ack(match opts.ack_on {
        Some(n) => AckPolicy::OnAttempt(n),
        None => AckPolicy::Never,
    });

    let config = MacConfig {
        channel_check_period: opts.channel_check_period.as_micros() as u32,
        no_sleep: opts.no_sleep,
        ..Default::default()
    };

    debug!("Initialising MAC");

    let mut mac = ContikiMac::new(dev.clone(), timer.clone(), config);
    if let Err(e) = mac.init() {
        return Err(anyhow::anyhow!("Error initialising MAC: {:?}", e));
    }

    info!("Using {} timings: {:?}", mac.phy(), mac.params());

    let end = opts.duration.as_micros() as Ts;
    let interval = opts.tx_interval.as_micros() as Ts;
    let mut next_tx = interval;

    let frame: &[u8] = match opts.broadcast {
        true => &BROADCAST,
        false => &UNICAST,
    };

    while timer.val() < end {
        // Jump to the next thing that happens
        let next = [mac.next_deadline(), dev.next_event_at(), Some(next_tx)]
            .iter()
            .flatten()
            .min()
            .copied()
            .unwrap_or(end)
            .min(end);

        if next > timer.val() {
            timer.set_us(next);
        }

        if timer.val() >= next_tx {
            if mac.tx_status() == TxStatus::Idle {
                info!("TX {:02x?} at {} us", frame, timer.val());
                if let Err(e) = mac.send(frame) {
                    error!("MAC TX error: {:?}", e);
                }
            }
            next_tx += interval;
        }

        mac.tick();

        while let Some(e) = mac.take_event() {
            debug!("Event: {:?}", e);
        }

        if let Some(outcome) = mac.take_outcome() {
            match outcome.result::<()>() {
                Ok(_) => info!("TX complete after {} transmissions", dev.tx_count()),
                Err(e) => error!("TX failed: {:?} after {} transmissions", e, dev.tx_count()),
            }
            dev.clear_history();
        }
    }

    let stats = mac.stats();
    info!("Stats: {:?}", stats);

    let checks = stats.channel_checks.max(1);
    info!("Energy detected on {}/{} channel checks", stats.energy_detected, checks);

    Ok(())
}
