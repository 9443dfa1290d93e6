//! Channel check scheduler and fast sleep
//!
//! Every channel check period the radio wakes, samples the channel with a
//! short burst of CCAs and goes straight back to sleep if nothing is heard.
//! When energy is detected the periodic handler keeps sampling until the
//! channel goes quiet, then listens for the frame that should follow. Both
//! phases are bounded by the timeout timer so noise cannot keep the radio
//! awake.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::{trace, debug};

use crate::Ts;
use crate::device::{RadioMode, Transceiver};
use crate::event::{Event, TimerId};
use crate::timer::Timer;

use super::ContikiMac;

impl <D, T> ContikiMac<D, T>
where
    D: Transceiver,
    T: Timer,
{
    /// Scheduled channel check, re-arms the cadence before checking
    pub(crate) fn ev_channel_check(&mut self) {
        self.arm(TimerId::ChannelCheck, self.config.channel_check_period);
        self.channel_check();
    }

    /// Wake the radio and look for activity on the channel
    pub(crate) fn channel_check(&mut self) {
        if self.state.no_sleep {
            return;
        }
        if self.tx_active() {
            // Do not disrupt the strobe
            return;
        }

        if !self.check_timeouts() && self.state.rx_in_progress {
            debug!("Skip channel check, RX in progress");
            return;
        }

        self.cancel_timers();
        self.stats.channel_checks += 1;

        trace!("Checking channel");

        if self.set_radio(RadioMode::Standby).is_err() {
            return;
        }

        if self.energy_detect() {
            debug!("Detected energy, looking for silence");
            self.stats.energy_detected += 1;

            self.state.seen_silence = false;
            self.events.post(Event::Periodic);
            self.set_timeout(self.params.after_ed_scan_timeout);
        } else {
            trace!("Nothing seen");
            self.radio_sleep();
        }
    }

    /// Up to `cca_count_max` CCAs at a fixed `cca_cycle_period` cadence,
    /// returning at the first busy result.
    pub(crate) fn energy_detect(&mut self) -> bool {
        let mut wakeup = self.timer.ticks_us();

        for n in 0..self.params.cca_count_max {
            if n > 0 {
                // Relative to the previous wakeup to avoid drift
                wakeup += self.params.cca_cycle_period as Ts;
                self.timer.wait_until_us(wakeup);
            }

            match self.device.is_channel_clear() {
                Ok(true) => (),
                Ok(false) => {
                    trace!("CCA {} busy", n);
                    return true;
                }
                Err(e) => {
                    debug!("Failed reading channel clear: {:?}", e);
                    break;
                }
            }
        }

        false
    }

    /// Periodic handler while awake outside of transmission.
    ///
    /// Looks for silence after detected energy, then listens until the
    /// timeout puts the radio back to sleep.
    pub(crate) fn periodic_tick(&mut self) {
        if self.state.no_sleep {
            return;
        }

        if self.check_timeouts() {
            self.radio_sleep();
            self.state.rx_in_progress = false;
            return;
        }

        // CCAs could abort an in flight reception
        if self.state.seen_silence || self.state.rx_in_progress {
            return;
        }

        match self.device.is_channel_clear() {
            Ok(true) => (),
            Ok(false) => {
                trace!("Still busy");
                self.arm(TimerId::Periodic, self.params.after_ed_scan_interval);
                return;
            }
            Err(e) => {
                debug!("Failed reading channel clear: {:?}", e);
                return;
            }
        }

        // Silence, expect the frame very soon
        self.state.seen_silence = true;
        if self.set_radio(RadioMode::Listen).is_err() {
            return;
        }

        debug!("Silence, listening");
        self.set_timeout(self.params.listen_timeout);
    }

    /// Consume a fired timeout, cancelling the remaining timers
    pub(crate) fn check_timeouts(&mut self) -> bool {
        if !self.state.timeout_flag {
            return false;
        }

        self.cancel_timers();

        if self.tx_active() {
            debug!("TX timeout");
        } else if self.state.rx_in_progress {
            debug!("RX timeout");
        } else if self.state.seen_silence {
            debug!("Fast sleep (long silence)");
            self.stats.fast_sleeps += 1;
        } else {
            debug!("Fast sleep (noise)");
            self.stats.fast_sleeps += 1;
        }

        true
    }

    /// Cancel the periodic and timeout timers along with any queued periodic event
    pub(crate) fn cancel_timers(&mut self) {
        self.timers.cancel(TimerId::Periodic);
        self.timers.cancel(TimerId::Timeout);
        self.events.cancel(Event::Periodic);
        self.state.timeout_flag = false;
    }

    /// (Re)arm the timeout timer
    pub(crate) fn set_timeout(&mut self, delay_us: u32) {
        self.timers.cancel(TimerId::Timeout);
        self.state.timeout_flag = false;
        self.arm(TimerId::Timeout, delay_us);
    }

    pub(crate) fn radio_sleep(&mut self) {
        trace!("Going to sleep");
        let _ = self.set_radio(RadioMode::Sleep);
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use crate::Device;
    use crate::device::mock::AckPolicy;
    use crate::mac::{Config, Opt, OptValue, MacState};
    use crate::mac::sim::*;

    use super::*;

    #[test]
    fn energy_detect_short_circuits() {
        let (timer, dev, mut mac) = setup(Config::default());
        let t_c = mac.params().cca_cycle_period as Ts;

        // Clear, busy, then clear
        dev.script_cca(&[true, false, true, true]);

        let start = timer.val();
        assert_eq!(mac.energy_detect(), true);
        assert_eq!(dev.cca_count(), 2);
        assert_eq!(dev.cca_times(), vec![start, start + t_c]);
    }

    #[test]
    fn energy_detect_fixed_cadence() {
        let (timer, dev, mut mac) = setup(Config::default());
        let t_c = mac.params().cca_cycle_period as Ts;

        let start = timer.val();
        assert_eq!(mac.energy_detect(), false);
        assert_eq!(dev.cca_times(), vec![start, start + t_c, start + 2 * t_c, start + 3 * t_c]);
    }

    #[test]
    fn quiet_check_sleeps_and_reschedules() {
        let (timer, dev, mut mac) = setup(Config::default());

        run_until(&mut mac, &dev, &timer, 10);

        assert_eq!(dev.modes(), vec![RadioMode::Standby, RadioMode::Sleep]);
        assert_eq!(dev.cca_count(), 4);
        assert_eq!(mac.deadline(TimerId::ChannelCheck), Some(125_000));
        assert_eq!(mac.deadline(TimerId::Timeout), None);

        // Next scheduled check
        dev.clear_history();
        run_until(&mut mac, &dev, &timer, 125_010);
        assert_eq!(dev.cca_times()[0], 125_000);
        assert_eq!(mac.deadline(TimerId::ChannelCheck), Some(250_000));
        assert_eq!(mac.stats().channel_checks, 2);
    }

    #[test]
    fn channel_check_idempotent_when_quiet() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        let state: MacState = mac.state().clone();
        let periodic = mac.deadline(TimerId::Periodic);
        let timeout = mac.deadline(TimerId::Timeout);

        mac.events.post(Event::ChannelCheck);
        mac.dispatch_all();

        assert_eq!(mac.state(), &state);
        assert_eq!(mac.deadline(TimerId::Periodic), periodic);
        assert_eq!(mac.deadline(TimerId::Timeout), timeout);
        assert_eq!(dev.mode(), RadioMode::Sleep);
        assert_eq!(mac.deadline(TimerId::ChannelCheck), Some(timer.val() - 3 * 544 + 125_000));
    }

    #[test]
    fn fast_sleep_after_silence() {
        let (timer, dev, mut mac) = setup(Config::default());
        let p = *mac.params();

        // Busy on the first CCA, then quiet
        dev.script_cca(&[false]);

        run_until(&mut mac, &dev, &timer, 10);
        assert_eq!(mac.state().seen_silence, true);
        assert_eq!(dev.mode(), RadioMode::Listen);
        assert_eq!(mac.deadline(TimerId::Timeout), Some(p.listen_timeout as Ts));

        // No frame arrives
        run_until(&mut mac, &dev, &timer, p.listen_timeout as Ts + 10);
        assert_eq!(dev.modes(), vec![RadioMode::Standby, RadioMode::Listen, RadioMode::Sleep]);
        assert_eq!(dev.transitions()[2].0, p.listen_timeout as Ts);
        assert_eq!(mac.stats().fast_sleeps, 1);
        assert_eq!(mac.state().timeout_flag, false);
    }

    #[test]
    fn fast_sleep_on_noise() {
        let (timer, dev, mut mac) = setup(Config::default());
        let p = *mac.params();

        dev.set_cca_default(false);

        run_until(&mut mac, &dev, &timer, p.after_ed_scan_timeout as Ts + 10);

        // Kept scanning for silence at the scan interval, then gave up
        assert_eq!(mac.state().seen_silence, false);
        assert_eq!(dev.mode(), RadioMode::Sleep);
        assert_eq!(dev.transitions().last().map(|t| t.0), Some(p.after_ed_scan_timeout as Ts));

        let scans = dev.cca_times();
        assert!(scans.len() > 2);
        assert_eq!(scans[2] - scans[1], p.after_ed_scan_interval as Ts);
    }

    #[test]
    fn skip_check_while_receiving() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        // Reception starts
        dev.start_rx();
        mac.tick();
        assert_eq!(mac.state().rx_in_progress, true);

        dev.clear_history();
        let state = mac.state().clone();

        mac.channel_check();

        assert_eq!(dev.cca_count(), 0);
        assert!(dev.modes().is_empty());
        assert_eq!(mac.state(), &state);
    }

    #[test]
    fn extra_check_after_unicast() {
        let (timer, dev, mut mac) = setup(Config::default());
        dev.set_ack(AckPolicy::Always);
        run_until(&mut mac, &dev, &timer, 10);

        mac.send(&UNICAST).unwrap();
        run_until(&mut mac, &dev, &timer, 20_000);

        let done = dev.tx_times()[0] + dev.airtime() as Ts;
        let extra = done + 8_192;

        // Checked at the reply delay, without moving the cadence
        assert!(dev.cca_times().contains(&extra));
        assert_eq!(mac.deadline(TimerId::ChannelCheck), Some(125_000));
    }

    #[test]
    fn no_sleep_never_sleeps() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        mac.set(Opt::NoSleep, OptValue::Bool(true)).unwrap();
        assert_eq!(dev.mode(), RadioMode::Listen);
        dev.clear_history();

        // Busy channel, a send and a reception
        dev.set_cca_default(false);
        run_until(&mut mac, &dev, &timer, 300_000);

        dev.set_cca_default(true);
        mac.send(&BROADCAST).unwrap();
        run_until(&mut mac, &dev, &timer, 600_000);

        dev.start_rx();
        dev.complete_rx(&UNICAST);
        run_until(&mut mac, &dev, &timer, 700_000);
        let mut buff = [0u8; 128];
        mac.recv(&mut buff).unwrap();
        run_until(&mut mac, &dev, &timer, 800_000);

        assert!(!dev.modes().contains(&RadioMode::Sleep));
        assert_eq!(dev.mode(), RadioMode::Listen);

        // Re-enabling duty cycling restarts the cadence
        mac.set(Opt::NoSleep, OptValue::Bool(false)).unwrap();
        run_until(&mut mac, &dev, &timer, 800_010);
        assert_eq!(dev.mode(), RadioMode::Sleep);
    }

    #[test]
    fn radio_failure_recovers() {
        let (timer, dev, mut mac) = setup(Config::default());

        dev.set_fail(true);
        run_until(&mut mac, &dev, &timer, 10);
        assert_eq!(dev.cca_count(), 0);

        // Re-synchronised by the next scheduled check
        dev.set_fail(false);
        run_until(&mut mac, &dev, &timer, 125_010);
        assert_eq!(dev.cca_count(), 4);
        assert_eq!(dev.mode(), RadioMode::Sleep);
    }
}
