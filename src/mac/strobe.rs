//! Transmit strobe engine
//!
//! A send repeats the preloaded frame for a full channel check period plus
//! two CCA cycles so every receiver wakes during at least one copy. Unicast
//! stops at the first acknowledged copy. Broadcast always covers the window,
//! waiting `inter_packet_interval` after each copy. Once the window elapses
//! one final copy is sent before giving up.
//!
//! The engine never blocks: each step is driven by the periodic event
//! (pre-check rescans, spacing and timeouts) or by TX end events from the
//! transceiver.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::{trace, debug, warn};

use crate::device::{RadioMode, Transceiver};
use crate::event::{Event, TimerId};
use crate::timer::Timer;

use super::{ContikiMac, NetEvent, TxOutcome, TxStatus};

/// Copies sent after the strobe window elapsed, counting the one in progress
const FINAL_SEQUENCE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    /// Waiting for a clear channel before the first copy
    PreCheck,
    /// Waiting for the transceiver to report the current copy
    InFlight,
    /// Waiting out the inter packet interval (broadcast)
    Spacing,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Strobe {
    pub(crate) phase: Phase,
    pub(crate) broadcast: bool,
    /// Strobe window in microseconds
    pub(crate) window: u32,
    pub(crate) remaining: u8,
    /// Window elapsed
    pub(crate) expired: bool,
    pub(crate) attempts: u32,
}

impl Default for Strobe {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            broadcast: false,
            window: 0,
            remaining: FINAL_SEQUENCE,
            expired: false,
            attempts: 0,
        }
    }
}

impl <D, T> ContikiMac<D, T>
where
    D: Transceiver,
    T: Timer,
{
    /// Begin strobing the preloaded frame
    pub(crate) fn start_strobe(&mut self, broadcast: bool) {
        let window = self.params.strobe_timeout(self.config.channel_check_period);

        self.state.tx_status = TxStatus::Started;
        self.outcome = None;
        self.strobe = Strobe {
            phase: Phase::PreCheck,
            broadcast,
            window,
            ..Default::default()
        };

        match broadcast {
            true => self.stats.tx_multicast += 1,
            false => self.stats.tx_unicast += 1,
        }

        debug!("Start {} strobe ({} us)", if broadcast { "broadcast" } else { "unicast" }, window);

        // TX aborts listening
        self.cancel_timers();

        // Bound the wait for a clear channel
        self.set_timeout(window + self.params.rx_timeout);
        self.events.post(Event::Periodic);
    }

    /// Periodic event while a send is in progress
    pub(crate) fn strobe_periodic(&mut self) {
        match self.strobe.phase {
            Phase::PreCheck => self.strobe_precheck(),
            Phase::InFlight => {
                if self.state.timeout_flag {
                    self.strobe_timeout();
                }
            }
            Phase::Spacing => {
                if self.state.timeout_flag {
                    self.strobe_timeout();
                }
                // Spacing timer shares the periodic event with the timeout
                if self.strobe.phase == Phase::Spacing && !self.timers.is_armed(TimerId::Periodic) {
                    self.strobe_retransmit();
                }
            }
            Phase::Idle => trace!("Stray periodic event"),
        }
    }

    /// Avoid colliding with another strobe or a reply in progress
    fn strobe_precheck(&mut self) {
        if self.state.timeout_flag {
            debug!("Channel busy");
            self.state.tx_status = TxStatus::MediumBusy;
            self.strobe_finish(TxOutcome::MediumBusy);
            return;
        }

        if self.energy_detect() {
            trace!("Wait for TX opportunity");
            self.arm(TimerId::Periodic, self.params.cca_cycle_period);
            return;
        }

        self.cancel_timers();
        self.set_timeout(self.strobe.window);
        self.strobe_transmit();
    }

    fn strobe_timeout(&mut self) {
        self.state.timeout_flag = false;

        if !self.strobe.expired {
            debug!("Strobe window elapsed after {} copies", self.strobe.attempts);
            self.strobe.expired = true;

            if self.strobe.phase == Phase::InFlight {
                self.arm(TimerId::Timeout, self.watchdog());
            }
            return;
        }

        warn!("TX end never reported, abandoning strobe");
        let outcome = self.exhausted();
        self.strobe_finish(outcome);
    }

    fn strobe_transmit(&mut self) {
        self.strobe.phase = Phase::InFlight;
        self.strobe.attempts += 1;
        self.stats.strobe_tx += 1;
        self.state.tx_status = TxStatus::Started;

        if self.strobe.expired {
            self.set_timeout(self.watchdog());
        }

        trace!("Strobe copy {}", self.strobe.attempts);

        let _ = self.set_radio(RadioMode::Transmit);
    }

    /// Decide whether to send another copy
    fn strobe_retransmit(&mut self) {
        if self.strobe.expired {
            self.strobe.remaining = self.strobe.remaining.saturating_sub(1);

            if self.strobe.remaining == 0 {
                let outcome = self.exhausted();
                self.strobe_finish(outcome);
                return;
            }
        }

        self.strobe_transmit();
    }

    /// TX end reported by the transceiver
    pub(crate) fn strobe_tx_end(&mut self, status: TxStatus) {
        if self.strobe.phase != Phase::InFlight {
            debug!("Unexpected TX end ({:?}) in {:?}", status, self.strobe.phase);
            return;
        }

        self.state.tx_status = status;

        match (status, self.strobe.broadcast) {
            (TxStatus::Complete, false) => {
                trace!("Acked after {} copies", self.strobe.attempts);
                self.strobe_finish(TxOutcome::Complete);
            }
            (TxStatus::Complete, true) => {
                self.strobe.phase = Phase::Spacing;
                self.arm(TimerId::Periodic, self.params.inter_packet_interval);
            }
            // The frame is already in flight, skip the wait on errors
            _ => self.strobe_retransmit(),
        }
    }

    /// Outcome once the window and final copy are used up
    fn exhausted(&self) -> TxOutcome {
        match self.strobe.broadcast {
            true => TxOutcome::Complete,
            false => TxOutcome::NoAck,
        }
    }

    fn watchdog(&self) -> u32 {
        self.params.rx_timeout + self.params.inter_packet_interval
    }

    fn strobe_finish(&mut self, outcome: TxOutcome) {
        self.cancel_timers();

        let broadcast = self.strobe.broadcast;
        debug!("Strobe done: {:?} after {} copies", outcome, self.strobe.attempts);

        self.strobe.phase = Phase::Idle;
        self.state.tx_status = TxStatus::Idle;
        self.outcome = Some(outcome);

        match outcome {
            TxOutcome::Complete => self.stats.tx_success += 1,
            _ => self.stats.tx_failed += 1,
        }

        self.notify(match outcome {
            TxOutcome::Complete => NetEvent::TxComplete,
            TxOutcome::NoAck => NetEvent::TxNoAck,
            TxOutcome::MediumBusy => NetEvent::TxMediumBusy,
        });

        if self.state.no_sleep {
            let _ = self.set_radio(RadioMode::Listen);
            return;
        }

        // Catch an immediate reply from the peer
        if !broadcast && outcome == TxOutcome::Complete {
            self.arm(TimerId::ExtraChannelCheck, self.config.reply_delay);
        }

        // The receive cycle was disrupted by the send
        self.radio_sleep();
        self.state.rx_in_progress = false;
    }
}
