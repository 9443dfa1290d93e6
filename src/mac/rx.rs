//! Device event servicing and RX burst continuation
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::{trace, debug};

use crate::packet;
use crate::device::{DeviceEvents, RadioMode, Transceiver};
use crate::error::CoreError;
use crate::timer::Timer;

use super::{ContikiMac, NetEvent, Notify, TxStatus};

impl <D, T> ContikiMac<D, T>
where
    D: Transceiver,
    T: Timer,
{
    /// Deferred interrupt handler, services the transceiver and routes its events
    pub(crate) fn service_device(&mut self) {
        let ev = match self.device.isr() {
            Ok(ev) => ev,
            Err(e) => {
                debug!("Device ISR failed: {:?}", e);
                return;
            }
        };

        if ev.is_empty() {
            return;
        }
        trace!("Device events: {:?}", ev);

        if ev.contains(DeviceEvents::RX_STARTED) {
            self.state.rx_in_progress = true;

            // Give the frame time to complete before sleeping
            if !self.state.no_sleep && !self.tx_active() {
                self.cancel_timers();
                self.set_timeout(self.params.rx_timeout);
            }

            self.notify(NetEvent::RxStarted);
        }

        let tx_end = if ev.contains(DeviceEvents::TX_COMPLETE) {
            Some(TxStatus::Complete)
        } else if ev.contains(DeviceEvents::TX_NOACK) {
            Some(TxStatus::NoAck)
        } else if ev.contains(DeviceEvents::TX_MEDIUM_BUSY) {
            Some(TxStatus::MediumBusy)
        } else {
            None
        };
        if let Some(status) = tx_end {
            self.strobe_tx_end(status);
        }

        if ev.contains(DeviceEvents::RX_COMPLETE) {
            self.rx_complete();
        }
    }

    fn rx_complete(&mut self) {
        if self.tx_active() {
            // Frames heard mid strobe leave the strobe timers alone
            self.notify(NetEvent::RxComplete);
            return;
        }

        self.cancel_timers();

        if self.config.notify.contains(Notify::RX_END) {
            // Keep the frame buffer until collected
            let _ = self.set_radio(RadioMode::Standby);
            self.notify(NetEvent::RxComplete);
        } else if self.state.no_sleep {
            let _ = self.set_radio(RadioMode::Listen);
        } else {
            self.radio_sleep();
        }
    }

    /// Collect a received frame.
    ///
    /// An empty buffer only queries the pending frame length. Frames with the
    /// frame pending bit keep the radio listening for `burst_timeout`.
    pub(crate) fn receive(&mut self, buff: &mut [u8]) -> Result<usize, CoreError<D::Error>> {
        if buff.is_empty() {
            return self.device.recv(buff).map_err(CoreError::Radio);
        }

        let n = self.device.recv(buff).map_err(CoreError::Radio)?;
        if n == 0 {
            return Ok(0);
        }

        self.state.rx_in_progress = false;
        let expect_burst = packet::frame_pending(&buff[..n]);

        if self.tx_active() {
            return Ok(n);
        }

        if self.state.no_sleep || expect_burst {
            self.set_radio(RadioMode::Listen)?;

            if !self.state.no_sleep {
                debug!("Burst, listening for {} us", self.config.burst_timeout);
                self.set_timeout(self.config.burst_timeout);
                self.stats.bursts += 1;
            }
        } else {
            self.radio_sleep();
        }

        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use crate::{Device, Ts};
    use crate::device::mock::AckPolicy;
    use crate::event::TimerId;
    use crate::mac::{Config, Opt, OptValue};
    use crate::mac::sim::*;

    use super::*;

    #[test]
    fn rx_started_arms_rx_timeout() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        dev.start_rx();
        mac.tick();

        let now = timer.val();
        let rx_timeout = mac.params().rx_timeout as Ts;
        assert_eq!(mac.state().rx_in_progress, true);
        assert_eq!(mac.deadline(TimerId::Timeout), Some(now + rx_timeout));

        // Frame never completes
        run_until(&mut mac, &dev, &timer, now + rx_timeout + 10);
        assert_eq!(mac.state().rx_in_progress, false);
        assert_eq!(dev.mode(), RadioMode::Sleep);
    }

    #[test]
    fn completed_frame_held_in_standby() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        dev.start_rx();
        dev.complete_rx(&UNICAST);
        mac.tick();

        assert_eq!(dev.mode(), RadioMode::Standby);
        assert_eq!(mac.take_event(), Some(NetEvent::RxComplete));
        assert_eq!(mac.deadline(TimerId::Timeout), None);

        assert_eq!(mac.recv(&mut []), Ok(UNICAST.len()));

        let mut buff = [0u8; 128];
        let n = mac.recv(&mut buff).unwrap();
        assert_eq!(&buff[..n], &UNICAST[..]);
        assert_eq!(dev.mode(), RadioMode::Sleep);
        assert_eq!(mac.state().rx_in_progress, false);
    }

    #[test]
    fn rx_end_disabled_sleeps() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        mac.set(Opt::NotifyRxEnd, OptValue::Bool(false)).unwrap();

        dev.start_rx();
        dev.complete_rx(&UNICAST);
        mac.tick();

        assert_eq!(dev.mode(), RadioMode::Sleep);
        assert_eq!(mac.take_event(), None);
    }

    #[test]
    fn empty_poll_keeps_reception() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        dev.start_rx();
        mac.tick();

        let timeout = mac.deadline(TimerId::Timeout);
        dev.clear_history();

        // Nothing received yet
        let mut buff = [0u8; 128];
        assert_eq!(mac.recv(&mut buff), Ok(0));

        assert_eq!(mac.state().rx_in_progress, true);
        assert_eq!(mac.deadline(TimerId::Timeout), timeout);
        assert!(dev.modes().is_empty());
    }

    #[test]
    fn frame_pending_continues_burst() {
        let (timer, dev, mut mac) = setup(Config::default());
        run_until(&mut mac, &dev, &timer, 10);

        dev.start_rx();
        dev.complete_rx(&PENDING);
        mac.tick();

        let mut buff = [0u8; 128];
        assert_eq!(mac.recv(&mut buff), Ok(PENDING.len()));

        let now = timer.val();
        assert_eq!(dev.mode(), RadioMode::Listen);
        assert_eq!(mac.deadline(TimerId::Timeout), Some(now + 15_625));
        assert_eq!(mac.stats().bursts, 1);

        // Nothing follows, back to the normal cadence
        run_until(&mut mac, &dev, &timer, now + 15_625 + 10);
        assert_eq!(dev.mode(), RadioMode::Sleep);
        assert_eq!(dev.transitions().last().copied().unwrap(), (now + 15_625, RadioMode::Sleep));
        assert_eq!(mac.deadline(TimerId::ChannelCheck), Some(125_000));
    }

    #[test]
    fn reception_during_strobe() {
        let (timer, dev, mut mac) = setup(Config::default());
        dev.set_ack(AckPolicy::Never);
        run_until(&mut mac, &dev, &timer, 10);

        mac.send(&UNICAST).unwrap();
        run_until(&mut mac, &dev, &timer, 20_000);

        let timeout = mac.deadline(TimerId::Timeout);
        let mode = dev.mode();
        assert!(timeout.is_some());

        dev.start_rx();
        dev.complete_rx(&PENDING);
        mac.tick();

        assert_eq!(mac.deadline(TimerId::Timeout), timeout);
        assert_eq!(mac.tx_status(), TxStatus::Started);
        assert_eq!(mac.take_event(), Some(NetEvent::RxComplete));

        // Collecting does not touch the radio mid strobe
        let mut buff = [0u8; 128];
        assert_eq!(mac.recv(&mut buff), Ok(PENDING.len()));
        assert_eq!(dev.mode(), mode);
        assert_eq!(mac.stats().bursts, 0);
    }

    #[test]
    fn no_sleep_keeps_listening() {
        let (timer, dev, mut mac) = setup(Config { no_sleep: true, ..Default::default() });
        run_until(&mut mac, &dev, &timer, 10);
        assert_eq!(dev.mode(), RadioMode::Listen);

        dev.start_rx();
        mac.tick();
        assert_eq!(mac.deadline(TimerId::Timeout), None);

        dev.complete_rx(&PENDING);
        mac.tick();

        let mut buff = [0u8; 128];
        mac.recv(&mut buff).unwrap();
        assert_eq!(dev.mode(), RadioMode::Listen);
        assert_eq!(mac.deadline(TimerId::Timeout), None);
    }
}
