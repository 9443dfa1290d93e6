//! [`Transceiver`] adaptor for `radio` HAL devices
//!
//! Radios driven through the `radio` traits (such as the sx127x / sx128x
//! families) have no 802.15.4 frame engine, so this adaptor provides one in
//! software: RSSI based CCA, a preload buffer re-issued on every transmit,
//! Ack waiting and Ack generation. Events are synthesised by polling.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::{fmt::Debug, marker::PhantomData};

use heapless::Vec;
use log::{trace, debug, warn};

use radio::ReceiveInfo;

use crate::{Radio, RawPacket, Ts, MAX_FRAME_LEN, timer::Timer};
use crate::packet::{self, AddressConfig};

use super::{DeviceEvents, RadioMode, Transceiver};

/// Configuration for the `radio` HAL adaptor
#[derive(Debug, Clone, PartialEq)]
pub struct HalConfig {
    /// RSSI threshold at or below which the channel is clear
    pub channel_clear_threshold: i16,

    /// Time to wait for an Ack after transmission in microseconds
    pub ack_timeout_us: u32,

    /// Local address for frame filtering and Ack generation,
    /// `None` accepts every frame and never sends Acks
    pub address: Option<AddressConfig>,

    /// Channel reported to the MAC (configured out of band on HAL radios)
    pub channel: u16,

    /// Channel page reported to the MAC
    pub channel_page: u16,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            channel_clear_threshold: -90,
            // macAckWaitDuration, 54 symbols at 16 us
            ack_timeout_us: 864,
            address: None,
            channel: 11,
            channel_page: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Transmitting,
    AwaitingAck { seq: u8, deadline: Ts },
    SendingAck,
}

/// Software 802.15.4 frame engine over a `radio` HAL device
pub struct RadioHal<R, S, I, E, T> {
    radio: R,
    timer: T,
    config: HalConfig,

    mode: RadioMode,
    phase: Phase,
    sampling: bool,

    irqs: DeviceEvents,
    preloading: bool,

    tx: Vec<u8, MAX_FRAME_LEN>,
    rx: RawPacket,

    _state: PhantomData<S>,
    _info: PhantomData<I>,
    _err: PhantomData<E>,
}

impl <R, S, I, E, T> RadioHal<R, S, I, E, T>
where
    R: Radio<S, I, E>,
    S: radio::RadioState,
    I: ReceiveInfo + Default + Debug,
    E: Debug,
    T: Timer,
{
    pub fn new(radio: R, timer: T, config: HalConfig) -> Self {
        Self {
            radio,
            timer,
            config,
            mode: RadioMode::Standby,
            phase: Phase::Idle,
            sampling: false,
            irqs: DeviceEvents::all(),
            preloading: false,
            tx: Vec::new(),
            rx: RawPacket::default(),
            _state: PhantomData,
            _info: PhantomData,
            _err: PhantomData,
        }
    }

    /// Current operating mode
    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    /// Release the underlying radio
    pub fn free(self) -> R {
        self.radio
    }

    fn listen(&mut self) -> Result<(), E> {
        self.radio.start_receive()?;
        self.mode = RadioMode::Listen;
        Ok(())
    }

    fn poll_tx(&mut self) -> Result<DeviceEvents, E> {
        if !self.radio.check_transmit()? {
            return Ok(DeviceEvents::empty());
        }

        // Listen for an Ack, or for whatever comes next
        self.listen()?;

        match (packet::ack_request(&self.tx), packet::seq(&self.tx)) {
            (true, Some(seq)) => {
                let deadline = self.timer.ticks_us() + self.config.ack_timeout_us as Ts;
                trace!("TX done, awaiting ack for {} until {} us", seq, deadline);
                self.phase = Phase::AwaitingAck { seq, deadline };
                Ok(DeviceEvents::empty())
            }
            _ => {
                trace!("TX done");
                self.phase = Phase::Idle;
                Ok(DeviceEvents::TX_COMPLETE)
            }
        }
    }

    fn poll_ack(&mut self, seq: u8, deadline: Ts) -> Result<DeviceEvents, E> {
        if self.radio.check_receive(true)? {
            let mut buff = [0u8; MAX_FRAME_LEN + 1];
            let (n, _info) = self.radio.get_received(&mut buff)?;

            if packet::is_ack_for(&buff[..n], seq) {
                debug!("Received ack for {}", seq);
                self.phase = Phase::Idle;
                return Ok(DeviceEvents::TX_COMPLETE);
            }

            trace!("Ignoring {} byte frame while awaiting ack", n);
            self.radio.start_receive()?;
        }

        if self.timer.ticks_us() >= deadline {
            debug!("Ack timeout for {}", seq);
            self.phase = Phase::Idle;
            return Ok(DeviceEvents::TX_NOACK);
        }

        Ok(DeviceEvents::empty())
    }

    fn poll_rx(&mut self) -> Result<DeviceEvents, E> {
        if self.mode != RadioMode::Listen || !self.radio.check_receive(true)? {
            return Ok(DeviceEvents::empty());
        }

        let mut buff = [0u8; MAX_FRAME_LEN + 1];
        let (n, info) = self.radio.get_received(&mut buff)?;
        let frame = &buff[..n];

        let header = match packet::header(frame) {
            Some(h) => h,
            None => {
                self.radio.start_receive()?;
                return Ok(DeviceEvents::empty());
            }
        };

        // Drop frames for other nodes
        if let Some(a) = &self.config.address {
            if !a.accepts(&header.destination) {
                self.radio.start_receive()?;
                return Ok(DeviceEvents::empty());
            }
        }

        self.rx.set(frame, info.rssi());
        debug!("Received {} byte frame (rssi: {})", n, info.rssi());

        // Acknowledge unicast frames addressed to us
        if header.ack_request && self.config.address.is_some() && !packet::is_broadcast(frame) {
            let ack = packet::ack_frame(header.seq, false);
            trace!("Sending ack for {}", header.seq);
            self.radio.start_transmit(&ack)?;
            self.phase = Phase::SendingAck;
            return Ok(DeviceEvents::empty());
        }

        Ok(DeviceEvents::RX_STARTED | DeviceEvents::RX_COMPLETE)
    }

    fn poll_ack_tx(&mut self) -> Result<DeviceEvents, E> {
        if !self.radio.check_transmit()? {
            return Ok(DeviceEvents::empty());
        }

        self.listen()?;
        self.phase = Phase::Idle;

        Ok(DeviceEvents::RX_STARTED | DeviceEvents::RX_COMPLETE)
    }
}

impl <R, S, I, E, T> Transceiver for RadioHal<R, S, I, E, T>
where
    R: Radio<S, I, E>,
    S: radio::RadioState,
    I: ReceiveInfo + Default + Debug,
    E: Debug,
    T: Timer,
{
    type Error = E;

    fn init(&mut self) -> Result<(), E> {
        self.radio.set_state(S::idle())?;
        self.mode = RadioMode::Standby;
        self.phase = Phase::Idle;
        Ok(())
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), E> {
        trace!("Set mode: {:?}", mode);

        self.sampling = false;

        // Mode changes abandon any transmission or Ack wait
        match mode {
            RadioMode::Sleep => {
                self.radio.set_state(S::sleep())?;
                self.phase = Phase::Idle;
            }
            RadioMode::Standby | RadioMode::Reset => {
                self.radio.set_state(S::idle())?;
                self.phase = Phase::Idle;
            }
            RadioMode::Listen => {
                self.radio.start_receive()?;
                self.phase = Phase::Idle;
            }
            RadioMode::Transmit => {
                if self.tx.is_empty() || !self.preloading {
                    warn!("Transmit without preloaded frame");
                }
                self.radio.start_transmit(&self.tx)?;
                self.phase = Phase::Transmitting;
            }
        }

        self.mode = match mode {
            RadioMode::Reset => RadioMode::Standby,
            m => m,
        };

        Ok(())
    }

    fn is_channel_clear(&mut self) -> Result<bool, E> {
        // RSSI is only valid in receive mode
        if self.mode != RadioMode::Listen && !self.sampling {
            self.radio.start_receive()?;
            self.sampling = true;
        }

        let rssi = self.radio.poll_rssi()?;
        trace!("CCA rssi: {}", rssi);

        Ok(rssi <= self.config.channel_clear_threshold)
    }

    fn preload(&mut self, frame: &[u8]) -> Result<(), E> {
        let n = frame.len().min(MAX_FRAME_LEN);
        if n < frame.len() {
            warn!("Truncating {} byte frame", frame.len());
        }

        self.tx.clear();
        let _ = self.tx.extend_from_slice(&frame[..n]);

        Ok(())
    }

    fn recv(&mut self, buff: &mut [u8]) -> Result<usize, E> {
        let len = self.rx.data().len();
        if buff.is_empty() {
            return Ok(len);
        }

        let n = len.min(buff.len());
        buff[..n].copy_from_slice(&self.rx.data()[..n]);
        self.rx.clear();

        Ok(n)
    }

    fn set_csma(&mut self, enabled: bool) -> Result<(), E> {
        if enabled {
            warn!("Hardware CSMA not available");
        }
        Ok(())
    }

    fn set_retransmissions(&mut self, retries: u8) -> Result<(), E> {
        if retries != 0 {
            warn!("Hardware retransmission not available");
        }
        Ok(())
    }

    fn set_preloading(&mut self, enabled: bool) -> Result<(), E> {
        self.preloading = enabled;
        Ok(())
    }

    fn enable_irqs(&mut self, irqs: DeviceEvents) -> Result<(), E> {
        self.irqs = irqs;
        Ok(())
    }

    fn channel(&mut self) -> Result<u16, E> {
        Ok(self.config.channel)
    }

    fn channel_page(&mut self) -> Result<u16, E> {
        Ok(self.config.channel_page)
    }

    fn set_channel(&mut self, channel: u16) -> Result<(), E> {
        self.config.channel = channel;
        Ok(())
    }

    fn set_channel_page(&mut self, page: u16) -> Result<(), E> {
        self.config.channel_page = page;
        Ok(())
    }

    fn irq_pending(&mut self) -> bool {
        self.mode == RadioMode::Listen || self.phase != Phase::Idle
    }

    fn isr(&mut self) -> Result<DeviceEvents, E> {
        let ev = match self.phase {
            Phase::Idle => self.poll_rx()?,
            Phase::Transmitting => self.poll_tx()?,
            Phase::AwaitingAck { seq, deadline } => self.poll_ack(seq, deadline)?,
            Phase::SendingAck => self.poll_ack_tx()?,
        };

        Ok(ev & self.irqs)
    }
}
