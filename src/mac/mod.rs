//! ContikiMAC style radio duty cycling
//!
//! The MAC owns the transceiver, a clock, the event queue and the four
//! deadline timers. Everything runs from [`ContikiMac::tick`]: expired timers
//! and pending device interrupts are turned into events, then the queue is
//! drained. Upper layer calls ([`Device`]) only stage work for the
//! dispatcher; the outcome of a send is reported through [`TxOutcome`] and
//! [`NetEvent`]s.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Deque;
use log::{trace, debug, warn, error};

use crate::{Device, Ts, MAX_FRAME_LEN, packet};
use crate::device::{RadioMode, Transceiver};
use crate::error::CoreError;
use crate::event::{Event, EventQueue, TimerId, Timers};
use crate::params::{PhyMode, TimingParams};
use crate::timer::Timer;

pub mod config;
pub use config::{Config, Notify};

mod channel_check;

mod strobe;
use strobe::Strobe;

mod rx;

#[cfg(test)]
mod sim;

/// Options readable / writable through [`Device::get`] and [`Device::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opt {
    /// Disable duty cycling (bool)
    NoSleep,
    /// Forward TX started events (bool)
    NotifyTxStart,
    /// Forward TX end events (bool)
    NotifyTxEnd,
    /// Forward RX started events (bool)
    NotifyRxStart,
    /// Forward RX complete events (bool)
    NotifyRxEnd,
    /// Channel check period in microseconds (u32)
    ChannelCheckPeriod,
    /// Burst listen window in microseconds (u32)
    BurstTimeout,
    /// Extra channel check delay in microseconds (u32)
    ReplyDelay,
    /// Radio channel (u16)
    Channel,
    /// Radio channel page (u16)
    ChannelPage,
    /// Lower device frame preloading, managed by the MAC
    Preloading,
    /// Lower device hardware CSMA, managed by the MAC
    Csma,
    /// Lower device hardware retransmissions, managed by the MAC
    Retransmissions,
}

/// Option values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OptValue {
    Bool(bool),
    U16(u16),
    U32(u32),
}

/// Strobe engine phase as seen by the rest of the MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxStatus {
    /// No send in progress
    Idle,
    /// Send in progress, waiting on the current attempt
    Started,
    /// Last attempt completed (and acknowledged for unicast)
    Complete,
    /// Last attempt could not access the channel
    MediumBusy,
    /// Last attempt was not acknowledged
    NoAck,
}

/// Final result of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxOutcome {
    /// Acknowledged (unicast) or strobed for the full window (broadcast)
    Complete,
    /// Strobe window elapsed without an acknowledgement
    NoAck,
    /// The channel never cleared before the strobe could start
    MediumBusy,
}

impl TxOutcome {
    pub fn result<E>(&self) -> Result<(), CoreError<E>> {
        match self {
            TxOutcome::Complete => Ok(()),
            TxOutcome::NoAck => Err(CoreError::NoAck),
            TxOutcome::MediumBusy => Err(CoreError::MediumBusy),
        }
    }
}

/// Notifications for the upper layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetEvent {
    RxStarted,
    RxComplete,
    TxStarted,
    TxComplete,
    TxNoAck,
    TxMediumBusy,
}

/// Maximum number of undelivered upper layer notifications
pub const NET_EVENT_QUEUE_LEN: usize = 8;

/// Link layer statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MacStats {
    pub tx_unicast: u32,
    pub tx_multicast: u32,
    pub tx_success: u32,
    pub tx_failed: u32,
    /// Physical transmissions including strobe repeats
    pub strobe_tx: u32,
    pub channel_checks: u32,
    pub energy_detected: u32,
    pub fast_sleeps: u32,
    pub bursts: u32,
}

/// Duty cycling state flags
#[derive(Debug, Clone, PartialEq)]
pub struct MacState {
    /// Silence seen since the last energy detection
    pub seen_silence: bool,
    /// A reception has started and not yet been collected
    pub rx_in_progress: bool,
    /// The timeout timer has fired and not yet been handled
    pub timeout_flag: bool,
    pub tx_status: TxStatus,
    pub no_sleep: bool,
}

impl MacState {
    fn new(no_sleep: bool) -> Self {
        Self {
            seen_silence: false,
            rx_in_progress: false,
            timeout_flag: false,
            tx_status: TxStatus::Idle,
            no_sleep,
        }
    }
}

/// ContikiMAC duty cycling MAC over a transceiver (D) and clock (T)
pub struct ContikiMac<D, T> {
    device: D,
    timer: T,
    config: Config,

    phy: PhyMode,
    params: TimingParams,

    state: MacState,
    events: EventQueue,
    timers: Timers,

    strobe: Strobe,
    outcome: Option<TxOutcome>,

    net_events: Deque<NetEvent, NET_EVENT_QUEUE_LEN>,
    stats: MacStats,
}

impl <D, T> ContikiMac<D, T>
where
    D: Transceiver,
    T: Timer,
{
    /// Create a new MAC, call [`Device::init`] to start duty cycling
    pub fn new(device: D, timer: T, config: Config) -> Self {
        let phy = PhyMode::Oqpsk250;
        let params = config.timing.unwrap_or(*phy.params());

        Self {
            device,
            timer,
            state: MacState::new(config.no_sleep),
            config,
            phy,
            params,
            events: EventQueue::new(),
            timers: Timers::new(),
            strobe: Strobe::default(),
            outcome: None,
            net_events: Deque::new(),
            stats: MacStats::default(),
        }
    }

    /// Run one dispatcher step.
    ///
    /// Expires due timers, polls the device for pending interrupts, then
    /// handles every queued event in post order.
    pub fn tick(&mut self) {
        let now = self.timer.ticks_us();

        for id in self.timers.expire(now) {
            self.on_timer(id);
        }

        if self.device.irq_pending() {
            self.events.post(Event::Isr);
        }

        self.dispatch_all();
    }

    /// Timer expiry, only posts (and flags timeouts)
    fn on_timer(&mut self, id: TimerId) {
        if id == TimerId::Timeout {
            self.state.timeout_flag = true;
        }
        self.events.post(id.event());
    }

    /// Handle queued events until the queue is empty
    pub fn dispatch_all(&mut self) {
        while let Some(ev) = self.events.pop() {
            trace!("Event: {:?}", ev);

            match ev {
                Event::ChannelCheck => self.ev_channel_check(),
                Event::ExtraChannelCheck => self.channel_check(),
                Event::Periodic if self.tx_active() => self.strobe_periodic(),
                Event::Periodic => self.periodic_tick(),
                Event::Isr => self.service_device(),
            }
        }
    }

    /// Earliest armed timer deadline, the host may sleep until then
    /// (or until the next device interrupt)
    pub fn next_deadline(&self) -> Option<Ts> {
        match self.events.is_empty() {
            true => self.timers.next_deadline(),
            false => Some(self.timer.ticks_us()),
        }
    }

    /// Fetch the next upper layer notification
    pub fn take_event(&mut self) -> Option<NetEvent> {
        self.net_events.pop_front()
    }

    /// Fetch the outcome of the last completed send
    pub fn take_outcome(&mut self) -> Option<TxOutcome> {
        self.outcome.take()
    }

    pub fn tx_status(&self) -> TxStatus {
        self.state.tx_status
    }

    pub fn state(&self) -> &MacState {
        &self.state
    }

    pub fn params(&self) -> &TimingParams {
        &self.params
    }

    pub fn phy(&self) -> PhyMode {
        self.phy
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Deadline of a MAC timer
    pub fn deadline(&self, id: TimerId) -> Option<Ts> {
        self.timers.deadline(id)
    }

    /// Release the transceiver and clock
    pub fn free(self) -> (D, T) {
        (self.device, self.timer)
    }

    fn tx_active(&self) -> bool {
        self.state.tx_status != TxStatus::Idle
    }

    fn arm(&mut self, id: TimerId, delay_us: u32) {
        let now = self.timer.ticks_us();
        self.timers.arm(id, now, delay_us);
    }

    fn notify(&mut self, ev: NetEvent) {
        let enabled = match ev {
            NetEvent::RxStarted => Notify::RX_START,
            NetEvent::RxComplete => Notify::RX_END,
            NetEvent::TxStarted => Notify::TX_START,
            NetEvent::TxComplete | NetEvent::TxNoAck | NetEvent::TxMediumBusy => Notify::TX_END,
        };
        if !self.config.notify.contains(enabled) {
            return;
        }

        if self.net_events.is_full() {
            warn!("Dropping undelivered event");
            let _ = self.net_events.pop_front();
        }
        let _ = self.net_events.push_back(ev);
    }

    /// Set the radio mode, logging failures
    fn set_radio(&mut self, mode: RadioMode) -> Result<(), CoreError<D::Error>> {
        self.device.set_mode(mode).map_err(|e| {
            debug!("Failed setting radio mode {:?}: {:?}", mode, e);
            CoreError::Radio(e)
        })
    }

    /// Select timing parameters for the current channel and page
    fn select_params(&mut self) {
        let phy = match self.device.channel() {
            Ok(channel) => {
                let page = match self.device.channel_page() {
                    Ok(p) => p,
                    Err(_e) => 0,
                };

                match PhyMode::select(channel, page) {
                    Some(p) => p,
                    None => {
                        error!("No timings for channel {} page {}, falling back to {}", channel, page, PhyMode::Oqpsk250);
                        PhyMode::Oqpsk250
                    }
                }
            }
            Err(e) => {
                error!("Error reading channel ({:?}), falling back to {}", e, PhyMode::Oqpsk250);
                PhyMode::Oqpsk250
            }
        };

        self.phy = phy;
        self.params = match self.config.timing {
            Some(t) => t,
            None => *phy.params(),
        };

        if let Err(v) = self.params.check(phy) {
            warn!("Timing parameters violate {:?} for {}", v, phy);
        }

        debug!("Using timings for {}", phy);
    }

    /// Configure the lower device for duty cycling
    fn configure_lower(&mut self) {
        use crate::device::DeviceEvents;

        if let Err(e) = self.device.set_csma(false) {
            debug!("Disabling CSMA failed: {:?}", e);
        }
        if let Err(e) = self.device.set_retransmissions(0) {
            debug!("Disabling retransmissions failed: {:?}", e);
        }
        let irqs = DeviceEvents::RX_STARTED | DeviceEvents::RX_COMPLETE | DeviceEvents::TX_END;
        if let Err(e) = self.device.enable_irqs(irqs) {
            debug!("Enabling interrupts failed: {:?}", e);
        }
        if let Err(e) = self.device.set_preloading(true) {
            error!("Preloading is required, this node will likely not be able to communicate ({:?})", e);
        }
    }

    /// Set a boolean option value
    fn opt_bool(opt: Opt, value: OptValue) -> Result<bool, CoreError<D::Error>> {
        match value {
            OptValue::Bool(b) => Ok(b),
            _ => Err(CoreError::InvalidValue(opt)),
        }
    }

    fn opt_u32(opt: Opt, value: OptValue) -> Result<u32, CoreError<D::Error>> {
        match value {
            OptValue::U32(v) => Ok(v),
            _ => Err(CoreError::InvalidValue(opt)),
        }
    }

    fn opt_u16(opt: Opt, value: OptValue) -> Result<u16, CoreError<D::Error>> {
        match value {
            OptValue::U16(v) => Ok(v),
            _ => Err(CoreError::InvalidValue(opt)),
        }
    }

    fn set_notify(&mut self, flag: Notify, enabled: bool) {
        self.config.notify.set(flag, enabled);
    }

    fn set_no_sleep(&mut self, enabled: bool) {
        debug!("No sleep: {}", enabled);

        self.state.no_sleep = enabled;
        self.config.no_sleep = enabled;

        // Applied once the strobe finishes
        if self.tx_active() {
            return;
        }

        // Reset duty cycling state
        self.cancel_timers();
        self.state.rx_in_progress = false;
        self.state.seen_silence = false;

        if enabled {
            let _ = self.set_radio(RadioMode::Listen);
        } else {
            self.events.post(Event::ChannelCheck);
        }
    }
}

impl <D, T> Device for ContikiMac<D, T>
where
    D: Transceiver,
    T: Timer,
{
    type Error = CoreError<D::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.state = MacState::new(self.config.no_sleep);
        self.events = EventQueue::new();
        self.timers = Timers::new();
        self.strobe = Strobe::default();

        self.device.init().map_err(CoreError::Radio)?;

        self.configure_lower();
        self.select_params();

        // Start the cadence
        match self.state.no_sleep {
            true => self.set_radio(RadioMode::Listen)?,
            false => { self.events.post(Event::ChannelCheck); },
        }

        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        if self.tx_active() {
            error!("Double TX");
            return Err(CoreError::TransmitPending);
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(CoreError::InvalidLength(frame.len()));
        }

        // Incoming frames would corrupt the buffer on single buffered devices
        let _ = self.set_radio(RadioMode::Standby);

        let broadcast = packet::is_broadcast(frame);

        if let Err(e) = self.device.preload(frame) {
            error!("Preload failed: {:?}", e);
            return Err(CoreError::Radio(e));
        }

        self.notify(NetEvent::TxStarted);
        self.start_strobe(broadcast);

        Ok(())
    }

    fn recv(&mut self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        self.receive(buff)
    }

    fn get(&mut self, opt: Opt) -> Result<OptValue, Self::Error> {
        let v = match opt {
            Opt::NoSleep => OptValue::Bool(self.state.no_sleep),
            Opt::NotifyTxStart => OptValue::Bool(self.config.notify.contains(Notify::TX_START)),
            Opt::NotifyTxEnd => OptValue::Bool(self.config.notify.contains(Notify::TX_END)),
            Opt::NotifyRxStart => OptValue::Bool(self.config.notify.contains(Notify::RX_START)),
            Opt::NotifyRxEnd => OptValue::Bool(self.config.notify.contains(Notify::RX_END)),
            Opt::ChannelCheckPeriod => OptValue::U32(self.config.channel_check_period),
            Opt::BurstTimeout => OptValue::U32(self.config.burst_timeout),
            Opt::ReplyDelay => OptValue::U32(self.config.reply_delay),
            Opt::Channel => OptValue::U16(self.device.channel().map_err(CoreError::Radio)?),
            Opt::ChannelPage => OptValue::U16(self.device.channel_page().map_err(CoreError::Radio)?),
            Opt::Preloading | Opt::Csma | Opt::Retransmissions => {
                return Err(CoreError::UnsupportedOption(opt));
            }
        };

        Ok(v)
    }

    fn set(&mut self, opt: Opt, value: OptValue) -> Result<(), Self::Error> {
        match opt {
            Opt::NotifyTxStart => self.set_notify(Notify::TX_START, Self::opt_bool(opt, value)?),
            Opt::NotifyTxEnd => self.set_notify(Notify::TX_END, Self::opt_bool(opt, value)?),
            Opt::NotifyRxStart => self.set_notify(Notify::RX_START, Self::opt_bool(opt, value)?),
            Opt::NotifyRxEnd => self.set_notify(Notify::RX_END, Self::opt_bool(opt, value)?),

            // Managed by the MAC
            Opt::Preloading | Opt::Csma | Opt::Retransmissions => {
                return Err(CoreError::InvalidOption(opt));
            }

            Opt::NoSleep => {
                let enabled = Self::opt_bool(opt, value)?;
                self.set_no_sleep(enabled);
            }

            // Applied from the next time each timer is armed
            Opt::ChannelCheckPeriod => self.config.channel_check_period = Self::opt_u32(opt, value)?,
            Opt::BurstTimeout => self.config.burst_timeout = Self::opt_u32(opt, value)?,
            Opt::ReplyDelay => self.config.reply_delay = Self::opt_u32(opt, value)?,

            Opt::Channel => {
                let channel = Self::opt_u16(opt, value)?;
                self.device.set_channel(channel).map_err(CoreError::Radio)?;
                self.select_params();
            }
            Opt::ChannelPage => {
                let page = Self::opt_u16(opt, value)?;
                self.device.set_channel_page(page).map_err(CoreError::Radio)?;
                self.select_params();
            }
        }

        Ok(())
    }

    fn isr(&mut self) {
        self.events.post(Event::Isr);
    }
}

#[cfg(test)]
mod test {
    use crate::device::mock::SimError;
    use crate::params::{BPSK20, OQPSK250};

    use super::*;
    use super::sim::*;

    #[test]
    fn init_configures_lower() {
        let (_timer, dev, mac) = setup(Config::default());

        assert_eq!(dev.csma(), false);
        assert_eq!(dev.retransmissions(), 0);
        assert_eq!(dev.preloading(), true);
        assert!(dev.irqs().contains(crate::device::DeviceEvents::TX_END));

        assert_eq!(mac.phy(), PhyMode::Oqpsk250);
        assert_eq!(mac.params(), &OQPSK250);
    }

    #[test]
    fn options() {
        let (_timer, _dev, mut mac) = setup(Config::default());

        assert_eq!(mac.get(Opt::ChannelCheckPeriod), Ok(OptValue::U32(125_000)));
        assert_eq!(mac.get(Opt::BurstTimeout), Ok(OptValue::U32(15_625)));
        assert_eq!(mac.get(Opt::ReplyDelay), Ok(OptValue::U32(8_192)));
        assert_eq!(mac.get(Opt::NoSleep), Ok(OptValue::Bool(false)));

        mac.set(Opt::ReplyDelay, OptValue::U32(4_000)).unwrap();
        assert_eq!(mac.get(Opt::ReplyDelay), Ok(OptValue::U32(4_000)));

        mac.set(Opt::NotifyTxStart, OptValue::Bool(true)).unwrap();
        assert_eq!(mac.get(Opt::NotifyTxStart), Ok(OptValue::Bool(true)));

        assert_eq!(mac.set(Opt::Preloading, OptValue::Bool(false)), Err(CoreError::InvalidOption(Opt::Preloading)));
        assert_eq!(mac.set(Opt::Csma, OptValue::Bool(true)), Err(CoreError::InvalidOption(Opt::Csma)));
        assert_eq!(mac.set(Opt::NoSleep, OptValue::U32(1)), Err(CoreError::InvalidValue(Opt::NoSleep)));
        assert_eq!(mac.get(Opt::Retransmissions), Err(CoreError::UnsupportedOption(Opt::Retransmissions)));
    }

    #[test]
    fn channel_change_selects_params() {
        let (_timer, _dev, mut mac) = setup(Config::default());

        mac.set(Opt::Channel, OptValue::U16(0)).unwrap();
        assert_eq!(mac.get(Opt::Channel), Ok(OptValue::U16(0)));
        assert_eq!(mac.phy(), PhyMode::Bpsk20);
        assert_eq!(mac.params(), &BPSK20);

        mac.set(Opt::ChannelPage, OptValue::U16(2)).unwrap();
        assert_eq!(mac.phy(), PhyMode::Oqpsk100);

        // No timings for this combination
        mac.set(Opt::Channel, OptValue::U16(20)).unwrap();
        assert_eq!(mac.phy(), PhyMode::Oqpsk250);
    }

    #[test]
    fn timing_override() {
        let timing = TimingParams { cca_count_max: 2, ..OQPSK250 };
        let (timer, dev, mut mac) = setup_with(Config { timing: Some(timing), ..Default::default() }, |_d| ());

        assert_eq!(mac.params().cca_count_max, 2);

        run_until(&mut mac, &dev, &timer, 1);
        assert_eq!(dev.cca_count(), 2);
    }

    #[test]
    fn init_failure_propagates() {
        let timer = crate::timer::mock::MockTimer::new();
        let dev = crate::device::mock::MockTransceiver::new(timer.clone());
        dev.set_fail(true);

        let mut mac = ContikiMac::new(dev.clone(), timer.clone(), Config::default());
        assert_eq!(mac.init(), Err(CoreError::Radio(SimError)));
    }

    #[test]
    fn double_send_rejected() {
        let (_timer, _dev, mut mac) = setup(Config::default());

        mac.send(&UNICAST).unwrap();
        assert_eq!(mac.send(&UNICAST), Err(CoreError::TransmitPending));
    }

    #[test]
    fn isr_is_deferred() {
        let (_timer, dev, mut mac) = setup(Config::default());

        dev.start_rx();
        mac.isr();

        // Nothing happens until dispatch
        assert_eq!(mac.state().rx_in_progress, false);
        mac.dispatch_all();
        assert_eq!(mac.state().rx_in_progress, true);
    }

    #[test]
    fn outcome_results() {
        assert_eq!(TxOutcome::Complete.result::<SimError>(), Ok(()));
        assert_eq!(TxOutcome::NoAck.result::<SimError>(), Err(CoreError::NoAck));
        assert_eq!(TxOutcome::MediumBusy.result::<SimError>(), Err(CoreError::MediumBusy));
    }
}
