//! Lower transceiver capability set
//!
//! The MAC is written once against [`Transceiver`], which covers the radio
//! operations duty cycling needs: state transitions, instantaneous CCA, frame
//! preloading with repeated transmit triggers, disabling hardware retries and
//! CSMA, interrupt selection and channel / page queries.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use bitflags::bitflags;

pub mod radio_hal;
pub use radio_hal::{RadioHal, HalConfig};

#[cfg(any(test, feature="mocks"))]
pub mod mock;

/// Radio power / operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    /// Lowest power, no reception possible
    Sleep,
    /// Awake but not receiving (CCA possible)
    Standby,
    /// Receive ready
    Listen,
    /// Transmit the preloaded frame
    Transmit,
    /// Reset the transceiver
    Reset,
}

bitflags! {
    /// Events raised by the transceiver interrupt service routine
    #[derive(Default)]
    pub struct DeviceEvents: u8 {
        /// Start of frame detected
        const RX_STARTED     = 1 << 0;
        /// Frame received and available through `recv`
        const RX_COMPLETE    = 1 << 1;
        /// Transmission done (and acknowledged, when an Ack was requested)
        const TX_COMPLETE    = 1 << 2;
        /// Transmission done but no Ack received
        const TX_NOACK       = 1 << 3;
        /// Transmission not started, channel busy
        const TX_MEDIUM_BUSY = 1 << 4;

        /// Any transmission outcome
        const TX_END = Self::TX_COMPLETE.bits | Self::TX_NOACK.bits | Self::TX_MEDIUM_BUSY.bits;
    }
}

/// Capability set required from the underlying transceiver.
///
/// Transmitting a preloaded frame must be repeatable without re-staging,
/// and exactly one completion event must be raised per `Transmit` request.
pub trait Transceiver {
    type Error: Debug;

    /// Initialise the transceiver
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Switch operating mode (`Transmit` triggers the preloaded frame)
    fn set_mode(&mut self, mode: RadioMode) -> Result<(), Self::Error>;

    /// Instantaneous clear channel assessment
    fn is_channel_clear(&mut self) -> Result<bool, Self::Error>;

    /// Stage a frame for subsequent `Transmit` requests
    fn preload(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Fetch the last received frame, returning its length.
    ///
    /// An empty buffer returns the pending frame length without consuming it.
    fn recv(&mut self, buff: &mut [u8]) -> Result<usize, Self::Error>;

    /// Enable or disable hardware CSMA
    fn set_csma(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Set the number of hardware retransmissions
    fn set_retransmissions(&mut self, retries: u8) -> Result<(), Self::Error>;

    /// Enable or disable frame preloading
    fn set_preloading(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Select events reported by `isr`
    fn enable_irqs(&mut self, irqs: DeviceEvents) -> Result<(), Self::Error>;

    fn channel(&mut self) -> Result<u16, Self::Error>;

    fn channel_page(&mut self) -> Result<u16, Self::Error>;

    fn set_channel(&mut self, channel: u16) -> Result<(), Self::Error>;

    fn set_channel_page(&mut self, page: u16) -> Result<(), Self::Error>;

    /// Devices without an interrupt line report whether they need servicing
    fn irq_pending(&mut self) -> bool {
        false
    }

    /// Service the device, returning the (enabled) events raised
    fn isr(&mut self) -> Result<DeviceEvents, Self::Error>;
}
