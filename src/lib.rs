//! Radio duty cycling for low power wireless nodes.
//!
//! Implements a ContikiMAC style duty cycling MAC over an abstract
//! [`device::Transceiver`]. The radio sleeps most of the time, waking every
//! channel check period to sample the channel with a short burst of CCA checks.
//! Senders strobe (repeatedly transmit) each frame for a full wake-up
//! interval so that a sleeping receiver observes at least one copy.
//!
//! All protocol logic runs from a single cooperative dispatch loop
//! ([`mac::ContikiMac::tick`]); timer expiries and device interrupts are
//! reduced to events posted on a FIFO queue drained by that loop.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

#![no_std]

use core::fmt::Debug;

use radio::{State, Busy, Transmit, Receive, Rssi, ReceiveInfo};

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod event;

pub mod params;

pub mod packet;

pub mod device;

pub mod mac;

pub mod error;

pub mod prelude;

use mac::{Opt, OptValue};

/// Timestamps are 64-bit ticks (see [`timer::Timer`] for units)
pub type Ts = u64;

/// Maximum 802.15.4 PSDU length
pub const MAX_FRAME_LEN: usize = 127;

/// Statically sized packet buffer
#[derive(Clone, Debug, PartialEq)]
pub struct RawPacket {
    data: [u8; 256],
    len: usize,
    rssi: i16,
}

impl Default for RawPacket {
    fn default() -> Self {
        Self {
            data: [0u8; 256],
            len: 0,
            rssi: 0,
        }
    }
}

impl RawPacket {
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy a frame into the buffer, truncating to the buffer size
    pub fn set(&mut self, data: &[u8], rssi: i16) -> usize {
        let n = data.len().min(self.data.len());
        self.data[..n].copy_from_slice(&data[..n]);
        self.len = n;
        self.rssi = rssi;
        n
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.rssi = 0;
    }
}

/// Radio interface combines `radio` traits
pub trait Radio<S: radio::RadioState, I: radio::ReceiveInfo, E: Debug>: radio::State<State=S, Error=E> + radio::Busy<Error=E> + radio::Transmit<Error=E> + radio::Receive<Info=I, Error=E> + radio::Rssi<Error=E> {}

/// Default Radio impl for radio devices
impl <T, S: radio::RadioState, I: ReceiveInfo, E: Debug> Radio<S, I, E> for T where
    T: State<State=S, Error=E> + Busy<Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
{}

/// Link layer device contract exposed to the network stack above the MAC
pub trait Device {
    type Error;

    /// Bring up the device and start duty cycling
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Transmit a complete 802.15.4 MAC frame (without FCS)
    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Fetch a received frame, returning its length
    fn recv(&mut self, buff: &mut [u8]) -> Result<usize, Self::Error>;

    /// Read a device option
    fn get(&mut self, opt: Opt) -> Result<OptValue, Self::Error>;

    /// Write a device option
    fn set(&mut self, opt: Opt, value: OptValue) -> Result<(), Self::Error>;

    /// Signal a device interrupt, servicing is deferred to the dispatch loop
    fn isr(&mut self);
}
