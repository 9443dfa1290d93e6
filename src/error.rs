//! MAC error types
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::mac::Opt;

/// Duty cycling MAC errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Wrapper for unhandled / underlying radio errors
    Radio(E),

    /// A transmission (strobe) is already in progress
    TransmitPending,

    /// Strobe window elapsed without an acknowledgement
    NoAck,

    /// Channel never cleared before the strobe could start
    MediumBusy,

    /// Option may not be changed from the upper layer
    InvalidOption(Opt),

    /// Option not supported by the MAC or device
    UnsupportedOption(Opt),

    /// Value type does not match the option
    InvalidValue(Opt),

    /// Frame exceeds the maximum PSDU length
    InvalidLength(usize),
}
