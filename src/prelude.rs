//! LPWAN RDC crate prelude
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use crate::{Device, Radio, RawPacket, Ts};

pub use crate::mac::{ContikiMac, Config as MacConfig, Notify, Opt, OptValue, TxStatus, TxOutcome, NetEvent, MacStats};

pub use crate::device::{Transceiver, RadioMode, DeviceEvents};
pub use crate::device::radio_hal::{RadioHal, HalConfig};

pub use crate::error::CoreError;
pub use crate::timer::{Timer as MacTimer};

pub use crate::params::{PhyMode, TimingParams};

pub use crate::packet::AddressConfig;

pub use ieee802154::mac::{Address as MacAddress, PanId, AddressMode, ShortAddress, ExtendedAddress};
