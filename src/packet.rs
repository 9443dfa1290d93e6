//! IEEE 802.15.4 frame helpers
//!
//! The MAC only inspects the few header fields it needs to drive duty
//! cycling: the destination (broadcast or unicast), the frame pending bit
//! and the sequence number for Ack matching.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use ieee802154::mac::{Address, ExtendedAddress, FrameType, Header, PanId, ShortAddress};
use log::debug;

/// Frame control: frame pending bit (first octet)
pub const FCF_FRAME_PENDING: u8 = 0x10;

/// Frame control: Ack request bit (first octet)
pub const FCF_ACK_REQUEST: u8 = 0x20;

/// Frame control: frame type mask (first octet)
pub const FCF_TYPE_MASK: u8 = 0x07;

/// Length of an Ack frame without FCS
pub const ACK_FRAME_LEN: usize = 3;

/// Decode the MAC header of a frame, ignoring malformed input
pub fn header(frame: &[u8]) -> Option<Header> {
    match Header::decode(frame) {
        Ok((h, _n)) => Some(h),
        Err(e) => {
            debug!("Header decode failed: {:?}", e);
            None
        }
    }
}

/// Check whether a frame is addressed to the broadcast short address.
///
/// Frames that cannot be decoded are treated as unicast.
pub fn is_broadcast(frame: &[u8]) -> bool {
    match header(frame).map(|h| h.destination) {
        Some(Address::Short(_pan, s)) => s == ShortAddress::broadcast(),
        _ => false,
    }
}

/// Read the frame pending bit
pub fn frame_pending(frame: &[u8]) -> bool {
    frame.first().map(|b| b & FCF_FRAME_PENDING != 0).unwrap_or(false)
}

/// Read the Ack request bit
pub fn ack_request(frame: &[u8]) -> bool {
    frame.first().map(|b| b & FCF_ACK_REQUEST != 0).unwrap_or(false)
}

/// Read the sequence number
pub fn seq(frame: &[u8]) -> Option<u8> {
    frame.get(2).copied()
}

/// Check whether a frame is an Ack for the provided sequence number
pub fn is_ack_for(frame: &[u8], seq: u8) -> bool {
    frame.len() >= ACK_FRAME_LEN
        && frame[0] & FCF_TYPE_MASK == FrameType::Acknowledgement as u8
        && frame[2] == seq
}

/// Build an (immediate) Ack frame, optionally with frame pending set
pub fn ack_frame(seq: u8, pending: bool) -> [u8; ACK_FRAME_LEN] {
    let mut fcf = FrameType::Acknowledgement as u8;
    if pending {
        fcf |= FCF_FRAME_PENDING;
    }
    [fcf, 0x00, seq]
}

/// Local addressing used for frame filtering and Ack generation
#[derive(Debug, Clone, PartialEq)]
pub struct AddressConfig {
    pub pan_id: PanId,

    pub short_address: Option<ShortAddress>,

    pub extended_address: Option<ExtendedAddress>,
}

impl AddressConfig {
    pub fn new(pan_id: u16, extended_address: u64) -> Self {
        Self {
            pan_id: PanId(pan_id),
            short_address: None,
            extended_address: Some(ExtendedAddress(extended_address)),
        }
    }

    pub fn with_short(mut self, short_address: u16) -> Self {
        self.short_address = Some(ShortAddress(short_address));
        self
    }

    /// Preferred local address (short if assigned)
    pub fn get(&self) -> Address {
        if let Some(s) = self.short_address {
            return Address::Short(self.pan_id, s);
        }
        if let Some(e) = self.extended_address {
            return Address::Extended(self.pan_id, e);
        }

        Address::None
    }

    /// Check whether a destination address matches this node
    pub fn accepts(&self, a: &Address) -> bool {
        // Check PAN IDs
        if let Some(p) = a.pan_id() {
            if (p != PanId::broadcast()) && (p != self.pan_id) {
                debug!("PAN ID mismatch");
                return false;
            }
        }

        match (a, &self.extended_address, &self.short_address) {
            (Address::Short(_p, s), _extended, Some(short)) => {
                if (s != short) && (s != &ShortAddress::broadcast()) {
                    debug!("Short address mismatch");
                    return false;
                }
            }
            (Address::Short(_p, s), _extended, None) => {
                if s != &ShortAddress::broadcast() {
                    debug!("No short address assigned");
                    return false;
                }
            }
            (Address::Extended(_p, e), Some(extended), _short) => {
                if (e != extended) && (e != &ExtendedAddress::broadcast()) {
                    debug!("Extended address mismatch");
                    return false;
                }
            }
            _ => (),
        }

        true
    }
}
