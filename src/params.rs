//! Duty cycling timing parameters
//!
//! Each supported PHY mode has a parameter row derived from its symbol and
//! byte times. All times are in microseconds.
//!
//! With `T_a` the turnaround time before an Ack, `T_d` the Ack reception time,
//! `T_i` the inter packet interval, `T_c` the CCA cycle period, `n_c` the CCA
//! count, `T_r` the CCA duration, `T_s` the shortest frame duration and `T_l`
//! the longest frame duration, reliable operation requires:
//!
//! - `T_a + T_d < T_i` (the Ack arrives before the next strobe)
//! - `T_i < (n_c - 1) * T_c + n_c * T_r` (a strobe gap cannot hide between CCAs)
//! - `T_c + 2 * T_r < T_s` (a frame cannot fall between two CCAs)
//! - `after_ed_scan_timeout >= T_l` and `listen_timeout > T_i` (fast sleep)
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use strum::{Display, EnumIter};

/// Number of CCA checks per wake-up.
///
/// Empirically 4 catches noticeably more strobes than the theoretical 3.
pub const CCA_COUNT_MAX: u8 = 4;

/// RX-TX turnaround in symbols (aTurnaroundTime)
pub const TURNAROUND_SYMBOLS: u32 = 12;

/// CCA duration in symbols (aCcaTime)
pub const CCA_SYMBOLS: u32 = 8;

/// Preamble and start of frame delimiter length in bytes
pub const SHR_LEN: u32 = 5;

/// PHY header length in bytes
pub const PHR_LEN: u32 = 1;

/// Acknowledgement frame length in bytes
pub const ACK_LEN: u32 = 5;

/// Maximum PSDU length in bytes
pub const MAX_PSDU_LEN: u32 = 127;

/// 802.15.4 PHY modes with a timing parameter row
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyMode {
    /// 2.4 GHz (and 915 MHz page 2) O-QPSK, 250 kbit/s
    #[strum(serialize = "O-QPSK 250 kbit/s")]
    Oqpsk250,
    /// 868 MHz O-QPSK, 100 kbit/s
    #[strum(serialize = "O-QPSK 100 kbit/s")]
    Oqpsk100,
    /// 915 MHz BPSK, 40 kbit/s
    #[strum(serialize = "BPSK 40 kbit/s")]
    Bpsk40,
    /// 868 MHz BPSK, 20 kbit/s
    #[strum(serialize = "BPSK 20 kbit/s")]
    Bpsk20,
}

/// Lowest sub-GHz channel (868 MHz band)
pub const CHANNEL_MIN_SUBGHZ: u16 = 0;
/// Highest sub-GHz channel (915 MHz band)
pub const CHANNEL_MAX_SUBGHZ: u16 = 10;
/// Lowest 2.4 GHz channel
pub const CHANNEL_MIN: u16 = 11;
/// Highest 2.4 GHz channel
pub const CHANNEL_MAX: u16 = 26;

impl PhyMode {
    /// Symbol period in microseconds
    pub const fn symbol_us(&self) -> u32 {
        match self {
            PhyMode::Oqpsk250 => 16,
            PhyMode::Oqpsk100 => 40,
            PhyMode::Bpsk40 => 25,
            PhyMode::Bpsk20 => 50,
        }
    }

    /// Time to transmit one byte in microseconds
    pub const fn byte_us(&self) -> u32 {
        match self {
            // 4 bits per symbol
            PhyMode::Oqpsk250 | PhyMode::Oqpsk100 => self.symbol_us() * 2,
            // 1 bit per symbol
            PhyMode::Bpsk40 | PhyMode::Bpsk20 => self.symbol_us() * 8,
        }
    }

    /// End of reception to Ack transmission (`T_a`)
    pub const fn turnaround_us(&self) -> u32 {
        TURNAROUND_SYMBOLS * self.symbol_us()
    }

    /// Time for a single CCA (`T_r`)
    pub const fn cca_us(&self) -> u32 {
        CCA_SYMBOLS * self.symbol_us()
    }

    /// Time to receive an Ack frame (`T_d`)
    pub const fn ack_rx_us(&self) -> u32 {
        (SHR_LEN + PHR_LEN + ACK_LEN) * self.byte_us()
    }

    /// Time to transmit the longest possible frame (`T_l`)
    pub const fn longest_frame_us(&self) -> u32 {
        (SHR_LEN + PHR_LEN + MAX_PSDU_LEN) * self.byte_us()
    }

    /// Select the PHY mode for a channel / channel page combination
    pub fn select(channel: u16, page: u16) -> Option<Self> {
        match (page, channel) {
            (0, CHANNEL_MIN_SUBGHZ) => Some(PhyMode::Bpsk20),
            (0, c) if c > CHANNEL_MIN_SUBGHZ && c <= CHANNEL_MAX_SUBGHZ => Some(PhyMode::Bpsk40),
            (0, c) if c >= CHANNEL_MIN && c <= CHANNEL_MAX => Some(PhyMode::Oqpsk250),
            (2, CHANNEL_MIN_SUBGHZ) => Some(PhyMode::Oqpsk100),
            (2, c) if c > CHANNEL_MIN_SUBGHZ && c <= CHANNEL_MAX_SUBGHZ => Some(PhyMode::Oqpsk250),
            _ => None,
        }
    }

    /// Default timing parameters for this mode
    pub fn params(&self) -> &'static TimingParams {
        match self {
            PhyMode::Oqpsk250 => &OQPSK250,
            PhyMode::Oqpsk100 => &OQPSK100,
            PhyMode::Bpsk40 => &BPSK40,
            PhyMode::Bpsk20 => &BPSK20,
        }
    }
}

/// Timing parameters for one PHY mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingParams {
    /// Time between successive CCA checks during a wake-up (`T_c`)
    pub cca_cycle_period: u32,
    /// Interval between strobe transmissions (`T_i`), counted from TX done.
    /// Must leave room for an Ack to arrive.
    pub inter_packet_interval: u32,
    /// Maximum time to look for silence after detecting energy.
    /// Must be at least the longest frame duration.
    pub after_ed_scan_timeout: u32,
    /// Interval between CCA checks while looking for silence (< `T_i`)
    pub after_ed_scan_interval: u32,
    /// Time to listen after silence before going back to sleep
    pub listen_timeout: u32,
    /// Time allowed for a frame reception once started (`T_l`)
    pub rx_timeout: u32,
    /// Maximum number of CCA checks per wake-up (`n_c`)
    pub cca_count_max: u8,
}

/// Timing constraint violated by a parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamViolation {
    /// Ack would arrive after the next strobe starts
    AckWindow,
    /// Strobe gap could fall between two CCA checks
    CcaCadence,
    /// Silence scan could time out before the longest frame ends
    ScanTimeout,
    /// Silence scan interval too coarse to catch a strobe gap
    ScanInterval,
    /// Listen window shorter than a strobe gap
    ListenTimeout,
    /// No CCA checks configured
    CcaCount,
}

impl TimingParams {
    /// Derive a parameter row from PHY timing
    pub const fn derive(phy: PhyMode) -> Self {
        let inter_packet_interval = 2 * (phy.turnaround_us() + phy.ack_rx_us());

        Self {
            cca_cycle_period: inter_packet_interval / 2,
            inter_packet_interval,
            after_ed_scan_timeout: phy.longest_frame_us() + inter_packet_interval,
            after_ed_scan_interval: inter_packet_interval / 3,
            listen_timeout: 2 * inter_packet_interval,
            rx_timeout: phy.longest_frame_us(),
            cca_count_max: CCA_COUNT_MAX,
        }
    }

    /// Check the parameter set against the timing constraints for a PHY.
    ///
    /// Violations are not fatal, the MAC will run but may miss frames.
    pub fn check(&self, phy: PhyMode) -> Result<(), ParamViolation> {
        let n_c = self.cca_count_max as u32;
        let t_i = self.inter_packet_interval;

        if n_c == 0 {
            return Err(ParamViolation::CcaCount);
        }
        if phy.turnaround_us() + phy.ack_rx_us() >= t_i {
            return Err(ParamViolation::AckWindow);
        }
        if t_i >= (n_c - 1) * self.cca_cycle_period + n_c * phy.cca_us() {
            return Err(ParamViolation::CcaCadence);
        }
        if self.after_ed_scan_timeout < phy.longest_frame_us() {
            return Err(ParamViolation::ScanTimeout);
        }
        if self.after_ed_scan_interval >= t_i {
            return Err(ParamViolation::ScanInterval);
        }
        if self.listen_timeout <= t_i {
            return Err(ParamViolation::ListenTimeout);
        }

        Ok(())
    }

    /// Shortest PSDU (in bytes) that cannot fall between two CCA checks.
    ///
    /// Shorter frames need padding to be reliably detected.
    pub fn shortest_frame_len(&self, phy: PhyMode) -> u32 {
        let t_s = self.cca_cycle_period + 2 * phy.cca_us();
        let on_air = (t_s + phy.byte_us()) / phy.byte_us();

        on_air.saturating_sub(SHR_LEN + PHR_LEN)
    }

    /// Strobe duration for a channel check period
    pub fn strobe_timeout(&self, channel_check_period: u32) -> u32 {
        channel_check_period + 2 * self.cca_cycle_period
    }
}

/// Timings for O-QPSK 250 kbit/s
pub static OQPSK250: TimingParams = TimingParams::derive(PhyMode::Oqpsk250);

/// Timings for O-QPSK 100 kbit/s
pub static OQPSK100: TimingParams = TimingParams::derive(PhyMode::Oqpsk100);

/// Timings for BPSK 40 kbit/s
pub static BPSK40: TimingParams = TimingParams::derive(PhyMode::Bpsk40);

/// Timings for BPSK 20 kbit/s
pub static BPSK20: TimingParams = TimingParams::derive(PhyMode::Bpsk20);
