
use bitflags::bitflags;

use crate::params::TimingParams;

/// Default channel check period (1/8 s)
pub const DEFAULT_CHANNEL_CHECK_PERIOD: u32 = 125_000;

/// Default time to stay awake after a frame with the pending bit set (1/64 s)
pub const DEFAULT_BURST_TIMEOUT: u32 = 15_625;

/// Default delay before the extra channel check following a unicast send
pub const DEFAULT_REPLY_DELAY: u32 = 8_192;

bitflags! {
    /// Events forwarded to the upper layer
    #[derive(Default)]
    pub struct Notify: u8 {
        const TX_START = 1 << 0;
        const TX_END   = 1 << 1;
        const RX_START = 1 << 2;
        const RX_END   = 1 << 3;
    }
}

/// Configuration for the duty cycling MAC
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    /// Time between scheduled channel checks in microseconds
    pub channel_check_period: u32,

    /// Listen window after a received frame with the frame pending bit set
    pub burst_timeout: u32,

    /// Delay before an extra channel check after a successful unicast send,
    /// to catch an immediate reply
    pub reply_delay: u32,

    /// Disable duty cycling, the radio listens continuously
    pub no_sleep: bool,

    /// Upper layer notifications
    pub notify: Notify,

    /// Override the timing parameters selected from the channel / page
    pub timing: Option<TimingParams>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_check_period: DEFAULT_CHANNEL_CHECK_PERIOD,
            burst_timeout: DEFAULT_BURST_TIMEOUT,
            reply_delay: DEFAULT_REPLY_DELAY,
            no_sleep: false,
            notify: Notify::TX_END | Notify::RX_END,
            timing: None,
        }
    }
}
