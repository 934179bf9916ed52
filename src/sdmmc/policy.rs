//! sdspi-diskio - Retry bounds and delays
//!
//! Every wait in the protocol is a bounded busy-poll. The bounds and the
//! pauses between polls are collected here so tests (and slow cards) can
//! change them.

/// How long, in polls and microseconds, the driver waits for the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before the power-up clocks.
    pub power_up_delay_us: u32,
    /// Polls for the card to release MISO (0xFF) after select or a write.
    pub ready_polls: u32,
    /// Pause between ready polls.
    pub ready_poll_interval_us: u32,
    /// Bytes clocked while waiting for an R1 response.
    pub response_polls: u32,
    /// Attempts at ACMD41 / CMD1 before giving up on initialisation.
    pub op_cond_attempts: u32,
    /// Pause between ACMD41 / CMD1 attempts.
    pub op_cond_interval_us: u32,
    /// Polls for the data start token of a block being read.
    pub data_token_polls: u32,
    /// Pause between data token polls.
    pub data_token_interval_us: u32,
    /// Bytes clocked while waiting for the data response of a written block.
    pub write_response_polls: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            power_up_delay_us: 10_000,
            ready_polls: 5_000,
            ready_poll_interval_us: 100,
            response_polls: 25,
            op_cond_attempts: 1_000,
            op_cond_interval_us: 1_000,
            data_token_polls: 1_000,
            data_token_interval_us: 25,
            write_response_polls: 10_000,
        }
    }
}
