/// Represents config for [`SdMmcSpi`](crate::SdMmcSpi).
///
/// Budgets ending in `_TICKS` are counted in periods of
/// [`Countdowns::tick`](crate::Countdowns::tick), nominally 10 ms each.
pub trait SdMmcSpiConfig {
    /// Budget of the whole card bring-up loop.
    const INIT_TIMEOUT_TICKS: u8;
    /// Budget of waiting for the card to release the busy state.
    const READY_TIMEOUT_TICKS: u8;
    /// Budget of waiting for a data start token.
    const DATA_TIMEOUT_TICKS: u8;
    /// Max attempts to read R1.
    const READ_R1_ATTEMPTS: usize;
    /// Count of bytes scanned for the STOP_TRANSMISSION response.
    const STOP_RESPONSE_WINDOW: usize;
    /// Count of `0xFF` bytes clocked out with CS high after power on.
    const INIT_CLOCK_BYTES: usize;
}

/// Default implementation of [`SdMmcSpiConfig`](crate::SdMmcSpiConfig).
pub struct DefaultSdMmcSpiConfig;

impl SdMmcSpiConfig for DefaultSdMmcSpiConfig {
    const INIT_TIMEOUT_TICKS: u8 = 100;
    const READY_TIMEOUT_TICKS: u8 = 50;
    const DATA_TIMEOUT_TICKS: u8 = 100;
    const READ_R1_ATTEMPTS: usize = 10;
    const STOP_RESPONSE_WINDOW: usize = 10;
    const INIT_CLOCK_BYTES: usize = 10;
}
