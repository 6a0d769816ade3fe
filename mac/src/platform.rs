//! Host platform services consumed by the MAC.

/// Identifiers for over-the-air activation, in canonical (MSB-first) order.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub app_eui: [u8; 8],
    pub dev_eui: [u8; 8],
}

pub trait Platform {
    /// Monotonic tick counter incrementing at [`Platform::tps`] per second.
    /// Wraps at `u32::MAX`.
    fn ticks(&self) -> u32;

    /// Ticks per second. Must be at least 1000; a 32.768 kHz timebase is
    /// typical.
    fn tps(&self) -> u32;

    /// Worst-case oscillator error per second, in ticks.
    fn eps(&self) -> u32;

    /// Ticks to advance the RX window schedule by, compensating interrupt
    /// response time and radio ramp-up.
    fn advance(&self) -> u32 {
        0
    }

    fn rand(&mut self) -> u32;

    fn identity(&self) -> Identity;

    /// Battery level for DevStatusAns; 0 means external power, 255 means
    /// unmeasurable.
    fn battery_level(&self) -> u8 {
        255
    }

    /// Persist the session record. Fire-and-forget; the blob must be copied
    /// before returning.
    fn save_context(&mut self, _blob: &[u8]) {}

    /// Rehydrate a previously saved session record into `blob`, returning the
    /// stored size, or `None` when nothing usable is cached.
    fn restore_context(&mut self, _blob: &mut [u8]) -> Option<usize> {
        None
    }
}
