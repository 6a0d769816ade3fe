//! Radio driver interface consumed by the MAC.
//!
//! The MAC owns the radio exclusively and commands it from `process()` only.
//! The single exception is [`Radio::dio_event`], which translates a DIO line
//! to a [`RadioEvent`] from interrupt context and therefore must not mutate
//! driver state.
pub use lora_modulation::{Bandwidth, SpreadingFactor};

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Assert the reset line.
    Reset,
    /// Release the reset line and let the chip boot.
    Boot,
    Sleep,
    Rx,
    Tx,
    /// Standby without losing configuration.
    Hold,
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxSettings {
    pub freq: u32,
    pub sf: SpreadingFactor,
    pub bw: Bandwidth,
    /// Transmit power in dBm x 100.
    pub dbm100: i16,
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxSettings {
    pub freq: u32,
    pub sf: SpreadingFactor,
    pub bw: Bandwidth,
    /// Preamble timeout in symbols.
    pub timeout_symbols: u8,
    /// Largest acceptable payload; bigger frames end the window early.
    pub max_size: u8,
}

/// Signal quality of a received packet.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub rssi: i16,
    pub snr: i16,
}

/// Chip events the MAC reacts to.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    TxComplete,
    RxReady,
    RxTimeout,
}

pub trait Radio {
    fn set_mode(&mut self, mode: Mode);

    /// Configure and start a transmission. Completion is signalled through a
    /// DIO line.
    fn transmit(&mut self, settings: &TxSettings, data: &[u8]);

    /// Configure and open a single receive window. Packet or timeout is
    /// signalled through a DIO line.
    fn receive(&mut self, settings: &RxSettings);

    /// Read the packet that caused [`RadioEvent::RxReady`] into `out`,
    /// returning its size.
    fn read_buffer(&mut self, meta: &mut PacketMeta, out: &mut [u8]) -> usize;

    /// Sample wideband noise for seeding the host random source. The chip
    /// must be receiving (see [`Mode::Rx`]) when this is called.
    fn read_entropy(&mut self) -> u32;

    /// Translate a DIO line to a radio event.
    ///
    /// Called from interrupt context; must not mutate driver state.
    fn dio_event(&self, dio: u8) -> Option<RadioEvent>;
}
