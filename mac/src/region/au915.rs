use super::{dr, Datarate};
use lora_modulation::{Bandwidth, SpreadingFactor};

pub(crate) const DATARATES: [Option<Datarate>; 14] = [
    dr(SpreadingFactor::_12, Bandwidth::_125KHz, 59),
    dr(SpreadingFactor::_11, Bandwidth::_125KHz, 59),
    dr(SpreadingFactor::_10, Bandwidth::_125KHz, 59),
    dr(SpreadingFactor::_9, Bandwidth::_125KHz, 123),
    dr(SpreadingFactor::_8, Bandwidth::_125KHz, 250),
    dr(SpreadingFactor::_7, Bandwidth::_125KHz, 250),
    dr(SpreadingFactor::_8, Bandwidth::_500KHz, 250),
    None,
    dr(SpreadingFactor::_12, Bandwidth::_500KHz, 61),
    dr(SpreadingFactor::_11, Bandwidth::_500KHz, 137),
    dr(SpreadingFactor::_10, Bandwidth::_500KHz, 250),
    dr(SpreadingFactor::_9, Bandwidth::_500KHz, 250),
    dr(SpreadingFactor::_8, Bandwidth::_500KHz, 250),
    dr(SpreadingFactor::_7, Bandwidth::_500KHz, 250),
];

/// 64 125 kHz upstream channels and 8 500 kHz upstream channels.
pub(crate) fn channel(ch_index: u8) -> Option<(u32, u8, u8)> {
    if ch_index < 64 {
        Some((915_200_000 + 200_000 * u32::from(ch_index), 0, 5))
    } else if ch_index < 72 {
        Some((915_900_000 + 1_600_000 * u32::from(ch_index - 64), 6, 6))
    } else {
        None
    }
}

#[rustfmt::skip]
const RX1_DATARATES: [u8; 7 * 6] = [
    8,  8,  8,  8,  8,  8,
    9,  8,  8,  8,  8,  8,
    10, 9,  8,  8,  8,  8,
    11, 10, 9,  8,  8,  8,
    12, 11, 10, 9,  8,  8,
    13, 12, 11, 10, 9,  8,
    13, 13, 12, 11, 10, 9,
];

pub(crate) fn rx1_datarate(tx_rate: u8, rx1_offset: u8) -> Option<u8> {
    if rx1_offset >= 6 {
        return None;
    }
    RX1_DATARATES.get(usize::from(tx_rate) * 6 + usize::from(rx1_offset)).copied()
}
