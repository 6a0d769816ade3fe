use super::{dr, Datarate};
use lora_modulation::{Bandwidth, SpreadingFactor};

pub(crate) const DATARATES: [Option<Datarate>; 14] = [
    dr(SpreadingFactor::_10, Bandwidth::_125KHz, 19),
    dr(SpreadingFactor::_9, Bandwidth::_125KHz, 61),
    dr(SpreadingFactor::_8, Bandwidth::_125KHz, 133),
    dr(SpreadingFactor::_7, Bandwidth::_125KHz, 250),
    dr(SpreadingFactor::_8, Bandwidth::_500KHz, 250),
    None,
    None,
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
        Some((902_300_000 + 200_000 * u32::from(ch_index), 0, 3))
    } else if ch_index < 72 {
        Some((903_000_000 + 1_600_000 * u32::from(ch_index - 64), 4, 4))
    } else {
        None
    }
}

#[rustfmt::skip]
const RX1_DATARATES: [u8; 5 * 4] = [
    10, 9,  8,  8,
    11, 10, 9,  8,
    12, 11, 10, 9,
    13, 12, 11, 10,
    13, 13, 12, 11,
];

pub(crate) fn rx1_datarate(tx_rate: u8, rx1_offset: u8) -> Option<u8> {
    if rx1_offset >= 4 {
        return None;
    }
    RX1_DATARATES.get(usize::from(tx_rate) * 4 + usize::from(rx1_offset)).copied()
}
