use super::{dr, Datarate};
use lora_modulation::{Bandwidth, SpreadingFactor};

pub(crate) const DATARATES: [Option<Datarate>; 7] = [
    dr(SpreadingFactor::_12, Bandwidth::_125KHz, 59),
    dr(SpreadingFactor::_11, Bandwidth::_125KHz, 59),
    dr(SpreadingFactor::_10, Bandwidth::_125KHz, 59),
    dr(SpreadingFactor::_9, Bandwidth::_125KHz, 123),
    dr(SpreadingFactor::_8, Bandwidth::_125KHz, 250),
    dr(SpreadingFactor::_7, Bandwidth::_125KHz, 250),
    dr(SpreadingFactor::_7, Bandwidth::_250KHz, 250),
];

pub(crate) const DEFAULT_CHANNELS: [(u8, u32, u8, u8); 3] = [
    (0, 868_100_000, 0, 5),
    (1, 868_300_000, 0, 5),
    (2, 868_500_000, 0, 5),
];

/// ETSI sub-bands used for off-time accounting.
pub(crate) fn band(freq: u32) -> Option<u8> {
    if (863_000_000..=868_000_000).contains(&freq) {
        Some(0)
    } else if (868_000_000..=868_600_000).contains(&freq) {
        Some(1)
    } else if (868_700_000..=869_200_000).contains(&freq) {
        Some(2)
    } else if (869_400_000..=869_650_000).contains(&freq) {
        Some(3)
    } else if (869_700_000..870_000_000).contains(&freq) {
        Some(4)
    } else {
        None
    }
}

pub(crate) fn off_time_factor(band: u8) -> u16 {
    match band {
        0 | 1 | 4 => 100,  // 1.0%
        2 => 1000,         // 0.1%
        3 => 10,           // 10.0%
        _ => 0,
    }
}

#[rustfmt::skip]
const RX1_DATARATES: [u8; 8 * 6] = [
    0, 0, 0, 0, 0, 0,
    1, 0, 0, 0, 0, 0,
    2, 1, 0, 0, 0, 0,
    3, 2, 1, 0, 0, 0,
    4, 3, 2, 1, 0, 0,
    5, 4, 3, 2, 1, 0,
    6, 5, 4, 3, 2, 1,
    7, 6, 5, 4, 3, 2,
];

pub(crate) fn rx1_datarate(tx_rate: u8, rx1_offset: u8) -> Option<u8> {
    if rx1_offset >= 6 {
        return None;
    }
    RX1_DATARATES.get(usize::from(tx_rate) * 6 + usize::from(rx1_offset)).copied()
}
