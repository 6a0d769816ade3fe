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
    (0, 433_175_000, 0, 5),
    (1, 433_375_000, 0, 5),
    (2, 433_575_000, 0, 5),
];

// same downlink offset matrix as EU868
pub(crate) fn rx1_datarate(tx_rate: u8, rx1_offset: u8) -> Option<u8> {
    super::eu868::rx1_datarate(tx_rate, rx1_offset)
}
