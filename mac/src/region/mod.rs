//! Regional channel plans and data rate tables.
//!
//! Everything here is a pure lookup keyed by [`Region`]; mutable channel
//! state (configured frequencies, masks) lives in the MAC session.
use lora_modulation::{Bandwidth, SpreadingFactor};

mod au915;
mod eu433;
mod eu868;
mod us915;

/// Transmit rate applied on reset; ADR never drops below it.
pub const DEFAULT_RATE: u8 = 2;

/// Regions supported by this crate.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu868,
    Eu433,
    Us915,
    Au915,
}

/// The radio settings and payload capacity behind a data rate index.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datarate {
    pub spreading_factor: SpreadingFactor,
    pub bandwidth: Bandwidth,
    /// Largest MAC payload at this rate.
    pub max_payload: u8,
}

pub(crate) const fn dr(
    spreading_factor: SpreadingFactor,
    bandwidth: Bandwidth,
    max_payload: u8,
) -> Option<Datarate> {
    Some(Datarate { spreading_factor, bandwidth, max_payload })
}

impl Region {
    /// Look up the modulation settings for a rate. Invalid rates degrade to
    /// SF7/125 kHz.
    pub fn datarate(self, rate: u8) -> Datarate {
        let table: &[Option<Datarate>] = match self {
            Region::Eu868 => &eu868::DATARATES,
            Region::Eu433 => &eu433::DATARATES,
            Region::Us915 => &us915::DATARATES,
            Region::Au915 => &au915::DATARATES,
        };
        match table.get(rate as usize) {
            Some(Some(dr)) => *dr,
            _ => {
                warn!("invalid rate {}", rate);
                Datarate {
                    spreading_factor: SpreadingFactor::_7,
                    bandwidth: Bandwidth::_125KHz,
                    max_payload: 250,
                }
            }
        }
    }

    /// Whether a rate index is defined for this region.
    pub fn rate_valid(self, rate: u8) -> bool {
        let table: &[Option<Datarate>] = match self {
            Region::Eu868 => &eu868::DATARATES,
            Region::Eu433 => &eu433::DATARATES,
            Region::Us915 => &us915::DATARATES,
            Region::Au915 => &au915::DATARATES,
        };
        matches!(table.get(rate as usize), Some(Some(_)))
    }

    /// Dynamic regions carry their channel frequencies in the session;
    /// fixed regions derive them from the channel index.
    pub fn is_dynamic(self) -> bool {
        match self {
            Region::Eu868 | Region::Eu433 => true,
            Region::Us915 | Region::Au915 => false,
        }
    }

    pub fn num_channels(self) -> u8 {
        if self.is_dynamic() {
            16
        } else {
            72
        }
    }

    /// The mandatory channels of a dynamic region as
    /// `(chIndex, freq, minRate, maxRate)`. Empty for fixed regions.
    pub fn default_channels(self) -> &'static [(u8, u32, u8, u8)] {
        match self {
            Region::Eu868 => &eu868::DEFAULT_CHANNELS,
            Region::Eu433 => &eu433::DEFAULT_CHANNELS,
            Region::Us915 | Region::Au915 => &[],
        }
    }

    /// The deterministic channel table of a fixed region as
    /// `(freq, minRate, maxRate)`.
    pub fn fixed_channel(self, ch_index: u8) -> Option<(u32, u8, u8)> {
        match self {
            Region::Us915 => us915::channel(ch_index),
            Region::Au915 => au915::channel(ch_index),
            Region::Eu868 | Region::Eu433 => None,
        }
    }

    /// The duty-cycle band an uplink frequency falls into.
    pub fn band(self, freq: u32) -> Option<u8> {
        match self {
            Region::Eu868 => eu868::band(freq),
            _ => Some(0),
        }
    }

    /// Off-time multiplier of a band; `airTime x factor` must elapse before
    /// the band may be used again. `0` means the band is unregulated.
    pub fn off_time_factor(self, band: u8) -> u16 {
        match self {
            Region::Eu868 => eu868::off_time_factor(band),
            Region::Eu433 => 100,
            Region::Us915 | Region::Au915 => 0,
        }
    }

    /// The uplink rate range allowed on a channel index.
    pub fn up_rate_range(self, ch_index: u8) -> Option<(u8, u8)> {
        match self {
            Region::Eu868 | Region::Eu433 => {
                if ch_index < 16 {
                    Some((0, 5))
                } else {
                    None
                }
            }
            Region::Us915 => us915::channel(ch_index).map(|(_, min, max)| (min, max)),
            Region::Au915 => au915::channel(ch_index).map(|(_, min, max)| (min, max)),
        }
    }

    /// Whether a rate range fits the channel.
    pub fn validate_rate(self, ch_index: u8, min_rate: u8, max_rate: u8) -> bool {
        match self.up_rate_range(ch_index) {
            Some((min, max)) => min_rate >= min && max_rate <= max,
            None => false,
        }
    }

    /// Whether a frequency may be assigned to the channel.
    pub fn validate_freq(self, _ch_index: u8, _freq: u32) -> bool {
        true
    }

    /// RX1 downlink rate for an uplink rate and RX1 offset. Out-of-range
    /// inputs fall back to the uplink rate.
    pub fn rx1_datarate(self, tx_rate: u8, rx1_offset: u8) -> u8 {
        let looked_up = match self {
            Region::Eu868 => eu868::rx1_datarate(tx_rate, rx1_offset),
            Region::Eu433 => eu433::rx1_datarate(tx_rate, rx1_offset),
            Region::Us915 => us915::rx1_datarate(tx_rate, rx1_offset),
            Region::Au915 => au915::rx1_datarate(tx_rate, rx1_offset),
        };
        match looked_up {
            Some(rate) => rate,
            None => {
                warn!("rx1 rate lookup out of range");
                tx_rate
            }
        }
    }

    /// RX1 downlink frequency for an uplink channel.
    pub fn rx1_freq(self, tx_freq: u32, ch_index: u8) -> u32 {
        if self.is_dynamic() {
            tx_freq
        } else {
            923_300_000 + (u32::from(ch_index % 8) * 600_000)
        }
    }

    pub fn rx2_freq(self) -> u32 {
        match self {
            Region::Eu868 => 869_525_000,
            Region::Eu433 => 434_665_000,
            Region::Us915 | Region::Au915 => 923_300_000,
        }
    }

    pub fn rx2_rate(self) -> u8 {
        match self {
            Region::Eu868 | Region::Eu433 => 0,
            Region::Us915 | Region::Au915 => 8,
        }
    }

    pub fn max_fcnt_gap(self) -> u16 {
        16384
    }

    /// RX1 delay after a data uplink, in whole seconds.
    pub fn rx1_delay(self) -> u8 {
        1
    }

    /// RX1 delay after a join request, in whole seconds.
    pub fn ja1_delay(self) -> u8 {
        5
    }

    pub fn rx1_offset(self) -> u8 {
        0
    }

    /// Whether a power index is defined for this region.
    pub fn power_valid(self, power: u8) -> bool {
        power <= self.max_power_index()
    }

    /// Transmit power for a power index in dBm x 100, stepping -2 dBm from
    /// the regional maximum. Out-of-range indices clamp to the minimum.
    pub fn tx_power(self, power: u8) -> i16 {
        let max = self.max_power_index();
        let power = power.min(max);
        self.max_dbm100() - (i16::from(power) * 200)
    }

    fn max_power_index(self) -> u8 {
        match self {
            Region::Eu868 => 7,
            Region::Eu433 => 5,
            Region::Us915 | Region::Au915 => 10,
        }
    }

    fn max_dbm100(self) -> i16 {
        match self {
            Region::Eu868 => 1600,
            Region::Eu433 => 1215,
            Region::Us915 | Region::Au915 => 3000,
        }
    }

    /// The uplink rate to join with on a given trial. The sequence starts
    /// fast and walks down; US and AU interleave the 500 kHz fallback on odd
    /// trials.
    pub fn join_rate(self, trial: u16) -> u8 {
        match self {
            Region::Eu868 | Region::Eu433 => 5 - (trial % (6 - DEFAULT_RATE as u16)) as u8,
            Region::Us915 => {
                if trial & 1 > 0 {
                    4
                } else {
                    3 - ((trial >> 1) % (4 - DEFAULT_RATE as u16)) as u8
                }
            }
            Region::Au915 => {
                if trial & 1 > 0 {
                    6
                } else {
                    4 - ((trial >> 1) % (5 - DEFAULT_RATE as u16)) as u8
                }
            }
        }
    }
}
