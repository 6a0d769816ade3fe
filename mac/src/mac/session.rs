//! The persistable session record and its channel plan helpers.
use crate::region::{Region, DEFAULT_RATE};

/// Number of configurable channels in a dynamic-plan region.
pub(crate) const NUM_CONFIG_CHANNELS: usize = 16;
/// Mask bytes covering the largest (fixed-plan) channel count.
pub(crate) const MASK_BYTES: usize = 72 / 8;

/// Serialised size of [`Session::to_bytes`].
pub const SESSION_BLOB_LEN: usize = 103;
const SESSION_BLOB_VERSION: u8 = 1;

/// One configurable uplink channel. A frequency of zero means the slot is
/// unused.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub freq: u32,
    pub min_rate: u8,
    pub max_rate: u8,
}

/// Session parameter cache.
///
/// Created by a join-accept, mutated by MAC command processing and by every
/// uplink, wiped by `forget()`. Session keys are not part of the record; they
/// are held by the security module and addressed by descriptor.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Uplink frame counter.
    pub up: u32,
    /// Next expected downlink frame counter.
    pub down: u32,
    pub dev_addr: u32,
    /// Network identifier from the join-accept.
    pub net_id: u32,
    /// Next device nonce to join with; `0xffff` means the nonce space for
    /// this root key set is exhausted.
    pub dev_nonce: u16,
    pub(crate) channels: [Channel; NUM_CONFIG_CHANNELS],
    pub(crate) mask: [u8; MASK_BYTES],
    pub rate: u8,
    pub power: u8,
    /// Aggregated duty-cycle exponent; the limit is `1 / 2^max_duty_cycle`,
    /// zero meaning no limit.
    pub max_duty_cycle: u8,
    pub nb_trans: u8,
    pub rx1_dr_offset: u8,
    /// RX1 delay in whole seconds (1..=15).
    pub rx1_delay: u8,
    pub rx2_data_rate: u8,
    pub rx2_freq: u32,
    pub joined: bool,
    pub adr: bool,
}

impl Session {
    pub(crate) fn new(region: Region) -> Self {
        let mut session = Session {
            up: 0,
            down: 0,
            dev_addr: 0,
            net_id: 0,
            dev_nonce: 0,
            channels: [Channel::default(); NUM_CONFIG_CHANNELS],
            mask: [0; MASK_BYTES],
            rate: DEFAULT_RATE,
            power: 0,
            max_duty_cycle: 0,
            nb_trans: 1,
            rx1_dr_offset: 0,
            rx1_delay: 0,
            rx2_data_rate: 0,
            rx2_freq: 0,
            joined: false,
            adr: true,
        };
        session.restore_defaults(region, false);
        session
    }

    /// Reset to region defaults. With `keep` the user-tunable settings (rate,
    /// power, ADR, duty-cycle limit) and the device nonce survive; without it
    /// everything but the nonce returns to factory state.
    pub(crate) fn restore_defaults(&mut self, region: Region, keep: bool) {
        if !keep {
            let dev_nonce = self.dev_nonce;
            *self = Session {
                up: 0,
                down: 0,
                dev_addr: 0,
                net_id: 0,
                dev_nonce,
                channels: [Channel::default(); NUM_CONFIG_CHANNELS],
                mask: [0; MASK_BYTES],
                rate: DEFAULT_RATE,
                power: 0,
                max_duty_cycle: 0,
                nb_trans: 1,
                rx1_dr_offset: 0,
                rx1_delay: 0,
                rx2_data_rate: 0,
                rx2_freq: 0,
                joined: false,
                adr: true,
            };
        } else {
            self.up = 0;
            self.down = 0;
            self.channels = [Channel::default(); NUM_CONFIG_CHANNELS];
            self.mask = [0; MASK_BYTES];
            self.joined = false;
        }

        for &(ch_index, freq, min_rate, max_rate) in region.default_channels() {
            self.set_channel(region, ch_index, freq, min_rate, max_rate);
        }

        self.rx1_dr_offset = region.rx1_offset();
        self.rx1_delay = region.rx1_delay();
        self.rx2_data_rate = region.rx2_rate();
        self.rx2_freq = region.rx2_freq();
    }

    /// Configure a channel slot. Only meaningful in dynamic regions.
    pub(crate) fn set_channel(
        &mut self,
        region: Region,
        ch_index: u8,
        freq: u32,
        min_rate: u8,
        max_rate: u8,
    ) -> bool {
        if usize::from(ch_index) < NUM_CONFIG_CHANNELS && ch_index < region.num_channels() {
            self.channels[usize::from(ch_index)] = Channel { freq, min_rate, max_rate };
            true
        } else {
            false
        }
    }

    /// The frequency and rate range of a channel; configured slots for
    /// dynamic regions, the deterministic table for fixed ones.
    pub(crate) fn channel(&self, region: Region, ch_index: u8) -> Option<(u32, u8, u8)> {
        if region.is_dynamic() {
            match self.channels.get(usize::from(ch_index)) {
                Some(ch) if ch.freq != 0 => Some((ch.freq, ch.min_rate, ch.max_rate)),
                _ => None,
            }
        } else {
            region.fixed_channel(ch_index)
        }
    }

    pub(crate) fn mask_channel(&mut self, region: Region, ch_index: u8) {
        if ch_index < region.num_channels() {
            self.mask[usize::from(ch_index) / 8] |= 1 << (ch_index % 8);
        }
    }

    pub(crate) fn unmask_channel(&mut self, region: Region, ch_index: u8) {
        if ch_index < region.num_channels() {
            self.mask[usize::from(ch_index) / 8] &= !(1 << (ch_index % 8));
        }
    }

    pub(crate) fn unmask_all(&mut self, region: Region) {
        for i in 0..region.num_channels() {
            self.unmask_channel(region, i);
        }
    }

    pub(crate) fn channel_is_masked(&self, region: Region, ch_index: u8) -> bool {
        ch_index < region.num_channels()
            && (self.mask[usize::from(ch_index) / 8] & (1 << (ch_index % 8))) != 0
    }

    /// Stable little-endian snapshot for the persistence callback.
    pub fn to_bytes(&self) -> [u8; SESSION_BLOB_LEN] {
        let mut out = [0u8; SESSION_BLOB_LEN];
        out[0] = SESSION_BLOB_VERSION;
        out[1..5].copy_from_slice(&self.up.to_le_bytes());
        out[5..9].copy_from_slice(&self.down.to_le_bytes());
        out[9..13].copy_from_slice(&self.dev_addr.to_le_bytes());
        out[13..15].copy_from_slice(&self.dev_nonce.to_le_bytes());
        out[15] = self.rate;
        out[16] = self.power;
        out[17] = self.max_duty_cycle;
        out[18] = self.nb_trans;
        out[19] = self.rx1_dr_offset;
        out[20] = self.rx1_delay;
        out[21] = self.rx2_data_rate;
        out[22..26].copy_from_slice(&self.rx2_freq.to_le_bytes());
        out[26] = (self.joined as u8) | ((self.adr as u8) << 1);
        out[27..36].copy_from_slice(&self.mask);
        for (i, ch) in self.channels.iter().enumerate() {
            let packed = ((ch.freq / 100) << 8)
                | (u32::from(ch.min_rate & 0x0f) << 4)
                | u32::from(ch.max_rate & 0x0f);
            out[36 + i * 4..40 + i * 4].copy_from_slice(&packed.to_le_bytes());
        }
        let net = self.net_id.to_le_bytes();
        out[100..103].copy_from_slice(&net[..3]);
        out
    }

    /// Rehydrate a snapshot. `None` on a short read or a version mismatch, in
    /// which case region defaults apply.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < SESSION_BLOB_LEN || data[0] != SESSION_BLOB_VERSION {
            return None;
        }
        let mut session = Session {
            up: u32::from_le_bytes(data[1..5].try_into().unwrap()),
            down: u32::from_le_bytes(data[5..9].try_into().unwrap()),
            dev_addr: u32::from_le_bytes(data[9..13].try_into().unwrap()),
            net_id: u32::from_le_bytes([data[100], data[101], data[102], 0]),
            dev_nonce: u16::from_le_bytes(data[13..15].try_into().unwrap()),
            channels: [Channel::default(); NUM_CONFIG_CHANNELS],
            mask: data[27..36].try_into().unwrap(),
            rate: data[15],
            power: data[16],
            max_duty_cycle: data[17] & 0x0f,
            nb_trans: data[18],
            rx1_dr_offset: data[19],
            rx1_delay: data[20],
            rx2_data_rate: data[21],
            rx2_freq: u32::from_le_bytes(data[22..26].try_into().unwrap()),
            joined: data[26] & 1 != 0,
            adr: data[26] & 2 != 0,
        };
        for (i, ch) in session.channels.iter_mut().enumerate() {
            let packed = u32::from_le_bytes(data[36 + i * 4..40 + i * 4].try_into().unwrap());
            *ch = Channel {
                freq: (packed >> 8) * 100,
                min_rate: ((packed >> 4) & 0x0f) as u8,
                max_rate: (packed & 0x0f) as u8,
            };
        }
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_install_mandatory_channels() {
        let s = Session::new(Region::Eu868);
        assert_eq!(s.channel(Region::Eu868, 0), Some((868_100_000, 0, 5)));
        assert_eq!(s.channel(Region::Eu868, 1), Some((868_300_000, 0, 5)));
        assert_eq!(s.channel(Region::Eu868, 2), Some((868_500_000, 0, 5)));
        assert_eq!(s.channel(Region::Eu868, 3), None);
        assert_eq!(s.rate, DEFAULT_RATE);
        assert_eq!(s.rx1_delay, 1);
        assert_eq!(s.rx2_freq, 869_525_000);
        assert!(s.adr);
        assert!(!s.joined);
    }

    #[test]
    fn fixed_region_channels_come_from_the_table() {
        let s = Session::new(Region::Us915);
        assert_eq!(s.channel(Region::Us915, 0), Some((902_300_000, 0, 3)));
        assert_eq!(s.channel(Region::Us915, 70), Some((903_000_000 + 6 * 1_600_000, 4, 4)));
        assert_eq!(s.channel(Region::Us915, 72), None);
    }

    #[test]
    fn masking() {
        let mut s = Session::new(Region::Us915);
        assert!(!s.channel_is_masked(Region::Us915, 70));
        s.mask_channel(Region::Us915, 70);
        assert!(s.channel_is_masked(Region::Us915, 70));
        s.unmask_all(Region::Us915);
        assert!(!s.channel_is_masked(Region::Us915, 70));
        // out of range indices are ignored
        s.mask_channel(Region::Us915, 100);
        assert!(!s.channel_is_masked(Region::Us915, 100));
    }

    #[test]
    fn restore_defaults_keep_preserves_tuning() {
        let mut s = Session::new(Region::Eu868);
        s.up = 7;
        s.down = 3;
        s.rate = 5;
        s.power = 2;
        s.adr = false;
        s.max_duty_cycle = 4;
        s.dev_nonce = 42;
        s.joined = true;

        s.restore_defaults(Region::Eu868, true);
        assert_eq!(s.up, 0);
        assert_eq!(s.down, 0);
        assert!(!s.joined);
        assert_eq!(s.rate, 5);
        assert_eq!(s.power, 2);
        assert!(!s.adr);
        assert_eq!(s.max_duty_cycle, 4);
        assert_eq!(s.dev_nonce, 42);

        s.restore_defaults(Region::Eu868, false);
        assert_eq!(s.rate, DEFAULT_RATE);
        assert!(s.adr);
        // the nonce always survives
        assert_eq!(s.dev_nonce, 42);
    }

    #[test]
    fn blob_round_trip() {
        let mut s = Session::new(Region::Eu868);
        s.up = 0x01020304;
        s.down = 0xa0b0c0d0;
        s.dev_addr = 0x26011234;
        s.net_id = 0x000013;
        s.dev_nonce = 99;
        s.rate = 5;
        s.power = 3;
        s.nb_trans = 2;
        s.max_duty_cycle = 7;
        s.rx1_dr_offset = 2;
        s.rx1_delay = 5;
        s.rx2_data_rate = 3;
        s.rx2_freq = 869_525_000;
        s.joined = true;
        s.adr = false;
        s.set_channel(Region::Eu868, 4, 867_100_000, 0, 5);
        s.mask_channel(Region::Eu868, 1);

        let blob = s.to_bytes();
        let restored = Session::from_bytes(&blob).unwrap();
        assert_eq!(restored, s);
    }

    #[test]
    fn blob_version_mismatch_is_rejected() {
        let s = Session::new(Region::Eu868);
        let mut blob = s.to_bytes();
        blob[0] = 0xfe;
        assert!(Session::from_bytes(&blob).is_none());
        assert!(Session::from_bytes(&blob[..10]).is_none());
    }
}
