// Copyright (c) 2026 The loramac developers
//
// Licensed under the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::parser::EUI64;

/// AES128 represents a 128-bit AES key.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct Aes128Key(pub [u8; 16]);

impl From<[u8; 16]> for Aes128Key {
    fn from(v: [u8; 16]) -> Self {
        Aes128Key(v)
    }
}

impl AsRef<[u8]> for Aes128Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// MIC represents a LoRaWAN message integrity code.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct Mic(pub [u8; 4]);

impl From<[u8; 4]> for Mic {
    fn from(v: [u8; 4]) -> Self {
        Mic(v)
    }
}

impl From<u32> for Mic {
    fn from(v: u32) -> Self {
        Mic(v.to_le_bytes())
    }
}

macro_rules! lorawan_eui {
    (
        $(#[$outer:meta])*
        pub struct $type:ident(EUI64<[u8; 8]>);
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type(EUI64<[u8; 8]>);

        impl From<[u8; 8]> for $type {
            fn from(v: [u8; 8]) -> Self {
                $type(EUI64::from(v))
            }
        }

        impl From<$type> for EUI64<[u8; 8]> {
            fn from(v: $type) -> Self {
                v.0
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                self.0.as_ref()
            }
        }
    };
}

lorawan_eui!(
    /// DevEui in canonical (MSB-first) byte order. The codec reverses it on
    /// the wire.
    pub struct DevEui(EUI64<[u8; 8]>);
);
lorawan_eui!(
    /// AppEui (JoinEui) in canonical (MSB-first) byte order.
    pub struct AppEui(EUI64<[u8; 8]>);
);

/// Names a key held by the security module.
///
/// The descriptor set is the LoRaWAN 1.1 one. A 1.0.x security module
/// collapses the network-session descriptors onto a single physical key and
/// treats [`KeyDesc::App`] and [`KeyDesc::Nwk`] as the same root (the
/// AppKey).
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDesc {
    /// Root application key.
    App,
    /// Root network key. Under 1.0.x this is the AppKey.
    Nwk,
    /// Forwarding network session integrity key.
    FNwkSInt,
    /// Serving network session integrity key.
    SNwkSInt,
    /// Network session encryption key.
    NwkSEnc,
    /// Join server integrity key.
    JSInt,
    /// Join server encryption key.
    JSEnc,
    /// Application session key.
    AppS,
}

impl KeyDesc {
    /// Whether the descriptor names a session key (derivable at join time).
    pub fn is_session(self) -> bool {
        matches!(
            self,
            KeyDesc::FNwkSInt
                | KeyDesc::SNwkSInt
                | KeyDesc::NwkSEnc
                | KeyDesc::JSInt
                | KeyDesc::JSEnc
                | KeyDesc::AppS
        )
    }
}

/// Abstraction over the cryptographic operations the codec needs.
///
/// Implementations receive key descriptors, never key material, so the codec
/// and the MAC above it can run against a secure element. All block inputs
/// and outputs use the LoRaWAN conventions: the MIC is the first four bytes
/// of the CMAC interpreted least-significant-byte first, and the CTR
/// keystream block index (one-based) is written into byte 15 of the supplied
/// IV by the implementation.
pub trait SecurityModule {
    /// Derive a session key: `dest = aes128_encrypt(root, iv)`.
    fn update_session_key(&mut self, dest: KeyDesc, root: KeyDesc, iv: &[u8; 16]);

    /// AES-CMAC over `hdr` followed by `data`, truncated to 32 bits.
    fn mic(&self, desc: KeyDesc, hdr: &[u8], data: &[u8]) -> u32;

    /// AES128 ECB encrypt of one block in place.
    fn ecb(&self, desc: KeyDesc, block: &mut [u8; 16]);

    /// AES128 CTR over `data` in place using `iv` as the A-block template.
    fn ctr(&self, desc: KeyDesc, iv: &[u8; 16], data: &mut [u8]);
}
