//! Software security module backed by the `aes` and `cmac` crates.
use crate::keys::{Aes128Key, KeyDesc, SecurityModule};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::Mac;

pub type Cmac = cmac::Cmac<Aes128>;

const ROOT: usize = 0;
const NWK_SESSION: usize = 1;
const APP_SESSION: usize = 2;

/// LoRaWAN 1.0.x security module.
///
/// Holds one root key (the AppKey) and two session key slots. The 1.1
/// descriptor set is collapsed: every network-session descriptor maps onto
/// the same physical key, and both root descriptors map onto the AppKey.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DefaultSecurityModule {
    keys: [Aes128Key; 3],
}

impl DefaultSecurityModule {
    pub fn new(app_key: Aes128Key) -> Self {
        Self { keys: [app_key, Aes128Key::default(), Aes128Key::default()] }
    }

    /// Wipe both session key slots, keeping the root.
    pub fn clear_session(&mut self) {
        self.keys[NWK_SESSION] = Aes128Key::default();
        self.keys[APP_SESSION] = Aes128Key::default();
    }

    /// The current session keys `(NwkSKey, AppSKey)`, for the application to
    /// persist alongside the MAC session record.
    pub fn session_keys(&self) -> (Aes128Key, Aes128Key) {
        (self.keys[NWK_SESSION], self.keys[APP_SESSION])
    }

    /// Restore previously persisted session keys.
    pub fn set_session_keys(&mut self, nwk: Aes128Key, app: Aes128Key) {
        self.keys[NWK_SESSION] = nwk;
        self.keys[APP_SESSION] = app;
    }

    fn slot(desc: KeyDesc) -> usize {
        match desc {
            KeyDesc::App | KeyDesc::Nwk => ROOT,
            KeyDesc::FNwkSInt
            | KeyDesc::SNwkSInt
            | KeyDesc::NwkSEnc
            | KeyDesc::JSInt
            | KeyDesc::JSEnc => NWK_SESSION,
            KeyDesc::AppS => APP_SESSION,
        }
    }

    fn cipher(&self, desc: KeyDesc) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.keys[Self::slot(desc)].0))
    }
}

impl SecurityModule for DefaultSecurityModule {
    fn update_session_key(&mut self, dest: KeyDesc, root: KeyDesc, iv: &[u8; 16]) {
        if !dest.is_session() {
            return;
        }
        let cipher = self.cipher(root);
        let mut block = *iv;
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        self.keys[Self::slot(dest)] = Aes128Key(block);
    }

    fn mic(&self, desc: KeyDesc, hdr: &[u8], data: &[u8]) -> u32 {
        let mut mac = <Cmac as KeyInit>::new(GenericArray::from_slice(&self.keys[Self::slot(desc)].0));
        mac.update(hdr);
        mac.update(data);
        let tag = mac.finalize().into_bytes();
        u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]])
    }

    fn ecb(&self, desc: KeyDesc, block: &mut [u8; 16]) {
        self.cipher(desc).encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn ctr(&self, desc: KeyDesc, iv: &[u8; 16], data: &mut [u8]) {
        let cipher = self.cipher(desc);
        let mut a = *iv;

        for (i, chunk) in data.chunks_mut(16).enumerate() {
            a[15] = (i + 1) as u8;
            let mut s = a;
            cipher.encrypt_block(GenericArray::from_mut_slice(&mut s));
            for (b, k) in chunk.iter_mut().zip(s.iter()) {
                *b ^= k;
            }
        }
    }
}
