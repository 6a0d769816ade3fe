// Copyright (c) 2026 The loramac developers
//
// Licensed under the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Provides types and methods for creating LoRaWAN payloads.
//!
//! The device-side creators ([`JoinRequestCreator`], [`DataPayloadCreator`])
//! perform all cryptography through a [`SecurityModule`].
//! [`JoinAcceptCreator`] builds the network-side join-accept; it needs the
//! raw AES decrypt primitive and therefore takes key material directly, which
//! keeps it out of the device trust boundary. It exists for test harnesses
//! and network-side tooling.

use crate::keys::{Aes128Key, KeyDesc, SecurityModule};
use crate::maccommandcreator;
use crate::maccommands::{mac_commands_len, ChannelMask, SerializableMacCommand};
use crate::parser::{self, MHDR, MType};
use crate::securityhelpers;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use cmac::Mac as _;

const PIGGYBACK_MAC_COMMANDS_MAX_LEN: usize = 15;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    BufferTooShort,
    MacCommandTooBigForFOpts,
    DataAndMacCommandsInPayloadNotAllowed,
    MissingFport,
}

/// JoinRequestCreator serves for creating binary representation of the
/// physical payload of a JoinRequest.
pub struct JoinRequestCreator<D> {
    data: D,
}

impl<D: AsMut<[u8]>> JoinRequestCreator<D> {
    /// Creates a well initialized JoinRequestCreator over the provided
    /// buffer.
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < 23 {
            return Err(Error::BufferTooShort);
        }
        d[0] = 0x00;
        Ok(Self { data })
    }

    /// Sets the application EUI of the JoinRequest.
    ///
    /// # Argument
    ///
    /// * app_eui - the EUI in canonical (MSB-first) order; it is reversed on
    ///   the wire.
    pub fn set_app_eui<H: AsRef<[u8]>, T: Into<parser::EUI64<H>>>(
        &mut self,
        app_eui: T,
    ) -> &mut Self {
        let converted = app_eui.into();
        write_eui(&mut self.data.as_mut()[1..9], converted.as_ref());

        self
    }

    /// Sets the device EUI of the JoinRequest.
    ///
    /// # Argument
    ///
    /// * dev_eui - the EUI in canonical (MSB-first) order; it is reversed on
    ///   the wire.
    pub fn set_dev_eui<H: AsRef<[u8]>, T: Into<parser::EUI64<H>>>(
        &mut self,
        dev_eui: T,
    ) -> &mut Self {
        let converted = dev_eui.into();
        write_eui(&mut self.data.as_mut()[9..17], converted.as_ref());

        self
    }

    /// Sets the device nonce of the JoinRequest.
    pub fn set_dev_nonce<H: AsRef<[u8]>, T: Into<parser::DevNonce<H>>>(
        &mut self,
        dev_nonce: T,
    ) -> &mut Self {
        let converted = dev_nonce.into();
        self.data.as_mut()[17..19].copy_from_slice(converted.as_ref());

        self
    }

    /// Provides the binary representation of the JoinRequest physical payload
    /// with the MIC set.
    pub fn build<S: SecurityModule>(&mut self, sm: &S) -> &[u8] {
        let d = self.data.as_mut();
        let mic = securityhelpers::calculate_mic(sm, KeyDesc::Nwk, &d[..19]);
        d[19..23].copy_from_slice(&mic.to_le_bytes());
        &d[..23]
    }
}

fn write_eui(out: &mut [u8], canonical: &[u8]) {
    for (i, b) in canonical.iter().rev().enumerate() {
        out[i] = *b;
    }
}

/// DataPayloadCreator serves for creating binary representation of the
/// physical payload of DataUp or DataDown messages.
pub struct DataPayloadCreator<D> {
    data: D,
    data_f_port: Option<u8>,
    fcnt: u32,
}

impl<D: AsMut<[u8]>> DataPayloadCreator<D> {
    /// Creates a well initialized DataPayloadCreator over the provided
    /// buffer.
    ///
    /// By default the packet is an unconfirmed data up packet.
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < 255 {
            return Err(Error::BufferTooShort);
        }
        d[0] = 0x40;
        Ok(DataPayloadCreator { data, data_f_port: None, fcnt: 0 })
    }

    /// Sets whether the packet is uplink or downlink.
    pub fn set_uplink(&mut self, uplink: bool) -> &mut Self {
        if uplink {
            self.data.as_mut()[0] &= 0xdf;
        } else {
            self.data.as_mut()[0] |= 0x20;
        }
        self
    }

    /// Sets whether the packet is confirmed or unconfirmed.
    pub fn set_confirmed(&mut self, confirmed: bool) -> &mut Self {
        let d = self.data.as_mut();
        if confirmed {
            d[0] &= 0xbf;
            d[0] |= 0x80;
        } else {
            d[0] &= 0x7f;
            d[0] |= 0x40;
        }

        self
    }

    /// Sets the device address of the DataPayload.
    pub fn set_dev_addr<H: AsRef<[u8]>, T: Into<parser::DevAddr<H>>>(
        &mut self,
        dev_addr: T,
    ) -> &mut Self {
        let converted = dev_addr.into();
        self.data.as_mut()[1..5].copy_from_slice(converted.as_ref());

        self
    }

    /// Sets the FCtrl header of the DataPayload.
    pub fn set_fctrl(&mut self, fctrl: &parser::FCtrl) -> &mut Self {
        self.data.as_mut()[5] = fctrl.raw_value();
        self
    }

    /// Sets the FCnt of the DataPayload.
    ///
    /// The full 32-bit counter enters the MIC and cipher blocks; the header
    /// carries only the low half.
    pub fn set_fcnt(&mut self, fcnt: u32) -> &mut Self {
        let d = self.data.as_mut();
        self.fcnt = fcnt;
        d[6] = fcnt as u8;
        d[7] = (fcnt >> 8) as u8;

        self
    }

    /// Sets the FPort of the DataPayload.
    pub fn set_f_port(&mut self, f_port: u8) -> &mut Self {
        self.data_f_port = Some(f_port);

        self
    }

    /// Whether a set of mac commands can be piggybacked in FOpts.
    pub fn can_piggyback(cmds: &[&dyn SerializableMacCommand]) -> bool {
        mac_commands_len(cmds) <= PIGGYBACK_MAC_COMMANDS_MAX_LEN
    }

    /// Provides the binary representation of the DataPayload physical payload
    /// with the MIC set and the payload encrypted.
    ///
    /// # Argument
    ///
    /// * payload - the application FRMPayload; must be empty when fport is 0.
    /// * cmds - the MAC commands to send, piggybacked in FOpts or, when fport
    ///   is 0, as the FRMPayload.
    /// * sm - the security module performing the cryptography.
    pub fn build<S: SecurityModule>(
        &mut self,
        payload: &[u8],
        cmds: &[&dyn SerializableMacCommand],
        sm: &S,
    ) -> Result<&[u8], Error> {
        let has_fport_zero = self.data_f_port == Some(0);
        let mac_cmds_len = mac_commands_len(cmds);

        if mac_cmds_len > PIGGYBACK_MAC_COMMANDS_MAX_LEN && !has_fport_zero {
            return Err(Error::MacCommandTooBigForFOpts);
        }

        let mut serialized = [0u8; 255];
        let len = maccommandcreator::build_mac_commands(cmds, &mut serialized)
            .map_err(|_| Error::BufferTooShort)?;

        if has_fport_zero && !payload.is_empty() {
            return Err(Error::DataAndMacCommandsInPayloadNotAllowed);
        }

        if has_fport_zero && len > 0 {
            self.build_with_fopts(&serialized[..len], &[], sm)
        } else {
            self.build_with_fopts(payload, &serialized[..len], sm)
        }
    }

    /// Like [`DataPayloadCreator::build`] but with the MAC commands already
    /// serialized. `fopts` always goes to the FOpts field; a payload sent on
    /// fport 0 is treated as MAC commands and keyed accordingly.
    pub fn build_with_fopts<S: SecurityModule>(
        &mut self,
        payload: &[u8],
        fopts: &[u8],
        sm: &S,
    ) -> Result<&[u8], Error> {
        let d = self.data.as_mut();
        let mut last_filled = 8; // MHDR + FHDR without the FOpts
        let has_fport = self.data_f_port.is_some();
        let has_fport_zero = has_fport && self.data_f_port.unwrap() == 0;

        if fopts.len() > PIGGYBACK_MAC_COMMANDS_MAX_LEN {
            return Err(Error::MacCommandTooBigForFOpts);
        }
        if has_fport_zero && !fopts.is_empty() {
            return Err(Error::DataAndMacCommandsInPayloadNotAllowed);
        }
        if !has_fport && !payload.is_empty() {
            return Err(Error::MissingFport);
        }

        // FOpts
        d[5] &= 0xf0;
        if !fopts.is_empty() {
            d[5] |= fopts.len() as u8 & 0x0f;
            d[last_filled..last_filled + fopts.len()].copy_from_slice(fopts);
            last_filled += fopts.len();
        }

        if has_fport {
            d[last_filled] = self.data_f_port.unwrap();
            last_filled += 1;
        }

        let payload_len = payload.len();
        d[last_filled..last_filled + payload_len].copy_from_slice(payload);

        let enc_desc = if has_fport_zero {
            KeyDesc::NwkSEnc
        } else {
            KeyDesc::AppS
        };

        let mtype = MHDR::new(d[0]).mtype();
        let uplink = mtype == MType::UnconfirmedDataUp || mtype == MType::ConfirmedDataUp;
        let dev_addr = u32::from_le_bytes([d[1], d[2], d[3], d[4]]);

        // Encrypt FRMPayload
        if payload_len > 0 {
            securityhelpers::cipher_frm_payload(
                sm,
                enc_desc,
                uplink,
                dev_addr,
                self.fcnt,
                &mut d[last_filled..last_filled + payload_len],
            );
        }

        // MIC set
        let mic = securityhelpers::calculate_data_mic(
            sm,
            KeyDesc::FNwkSInt,
            uplink,
            dev_addr,
            self.fcnt,
            &d[..last_filled + payload_len],
        );
        d[last_filled + payload_len..last_filled + payload_len + 4]
            .copy_from_slice(&mic.to_le_bytes());

        Ok(&d[..last_filled + payload_len + 4])
    }
}

/// JoinAcceptCreator serves for creating binary representation of the
/// physical payload of a JoinAccept.
pub struct JoinAcceptCreator<D> {
    data: D,
    with_c_f_list: bool,
}

impl<D: AsMut<[u8]>> JoinAcceptCreator<D> {
    /// Creates a well initialized JoinAcceptCreator over the provided buffer.
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < 17 {
            return Err(Error::BufferTooShort);
        }
        d[0] = 0x20;
        Ok(Self { data, with_c_f_list: false })
    }

    /// Sets the AppNonce of the JoinAccept.
    pub fn set_app_nonce<H: AsRef<[u8]>, T: Into<parser::AppNonce<H>>>(
        &mut self,
        app_nonce: T,
    ) -> &mut Self {
        let converted = app_nonce.into();
        self.data.as_mut()[1..4].copy_from_slice(converted.as_ref());

        self
    }

    /// Sets the network ID of the JoinAccept.
    pub fn set_net_id<H: AsRef<[u8]>, T: Into<parser::NwkAddr<H>>>(
        &mut self,
        net_id: T,
    ) -> &mut Self {
        let converted = net_id.into();
        self.data.as_mut()[4..7].copy_from_slice(converted.as_ref());

        self
    }

    /// Sets the device address of the JoinAccept.
    pub fn set_dev_addr<H: AsRef<[u8]>, T: Into<parser::DevAddr<H>>>(
        &mut self,
        dev_addr: T,
    ) -> &mut Self {
        let converted = dev_addr.into();
        self.data.as_mut()[7..11].copy_from_slice(converted.as_ref());

        self
    }

    /// Sets the DLSettings byte of the JoinAccept.
    pub fn set_dl_settings(&mut self, dl_settings: u8) -> &mut Self {
        self.data.as_mut()[11] = dl_settings;

        self
    }

    /// Sets the RX delay of the JoinAccept.
    pub fn set_rx_delay(&mut self, rx_delay: u8) -> &mut Self {
        self.data.as_mut()[12] = rx_delay;

        self
    }

    /// Sets a type-0 (frequency list) CFList, frequencies given in Hz.
    pub fn set_c_f_list(&mut self, freqs_hz: &[u32]) -> Result<&mut Self, Error> {
        if freqs_hz.len() > 5 {
            return Err(Error::BufferTooShort);
        }
        let d = self.data.as_mut();
        if d.len() < 33 {
            return Err(Error::BufferTooShort);
        }
        d[13..29].fill(0);
        for (i, fr) in freqs_hz.iter().enumerate() {
            let v = fr / 100;
            d[13 + i * 3] = v as u8;
            d[14 + i * 3] = (v >> 8) as u8;
            d[15 + i * 3] = (v >> 16) as u8;
        }
        self.with_c_f_list = true;

        Ok(self)
    }

    /// Sets a type-1 (channel mask) CFList.
    pub fn set_c_f_list_mask(&mut self, mask: &ChannelMask<9>) -> Result<&mut Self, Error> {
        let d = self.data.as_mut();
        if d.len() < 33 {
            return Err(Error::BufferTooShort);
        }
        d[13..29].fill(0);
        d[13..22].copy_from_slice(mask.as_ref());
        d[28] = 1;
        self.with_c_f_list = true;

        Ok(self)
    }

    /// Provides the binary representation of the encrypted JoinAccept
    /// physical payload with the MIC set.
    ///
    /// # Argument
    ///
    /// * key - the AppKey used for the MIC and for encryption (the
    ///   join-accept is encrypted with the AES *decrypt* primitive, which is
    ///   why this creator works on key material instead of a security
    ///   module).
    pub fn build(&mut self, key: &Aes128Key) -> Result<&[u8], Error> {
        let required_len = if self.with_c_f_list { 33 } else { 17 };
        let d = self.data.as_mut();
        if d.len() < required_len {
            return Err(Error::BufferTooShort);
        }
        let d = &mut d[..required_len];

        let mut mac = <cmac::Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(&key.0));
        mac.update(&d[..required_len - 4]);
        let tag = mac.finalize().into_bytes();
        d[required_len - 4..].copy_from_slice(&tag[..4]);

        let cipher = Aes128::new(GenericArray::from_slice(&key.0));
        for i in 0..((required_len - 1) >> 4) {
            let start = (i << 4) + 1;
            cipher.decrypt_block(GenericArray::from_mut_slice(&mut d[start..start + 16]));
        }

        Ok(d)
    }
}
