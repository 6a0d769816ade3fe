//! Provides types and methods for parsing LoRaWAN payloads.
//!
//! Parsed payloads are zero-copy views over the caller's buffer. Cryptography
//! (MIC verification, payload decryption, session key derivation) goes
//! through a [`SecurityModule`] so the parser never touches key material.

use crate::keys::{KeyDesc, Mic, SecurityModule};
use crate::maccommands::{ChannelMask, DLSettings, Frequency};
use crate::securityhelpers;

pub(crate) const MHDR_LEN: usize = 1;
pub(crate) const MIC_LEN: usize = 4;
pub(crate) const FPORT_LEN: usize = 1;
/// MHDR plus MIC.
pub const PHY_OVERHEAD: usize = MHDR_LEN + MIC_LEN;
/// FHDR without FOpts, plus FPort.
pub const DATA_OVERHEAD: usize = 4 + 1 + 2 + FPORT_LEN;
const JOIN_REQUEST_LEN: usize = 23;
const JOIN_ACCEPT_LEN: usize = 17;
const JOIN_ACCEPT_WITH_CFLIST_LEN: usize = 33;
/// MHDR + bare FHDR + MIC.
const PHY_PAYLOAD_MIN_LEN: usize = 12;

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    InvalidData,
    InvalidMic,
    InvalidMessageType,
    InvalidPayload,
    UnsupportedMajorVersion,
}

macro_rules! fixed_len_struct {
    (
        $(#[$outer:meta])*
        struct $type:ident[$size:expr];
    ) => {
        $(#[$outer])*
        #[derive(Debug, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type<T: AsRef<[u8]>>(T);

        impl<T: AsRef<[u8]>> $type<T> {
            fn new_from_raw(bytes: T) -> $type<T> {
                $type(bytes)
            }

            pub fn new(data: T) -> Option<$type<T>> {
                let bytes = data.as_ref();
                if bytes.len() != $size {
                    None
                } else {
                    Some($type(data))
                }
            }
        }

        impl<T: AsRef<[u8]> + Clone> Clone for $type<T> {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }

        impl<T: AsRef<[u8]> + Copy> Copy for $type<T> {
        }

        impl<T: AsRef<[u8]>, V: AsRef<[u8]>> PartialEq<$type<T>> for $type<V> {
            fn eq(&self, other: &$type<T>) -> bool {
                self.as_ref() == other.as_ref()
            }
        }

        impl<'a> From<&'a [u8; $size]> for $type<&'a [u8; $size]> {
            fn from(v: &'a [u8; $size]) -> Self {
                $type(v)
            }
        }

        impl From<[u8; $size]> for $type<[u8; $size]> {
            fn from(v: [u8; $size]) -> Self {
                $type(v)
            }
        }

        impl<T: AsRef<[u8]>> AsRef<[u8]> for $type<T> {
            fn as_ref(&self) -> &[u8] {
                self.0.as_ref()
            }
        }

        impl<T: AsRef<[u8]>> $type<T> {
            #[inline]
            pub fn to_owned(&self) -> $type<[u8; $size]> {
                let mut data = [0 as u8; $size];
                data.copy_from_slice(self.0.as_ref());
                $type(data)
            }
        }

        impl<T: AsRef<[u8]> + Default> Default for $type<T> {
            #[inline]
            fn default() -> $type<T> {
                $type(T::default())
            }
        }
    };
}

/// PhyPayload is a type that represents a physical LoRaWAN payload.
///
/// It can either be JoinRequest, JoinAccept, or DataPayload.
#[derive(Debug, PartialEq, Eq)]
pub enum PhyPayload<T> {
    JoinRequest(JoinRequestPayload<T>),
    JoinAccept(JoinAcceptPayload<T>),
    Data(DataPayload<T>),
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for PhyPayload<T> {
    fn as_ref(&self) -> &[u8] {
        match self {
            PhyPayload::JoinRequest(jr) => jr.as_bytes(),
            PhyPayload::JoinAccept(ja) => ja.as_bytes(),
            PhyPayload::Data(data) => data.as_bytes(),
        }
    }
}

/// JoinAcceptPayload is a type that represents a JoinAccept.
///
/// It can either be encrypted, for example as a result of the
/// [parse](fn.parse.html) function, or decrypted.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinAcceptPayload<T> {
    Encrypted(EncryptedJoinAcceptPayload<T>),
    Decrypted(DecryptedJoinAcceptPayload<T>),
}

impl<T: AsRef<[u8]>> AsPhyPayloadBytes for JoinAcceptPayload<T> {
    fn as_bytes(&self) -> &[u8] {
        match self {
            JoinAcceptPayload::Encrypted(e) => e.as_bytes(),
            JoinAcceptPayload::Decrypted(d) => d.as_bytes(),
        }
    }
}

/// DataPayload is a type that represents a ConfirmedDataUp, ConfirmedDataDown,
/// UnconfirmedDataUp or UnconfirmedDataDown.
#[derive(Debug, PartialEq, Eq)]
pub enum DataPayload<T> {
    Encrypted(EncryptedDataPayload<T>),
    Decrypted(DecryptedDataPayload<T>),
}

impl<T: AsRef<[u8]>> DataHeader for DataPayload<T> {
    fn as_data_bytes(&self) -> &[u8] {
        match self {
            DataPayload::Encrypted(data) => data.as_data_bytes(),
            DataPayload::Decrypted(data) => data.as_data_bytes(),
        }
    }
}

/// Trait with the sole purpose to make clear distinction in some
/// implementations between types that just happen to have AsRef and those
/// that want to have the given implementations (like MICAble and MHDRAble).
pub trait AsPhyPayloadBytes {
    fn as_bytes(&self) -> &[u8];
}

impl AsRef<[u8]> for dyn AsPhyPayloadBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Helper trait to add mic to all types that should have it.
pub trait MICAble {
    /// Gives the MIC of the PhyPayload.
    fn mic(&self) -> Mic;
}

impl<T: AsPhyPayloadBytes> MICAble for T {
    fn mic(&self) -> Mic {
        let data = self.as_bytes();
        let len = data.len();
        Mic([data[len - 4], data[len - 3], data[len - 2], data[len - 1]])
    }
}

/// Helper trait to add mhdr to all types that should have it.
pub trait MHDRAble {
    /// Gives the MHDR of the PhyPayload.
    fn mhdr(&self) -> MHDR;
}

/// Assumes at least one byte in the data.
impl<T: AsPhyPayloadBytes> MHDRAble for T {
    fn mhdr(&self) -> MHDR {
        let data = self.as_bytes();
        MHDR(data[0])
    }
}

/// JoinRequestPayload represents a JoinRequest.
///
/// It can be built either directly through the [new](#method.new) or using
/// the [parse](fn.parse.html) function.
#[derive(Debug, PartialEq, Eq)]
pub struct JoinRequestPayload<T>(T);

impl<T: AsRef<[u8]>> AsPhyPayloadBytes for JoinRequestPayload<T> {
    fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]>> JoinRequestPayload<T> {
    /// Creates a new JoinRequestPayload if the provided data is acceptable.
    pub fn new(data: T) -> Result<Self, Error> {
        if !Self::can_build_from(data.as_ref()) {
            Err(Error::InvalidData)
        } else {
            Ok(Self(data))
        }
    }

    fn can_build_from(bytes: &[u8]) -> bool {
        bytes.len() == JOIN_REQUEST_LEN && MHDR(bytes[0]).mtype() == MType::JoinRequest
    }

    /// Gives the AppEui of the JoinRequest in canonical byte order.
    pub fn app_eui(&self) -> EUI64<[u8; 8]> {
        eui_from_wire(&self.0.as_ref()[1..9])
    }

    /// Gives the DevEui of the JoinRequest in canonical byte order.
    pub fn dev_eui(&self) -> EUI64<[u8; 8]> {
        eui_from_wire(&self.0.as_ref()[9..17])
    }

    /// Gives the DevNonce of the JoinRequest.
    pub fn dev_nonce(&self) -> DevNonce<&[u8]> {
        DevNonce::new_from_raw(&self.0.as_ref()[17..19])
    }

    /// Verifies that the JoinRequest has correct MIC.
    pub fn validate_mic<S: SecurityModule>(&self, sm: &S, desc: KeyDesc) -> bool {
        let d = self.0.as_ref();
        self.mic() == Mic::from(securityhelpers::calculate_mic(sm, desc, &d[..d.len() - MIC_LEN]))
    }
}

/// EncryptedJoinAcceptPayload represents an encrypted JoinAccept.
///
/// It can be built either directly through the [new](#method.new) or using
/// the [parse](fn.parse.html) function.
#[derive(Debug, PartialEq, Eq)]
pub struct EncryptedJoinAcceptPayload<T>(T);

impl<T: AsRef<[u8]>> AsPhyPayloadBytes for EncryptedJoinAcceptPayload<T> {
    fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EncryptedJoinAcceptPayload<T> {
    /// Creates a new EncryptedJoinAcceptPayload if the provided data is
    /// acceptable.
    pub fn new(data: T) -> Result<Self, Error> {
        if Self::can_build_from(data.as_ref()) {
            Ok(Self(data))
        } else {
            Err(Error::InvalidData)
        }
    }

    fn can_build_from(bytes: &[u8]) -> bool {
        (bytes.len() == JOIN_ACCEPT_LEN || bytes.len() == JOIN_ACCEPT_WITH_CFLIST_LEN)
            && MHDR(bytes[0]).mtype() == MType::JoinAccept
    }

    /// Decrypts the EncryptedJoinAcceptPayload producing a
    /// DecryptedJoinAcceptPayload.
    ///
    /// The blocks after the MHDR are run through the ECB *encrypt* primitive,
    /// which is how LoRaWAN defines device-side join-accept decryption. This
    /// method consumes the payload as it reuses the underlying memory. It
    /// does not verify the MIC.
    pub fn decrypt<S: SecurityModule>(mut self, sm: &S, desc: KeyDesc) -> DecryptedJoinAcceptPayload<T> {
        {
            let bytes = self.0.as_mut();
            let len = bytes.len();

            let mut block = [0u8; 16];
            for i in 0..((len - MHDR_LEN) >> 4) {
                let start = (i << 4) + MHDR_LEN;
                block.copy_from_slice(&bytes[start..start + 16]);
                sm.ecb(desc, &mut block);
                bytes[start..start + 16].copy_from_slice(&block);
            }
        }
        DecryptedJoinAcceptPayload(self.0)
    }
}

/// DecryptedJoinAcceptPayload represents a decrypted JoinAccept.
#[derive(Debug, PartialEq, Eq)]
pub struct DecryptedJoinAcceptPayload<T>(T);

impl<T: AsRef<[u8]>> AsPhyPayloadBytes for DecryptedJoinAcceptPayload<T> {
    fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]>> DecryptedJoinAcceptPayload<T> {
    /// Verifies that the JoinAccept has correct MIC.
    pub fn validate_mic<S: SecurityModule>(&self, sm: &S, desc: KeyDesc) -> bool {
        let d = self.0.as_ref();
        self.mic() == Mic::from(securityhelpers::calculate_mic(sm, desc, &d[..d.len() - MIC_LEN]))
    }

    /// Gives the app nonce of the JoinAccept.
    pub fn app_nonce(&self) -> AppNonce<&[u8]> {
        AppNonce::new_from_raw(&self.0.as_ref()[1..4])
    }

    /// Gives the network ID of the JoinAccept.
    pub fn net_id(&self) -> NwkAddr<&[u8]> {
        NwkAddr::new_from_raw(&self.0.as_ref()[4..7])
    }

    /// Gives the device address of the JoinAccept.
    pub fn dev_addr(&self) -> DevAddr<&[u8]> {
        DevAddr::new_from_raw(&self.0.as_ref()[7..11])
    }

    /// Gives the downlink configuration of the JoinAccept.
    pub fn dl_settings(&self) -> DLSettings {
        DLSettings::new(self.0.as_ref()[11])
    }

    /// Gives the RX delay of the JoinAccept in whole seconds. The reserved
    /// value 0 reads as 1.
    pub fn rx_delay(&self) -> u8 {
        match self.0.as_ref()[12] & 0x0f {
            0 => 1,
            d => d,
        }
    }

    /// Gives the channel frequency list of the JoinAccept.
    pub fn c_f_list(&self) -> Option<CfList<'_>> {
        if self.0.as_ref().len() == JOIN_ACCEPT_LEN {
            return None;
        }

        let d = self.0.as_ref();
        match d[28] {
            0 => Some(CfList::DynamicChannel([
                Frequency::new_from_raw(&d[13..16]),
                Frequency::new_from_raw(&d[16..19]),
                Frequency::new_from_raw(&d[19..22]),
                Frequency::new_from_raw(&d[22..25]),
                Frequency::new_from_raw(&d[25..28]),
            ])),
            1 => Some(CfList::FixedChannel(ChannelMask::new_from_raw(&d[13..22]))),
            _ => None,
        }
    }

    /// Derives the session key set from this JoinAccept.
    ///
    /// Issues `update_session_key` calls for every session descriptor; a
    /// 1.0.x security module collapses them onto NwkSKey and AppSKey.
    pub fn derive_session_keys<S: SecurityModule, N: AsRef<[u8]>>(
        &self,
        dev_nonce: &DevNonce<N>,
        sm: &mut S,
    ) {
        let mut iv = [0u8; 16];
        iv[1..4].copy_from_slice(self.app_nonce().as_ref());
        iv[4..7].copy_from_slice(self.net_id().as_ref());
        iv[7..9].copy_from_slice(dev_nonce.as_ref());

        iv[0] = 0x01;
        sm.update_session_key(KeyDesc::FNwkSInt, KeyDesc::Nwk, &iv);
        sm.update_session_key(KeyDesc::SNwkSInt, KeyDesc::Nwk, &iv);
        sm.update_session_key(KeyDesc::NwkSEnc, KeyDesc::Nwk, &iv);

        iv[0] = 0x02;
        sm.update_session_key(KeyDesc::AppS, KeyDesc::Nwk, &iv);
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> DecryptedJoinAcceptPayload<T> {
    /// Creates a DecryptedJoinAcceptPayload from the bytes of a JoinAccept.
    ///
    /// The payload is decrypted and the MIC is verified.
    pub fn new<S: SecurityModule>(data: T, sm: &S, desc: KeyDesc) -> Result<Self, Error> {
        let t = EncryptedJoinAcceptPayload::new(data)?;
        let res = t.decrypt(sm, desc);
        if res.validate_mic(sm, desc) {
            Ok(res)
        } else {
            Err(Error::InvalidMic)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CfList<'a> {
    DynamicChannel([Frequency<'a>; 5]),
    FixedChannel(ChannelMask<9>),
}

/// Helper trait for EncryptedDataPayload and DecryptedDataPayload.
///
/// NOTE: Does not check the payload size as that should be done prior to
/// building the object of the implementing type.
pub trait DataHeader {
    /// Equivalent to AsRef<[u8]>.
    fn as_data_bytes(&self) -> &[u8];

    /// Gives the FHDR of the DataPayload.
    fn fhdr(&self) -> FHDR<'_> {
        FHDR::new_from_raw(&self.as_data_bytes()[1..(1 + self.fhdr_length())], self.is_uplink())
    }

    /// Gives whether the frame is confirmed.
    fn is_confirmed(&self) -> bool {
        let mtype = MHDR(self.as_data_bytes()[0]).mtype();
        mtype == MType::ConfirmedDataUp || mtype == MType::ConfirmedDataDown
    }

    /// Gives whether the payload is uplink or not.
    fn is_uplink(&self) -> bool {
        let mtype = MHDR(self.as_data_bytes()[0]).mtype();
        mtype == MType::UnconfirmedDataUp || mtype == MType::ConfirmedDataUp
    }

    /// Gives the FPort of the DataPayload if there is one.
    fn f_port(&self) -> Option<u8> {
        let fhdr_length = self.fhdr_length();
        let data = self.as_data_bytes();
        if MHDR_LEN + fhdr_length + FPORT_LEN + MIC_LEN > data.len() {
            return None;
        }
        Some(data[1 + fhdr_length])
    }

    /// Gives the length of the FHDR field.
    fn fhdr_length(&self) -> usize {
        fhdr_length(self.as_data_bytes()[5])
    }
}

fn fhdr_length(b: u8) -> usize {
    7 + (b & 0x0f) as usize
}

fn eui_from_wire(bytes: &[u8]) -> EUI64<[u8; 8]> {
    EUI64::from([
        bytes[7], bytes[6], bytes[5], bytes[4], bytes[3], bytes[2], bytes[1], bytes[0],
    ])
}

impl<T: DataHeader> AsPhyPayloadBytes for T {
    fn as_bytes(&self) -> &[u8] {
        self.as_data_bytes()
    }
}

/// EncryptedDataPayload represents an encrypted data payload.
///
/// It can be built either directly through the [new](#method.new) or using
/// the [parse](fn.parse.html) function.
#[derive(Debug, PartialEq, Eq)]
pub struct EncryptedDataPayload<T>(T);

impl<T: AsRef<[u8]>> DataHeader for EncryptedDataPayload<T> {
    fn as_data_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]>> EncryptedDataPayload<T> {
    /// Creates a new EncryptedDataPayload if the provided data is acceptable.
    pub fn new(data: T) -> Result<Self, Error> {
        if Self::can_build_from(data.as_ref()) {
            Ok(Self(data))
        } else {
            Err(Error::InvalidData)
        }
    }

    fn can_build_from(bytes: &[u8]) -> bool {
        if bytes.len() < PHY_PAYLOAD_MIN_LEN || 5 + fhdr_length(bytes[5]) > bytes.len() {
            return false;
        }

        matches!(
            MHDR(bytes[0]).mtype(),
            MType::ConfirmedDataUp
                | MType::ConfirmedDataDown
                | MType::UnconfirmedDataUp
                | MType::UnconfirmedDataDown
        )
    }

    /// Verifies that the DataPayload has correct MIC.
    ///
    /// `fcnt` is the full 32-bit frame counter; the frame itself carries only
    /// the low half.
    pub fn validate_mic<S: SecurityModule>(&self, sm: &S, desc: KeyDesc, fcnt: u32) -> bool {
        let d = self.0.as_ref();
        let dev_addr = u32::from(&self.fhdr().dev_addr());
        let uplink = self.is_uplink();
        self.mic()
            == Mic::from(securityhelpers::calculate_data_mic(
                sm,
                desc,
                uplink,
                dev_addr,
                fcnt,
                &d[..d.len() - MIC_LEN],
            ))
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EncryptedDataPayload<T> {
    /// Decrypts the EncryptedDataPayload payload in place.
    ///
    /// Port 0 payload is keyed by `nwk_desc`, any other port by `app_desc`.
    /// This method consumes the EncryptedDataPayload as it reuses the
    /// underlying memory. It does not verify the MIC.
    pub fn decrypt<S: SecurityModule>(
        mut self,
        sm: &S,
        nwk_desc: KeyDesc,
        app_desc: KeyDesc,
        fcnt: u32,
    ) -> DecryptedDataPayload<T> {
        let fhdr_length = self.fhdr_length();
        let dev_addr = u32::from(&self.fhdr().dev_addr());
        let uplink = self.is_uplink();
        let desc = match self.f_port() {
            Some(0) | None => nwk_desc,
            Some(_) => app_desc,
        };
        let data = self.0.as_mut();
        let len = data.len();
        let start = MHDR_LEN + fhdr_length + FPORT_LEN;
        let end = len - MIC_LEN;
        if start < end {
            securityhelpers::cipher_frm_payload(
                sm,
                desc,
                uplink,
                dev_addr,
                fcnt,
                &mut data[start..end],
            );
        }

        DecryptedDataPayload(self.0)
    }

    /// Verifies the MIC and decrypts the payload if the MIC matches.
    ///
    /// If the MIC does not match, the original EncryptedDataPayload is
    /// returned so it can be tried against another session.
    pub fn decrypt_if_mic_ok<S: SecurityModule>(
        self,
        sm: &S,
        nwk_desc: KeyDesc,
        app_desc: KeyDesc,
        fcnt: u32,
    ) -> Result<DecryptedDataPayload<T>, Self> {
        if !self.validate_mic(sm, nwk_desc, fcnt) {
            Err(self)
        } else {
            Ok(self.decrypt(sm, nwk_desc, app_desc, fcnt))
        }
    }
}

/// DecryptedDataPayload represents a decrypted DataPayload.
#[derive(Debug, PartialEq, Eq)]
pub struct DecryptedDataPayload<T>(T);

impl<T> DecryptedDataPayload<T> {
    pub fn to_inner(self) -> T {
        self.0
    }
}

impl<T: AsRef<[u8]>> DataHeader for DecryptedDataPayload<T> {
    fn as_data_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<T: AsRef<[u8]>> DecryptedDataPayload<T> {
    /// Returns FRMPayload that can represent either application payload or
    /// mac commands if fport is 0.
    pub fn frm_payload(&self) -> FRMPayload<'_> {
        let data = self.as_data_bytes();
        let len = data.len();
        let fhdr_length = self.fhdr_length();
        if self.f_port().is_none() {
            FRMPayload::None
        } else if self.f_port() != Some(0) {
            FRMPayload::Data(&data[(1 + fhdr_length + 1)..(len - 4)])
        } else {
            FRMPayload::MACCommands(FRMMacCommands::new(
                &data[(1 + fhdr_length + 1)..(len - 4)],
                self.is_uplink(),
            ))
        }
    }
}

/// Parses a payload as LoRaWAN physical payload.
///
/// Returns error "UnsupportedMajorVersion" if the major version is
/// unsupported.
///
/// # Argument
///
/// * data - the data from which the PhyPayload is to be built.
pub fn parse<T: AsRef<[u8]> + AsMut<[u8]>>(data: T) -> Result<PhyPayload<T>, Error> {
    let bytes = data.as_ref();
    // Enough data for the smallest payload?
    if bytes.len() < PHY_PAYLOAD_MIN_LEN {
        return Err(Error::InvalidPayload);
    }
    let mhdr = MHDR(bytes[0]);
    if mhdr.major() != Major::LoRaWANR1 {
        return Err(Error::UnsupportedMajorVersion);
    }
    match mhdr.mtype() {
        MType::JoinRequest => Ok(PhyPayload::JoinRequest(JoinRequestPayload::new(data)?)),
        MType::JoinAccept => Ok(PhyPayload::JoinAccept(JoinAcceptPayload::Encrypted(
            EncryptedJoinAcceptPayload::new(data)?,
        ))),
        MType::UnconfirmedDataUp
        | MType::ConfirmedDataUp
        | MType::UnconfirmedDataDown
        | MType::ConfirmedDataDown => {
            Ok(PhyPayload::Data(DataPayload::Encrypted(EncryptedDataPayload::new(data)?)))
        }
        _ => Err(Error::InvalidMessageType),
    }
}

/// MHDR represents LoRaWAN MHDR.
#[derive(Debug, PartialEq, Eq)]
pub struct MHDR(u8);

impl MHDR {
    pub fn new(byte: u8) -> MHDR {
        MHDR(byte)
    }

    /// Type of message PhyPayload is carrying.
    pub fn mtype(&self) -> MType {
        match self.0 >> 5 {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            6 => MType::RFU,
            _ => MType::Proprietary,
        }
    }

    /// Version of LoRaWAN payload format.
    pub fn major(&self) -> Major {
        if self.0.trailing_zeros() >= 2 {
            Major::LoRaWANR1
        } else {
            Major::RFU
        }
    }
}

impl From<u8> for MHDR {
    fn from(v: u8) -> Self {
        MHDR(v)
    }
}

/// MType gives the possible message types of the PhyPayload.
#[derive(Debug, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RFU,
    Proprietary,
}

/// Major gives the supported LoRaWAN payload formats.
#[derive(Debug, PartialEq, Eq)]
pub enum Major {
    LoRaWANR1,
    RFU,
}

fixed_len_struct! {
    /// EUI64 represents a 64-bit EUI stored in canonical (MSB-first) order.
    struct EUI64[8];
}

fixed_len_struct! {
    /// DevNonce represents a 16-bit device nonce stored in wire
    /// (little-endian) order.
    struct DevNonce[2];
}

impl From<DevNonce<[u8; 2]>> for u16 {
    fn from(v: DevNonce<[u8; 2]>) -> Self {
        u16::from_le_bytes(v.0)
    }
}

impl From<u16> for DevNonce<[u8; 2]> {
    fn from(v: u16) -> Self {
        Self::from(v.to_le_bytes())
    }
}

fixed_len_struct! {
    /// AppNonce represents a 24-bit network server nonce in wire order.
    struct AppNonce[3];
}

fixed_len_struct! {
    /// DevAddr represents a 32-bit device address stored in wire
    /// (little-endian) order.
    struct DevAddr[4];
}

impl<T: AsRef<[u8]>> From<&DevAddr<T>> for u32 {
    fn from(v: &DevAddr<T>) -> Self {
        let d = v.as_ref();
        u32::from_le_bytes([d[0], d[1], d[2], d[3]])
    }
}

impl From<u32> for DevAddr<[u8; 4]> {
    fn from(v: u32) -> Self {
        Self::from(v.to_le_bytes())
    }
}

fixed_len_struct! {
    /// NwkAddr represents a 24-bit network address in wire order.
    struct NwkAddr[3];
}

impl<T: AsRef<[u8]>> From<&NwkAddr<T>> for u32 {
    fn from(v: &NwkAddr<T>) -> Self {
        let d = v.as_ref();
        u32::from_le_bytes([d[0], d[1], d[2], 0])
    }
}

/// FHDR represents FHDR from DataPayload.
#[derive(Debug, PartialEq, Eq)]
pub struct FHDR<'a>(&'a [u8], bool);

impl<'a> FHDR<'a> {
    pub fn new_from_raw(bytes: &'a [u8], uplink: bool) -> FHDR<'a> {
        FHDR(bytes, uplink)
    }

    pub fn new(bytes: &'a [u8], uplink: bool) -> Option<FHDR<'a>> {
        let data_len = bytes.len();
        if data_len < 7 {
            return None;
        }
        if data_len < fhdr_length(bytes[4]) {
            return None;
        }
        Some(FHDR(bytes, uplink))
    }

    /// Gives the device address associated with the given payload.
    pub fn dev_addr(&self) -> DevAddr<&'a [u8]> {
        DevAddr::new_from_raw(&self.0[0..4])
    }

    /// Gives the FCtrl associated with the given payload.
    pub fn fctrl(&self) -> FCtrl {
        FCtrl(self.0[4], self.1)
    }

    /// Gives the truncated FCnt associated with the given payload.
    pub fn fcnt(&self) -> u16 {
        u16::from_le_bytes([self.0[5], self.0[6]])
    }

    /// Gives the size of FOpts.
    pub fn fopts_len(&self) -> u8 {
        FCtrl(self.0[4], self.1).f_opts_len()
    }

    /// Gives the FOpts bytes.
    pub fn data(&self) -> &'a [u8] {
        &self.0[7..(7 + self.fopts_len() as usize)]
    }
}

/// FCtrl represents the FCtrl from FHDR.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct FCtrl(pub u8, pub bool);

impl FCtrl {
    pub fn new(bytes: u8, uplink: bool) -> FCtrl {
        FCtrl(bytes, uplink)
    }

    /// Set ADR enabled.
    pub fn set_adr(&mut self) {
        self.0 |= 1 << 7;
    }

    /// Gives whether ADR is enabled or not.
    pub fn adr(&self) -> bool {
        self.0 >> 7 == 1
    }

    /// Set ADR ACK requested.
    pub fn set_adr_ack_req(&mut self) {
        self.0 |= 1 << 6;
    }

    /// Gives whether ADR ACK is requested.
    pub fn adr_ack_req(&self) -> bool {
        self.1 && self.0 & (1 << 6) != 0
    }

    /// Set the ack bit.
    pub fn set_ack(&mut self) {
        self.0 |= 1 << 5;
    }

    /// Gives whether ack bit is set.
    pub fn ack(&self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// Gives whether there are more payloads pending.
    pub fn f_pending(&self) -> bool {
        !self.1 && self.0 & (1 << 4) != 0
    }

    /// Gives the size of FOpts.
    pub fn f_opts_len(&self) -> u8 {
        self.0 & 0x0f
    }

    /// Gives the binary representation of the FCtrl.
    pub fn raw_value(&self) -> u8 {
        self.0
    }
}

/// FRMPayload represents the FRMPayload that can either be the application
/// data or mac commands.
#[derive(Debug, PartialEq, Eq)]
pub enum FRMPayload<'a> {
    Data(&'a [u8]),
    MACCommands(FRMMacCommands<'a>),
    None,
}

/// FRMMacCommands represents the mac commands.
#[derive(Debug, PartialEq, Eq)]
pub struct FRMMacCommands<'a>(pub(crate) bool, pub(crate) &'a [u8]);

impl<'a> FRMMacCommands<'a> {
    pub fn new(bytes: &'a [u8], uplink: bool) -> Self {
        FRMMacCommands(uplink, bytes)
    }

    pub fn data(&self) -> &'a [u8] {
        self.1
    }
}
