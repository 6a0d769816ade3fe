//! Frame-level crypto constructions shared by the parser and the creators.
use crate::keys::{KeyDesc, SecurityModule};

/// The A/B block layout common to the data MIC and the payload cipher.
/// Counters are the full 32-bit values; only the low half appears in the
/// frame header.
fn block(first: u8, uplink: bool, dev_addr: u32, fcnt: u32, last: u8) -> [u8; 16] {
    let addr = dev_addr.to_le_bytes();
    let cnt = fcnt.to_le_bytes();
    [
        first,
        0,
        0,
        0,
        0,
        if uplink { 0 } else { 1 },
        addr[0],
        addr[1],
        addr[2],
        addr[3],
        cnt[0],
        cnt[1],
        cnt[2],
        cnt[3],
        0,
        last,
    ]
}

pub(crate) fn calculate_mic<S: SecurityModule>(sm: &S, desc: KeyDesc, msg: &[u8]) -> u32 {
    sm.mic(desc, &[], msg)
}

pub(crate) fn calculate_data_mic<S: SecurityModule>(
    sm: &S,
    desc: KeyDesc,
    uplink: bool,
    dev_addr: u32,
    fcnt: u32,
    msg: &[u8],
) -> u32 {
    let b0 = block(0x49, uplink, dev_addr, fcnt, msg.len() as u8);
    sm.mic(desc, &b0, msg)
}

pub(crate) fn cipher_frm_payload<S: SecurityModule>(
    sm: &S,
    desc: KeyDesc,
    uplink: bool,
    dev_addr: u32,
    fcnt: u32,
    data: &mut [u8],
) {
    let iv = block(0x01, uplink, dev_addr, fcnt, 0);
    sm.ctr(desc, &iv, data);
}
