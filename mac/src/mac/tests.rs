use super::*;
use crate::testutil::*;

use loramac_codec::creator::DataPayloadCreator as DownlinkCreator;
use loramac_codec::default_sm::DefaultSecurityModule;
use loramac_codec::keys::Aes128Key;
use loramac_codec::maccommandcreator::{LinkADRReqCreator, RXParamSetupReqCreator};
use loramac_codec::maccommands::{
    parse_uplink_mac_commands, SerializableMacCommand, UplinkMacCommand,
};
use loramac_codec::parser as codec_parser;
use loramac_codec::parser::DataHeader;

/// The spec §8.2 vector: appKey of all zeroes carrying all-zero fields.
const JOIN_ACCEPT: [u8; 17] = [
    0x20, 0xe3, 0xde, 0x10, 0x87, 0x95, 0xf7, 0x76, 0xb8, 0x03, 0x76, 0x10, 0xef, 0x78, 0x69,
    0xb5, 0xb3,
];

/// A security module loaded with the device's current session keys, playing
/// the network side.
fn network_sm(bench: &Bench) -> DefaultSecurityModule {
    let (nwk, app) = bench.mac.security_module().session_keys();
    let mut sm = DefaultSecurityModule::new(Aes128Key([0; 16]));
    sm.set_session_keys(nwk, app);
    sm
}

/// Build a downlink data frame for the bench device.
fn downlink(
    bench: &Bench,
    fcnt: u32,
    fctrl: codec_parser::FCtrl,
    f_port: Option<u8>,
    payload: &[u8],
    cmds: &[&dyn SerializableMacCommand],
) -> Vec<u8> {
    let sm = network_sm(bench);
    let mut buf = [0u8; 255];
    let mut phy = DownlinkCreator::new(&mut buf[..]).unwrap();
    phy.set_uplink(false)
        .set_confirmed(false)
        .set_dev_addr(bench.mac.session().dev_addr.to_le_bytes())
        .set_fctrl(&fctrl)
        .set_fcnt(fcnt);
    if let Some(port) = f_port {
        phy.set_f_port(port);
    }
    phy.build(payload, cmds, &sm).unwrap().to_vec()
}

/// Boot to idle and wait out the 60s cold-start lockout.
fn boot_and_unlock(bench: &mut Bench) {
    bench.boot();
    assert!(bench.log.contains(&Logged::Reset));
    assert!(bench.log.contains(&Logged::Startup(0xdeadbeef)));
    bench.wait_ready();
    bench.log.take();
}

/// Run the full OTAA exchange against the all-zero join-accept.
fn join(bench: &mut Bench) {
    boot_and_unlock(bench);
    assert!(bench.mac.otaa());
    assert_eq!(bench.mac.op(), Op::Joining);

    // dithered transmit
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    assert_eq!(bench.mac.state(), State::Tx);
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);

    // open RX1 and answer there
    assert_eq!(bench.mac.state(), State::WaitRx1);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Rx1);
    bench.radio.inject(&JOIN_ACCEPT, -80, 7);
    bench.signal(DIO_RX_READY);

    assert!(bench.log.contains(&Logged::JoinComplete));
    assert!(bench.mac.joined());
    assert_eq!(bench.mac.state(), State::Idle);
    assert_eq!(bench.mac.op(), Op::None);
    bench.log.take();
}

/// Drive a queued uplink through TX and both (empty) receive windows.
fn uplink_no_downlink(bench: &mut Bench) {
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Rx1);
    bench.signal(DIO_RX_TIMEOUT);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Rx2);
    bench.signal(DIO_RX_TIMEOUT);
    assert_eq!(bench.mac.state(), State::Idle);
}

#[test]
fn cold_start_reaches_idle_through_reset_cycle() {
    let mut bench = Bench::new(Region::Eu868);
    assert_eq!(bench.mac.state(), State::Init);

    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::InitReset);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::InitLockout);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Entropy);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Idle);

    assert_eq!(
        bench.log.take(),
        vec![Logged::Reset, Logged::Startup(0xdeadbeef)]
    );
    // the radio was held in reset and released
    let modes = bench.radio.0.borrow().modes.clone();
    assert_eq!(modes[..3], [Mode::Boot, Mode::Reset, Mode::Boot]);
}

#[test]
fn cold_start_otaa_stalls_through_the_lockout() {
    let mut bench = Bench::new(Region::Eu868);
    bench.boot();

    // the aggregate band is still locked out; the request is accepted and
    // the transmission stalls until the lockout expires
    assert!(!bench.mac.ready());
    assert!(bench.mac.otaa());
    assert_eq!(bench.mac.state(), State::WaitTx);
    assert_eq!(bench.mac.join_trial, 0);

    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }

    // first transmission lands within 61s of power-on
    assert!(bench.now() < 61 * TPS);
    let (settings, frame) = bench.radio.take_tx().unwrap();
    assert!([868_100_000, 868_300_000, 868_500_000].contains(&settings.freq));
    // join rate 5 is SF7
    assert_eq!(settings.sf, SpreadingFactor::_7);
    assert_eq!(frame.len(), 23);
    assert_eq!(frame[0], 0x00);
    assert_eq!(bench.mac.join_trial, 0);
}

#[test]
fn otaa_join_accept_installs_session() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    let session = bench.mac.session();
    assert_eq!(session.dev_addr, 0);
    assert_eq!(session.net_id, 0);
    assert_eq!(session.rx1_dr_offset, 0);
    assert_eq!(session.rx2_data_rate, 0);
    // the reserved zero delay reads as one second
    assert_eq!(session.rx1_delay, 1);
    assert_eq!(session.up, 0);
    assert_eq!(session.down, 0);
    // one nonce consumed
    assert_eq!(session.dev_nonce, 1);

    let (nwk, app) = bench.mac.security_module().session_keys();
    assert_ne!(nwk, Aes128Key::default());
    assert_ne!(app, Aes128Key::default());
    assert_ne!(nwk, app);
}

#[test]
fn join_timeout_schedules_backoff_and_walks_rates() {
    let mut bench = Bench::new(Region::Eu868);
    boot_and_unlock(&mut bench);
    assert!(bench.mac.otaa());

    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    let (settings, _) = bench.radio.take_tx().unwrap();
    assert_eq!(settings.sf, SpreadingFactor::_7);
    bench.signal(DIO_TX_COMPLETE);

    assert!(bench.step());
    bench.signal(DIO_RX_TIMEOUT);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Rx2);
    bench.signal(DIO_RX_TIMEOUT);

    let retry_ms = match bench.log.take().iter().rev().find_map(|e| match e {
        Logged::JoinTimeout(ms) => Some(*ms),
        _ => None,
    }) {
        Some(ms) => ms,
        None => panic!("no join timeout event"),
    };
    assert!(retry_ms > 0);
    assert_eq!(bench.mac.state(), State::WaitRetry);
    assert_eq!(bench.mac.join_trial, 1);

    // the second trial drops one join rate: SF8
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    let (settings, _) = bench.radio.take_tx().unwrap();
    assert_eq!(settings.sf, SpreadingFactor::_8);
}

#[test]
fn channel_rotation_excludes_previous_channel() {
    let mut bench = Bench::new(Region::Eu868);
    boot_and_unlock(&mut bench);

    for _ in 0..1000 {
        let (ch, freq) = bench.mac.select_channel(DEFAULT_RATE, 1).unwrap();
        assert!(ch == 0 || ch == 2, "channel {} should have been excluded", ch);
        assert!(freq == 868_100_000 || freq == 868_500_000);
    }

    // a single available channel is not excluded
    bench.mac.session.mask_channel(Region::Eu868, 0);
    bench.mac.session.mask_channel(Region::Eu868, 2);
    for _ in 0..10 {
        let (ch, _) = bench.mac.select_channel(DEFAULT_RATE, 1).unwrap();
        assert_eq!(ch, 1);
    }
}

#[test]
fn uplink_counter_and_frame_content() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.unconfirmed_data(1, b"hello"));
    assert_eq!(bench.mac.session().up, 1);

    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    let (_, mut frame) = bench.radio.take_tx().unwrap();

    let sm = network_sm(&bench);
    match codec_parser::parse(&mut frame[..]).unwrap() {
        codec_parser::PhyPayload::Data(codec_parser::DataPayload::Encrypted(phy)) => {
            assert!(phy.is_uplink());
            assert_eq!(phy.fhdr().fcnt(), 1);
            assert!(phy.fhdr().fctrl().adr());
            assert!(phy.validate_mic(&sm, loramac_codec::keys::KeyDesc::FNwkSInt, 1));
            let decrypted = phy.decrypt(
                &sm,
                loramac_codec::keys::KeyDesc::NwkSEnc,
                loramac_codec::keys::KeyDesc::AppS,
                1,
            );
            assert_eq!(decrypted.f_port(), Some(1));
            match decrypted.frm_payload() {
                codec_parser::FRMPayload::Data(data) => assert_eq!(data, b"hello"),
                other => panic!("unexpected payload {:?}", other),
            }
        }
        other => panic!("unexpected uplink {:?}", other),
    }

    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    bench.signal(DIO_RX_TIMEOUT);
    assert!(bench.step());
    bench.signal(DIO_RX_TIMEOUT);
    assert!(bench.log.contains(&Logged::DataComplete));
}

#[test]
fn api_preconditions_set_errno() {
    let mut bench = Bench::new(Region::Eu868);
    boot_and_unlock(&mut bench);

    assert!(!bench.mac.unconfirmed_data(1, b"x"));
    assert_eq!(bench.mac.errno(), Errno::NotJoined);

    join(&mut bench);

    assert!(!bench.mac.unconfirmed_data(0, b"x"));
    assert_eq!(bench.mac.errno(), Errno::Port);
    assert!(!bench.mac.unconfirmed_data(224, b"x"));
    assert_eq!(bench.mac.errno(), Errno::Port);

    // DR0 carries at most 59 - 8 application bytes
    assert!(bench.mac.set_rate(0));
    let big = [0u8; 52];
    assert!(!bench.mac.unconfirmed_data(1, &big));
    assert_eq!(bench.mac.errno(), Errno::Size);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    assert!(!bench.mac.unconfirmed_data(1, b"y"));
    assert_eq!(bench.mac.errno(), Errno::Busy);
}

#[test]
fn duty_cycle_off_time_blocks_the_band() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert_eq!(bench.mac.ticks_until_next_channel(), 0);
    assert!(bench.mac.unconfirmed_data(1, b"x"));
    uplink_no_downlink(&mut bench);

    // all three default channels share one 1% band
    let wait = bench.mac.ticks_until_next_channel();
    assert!(wait > 0);
    assert!(!bench.mac.ready());
    bench.wait_ready();

    // an aggregated limit arms the combined timer as airTime * 2^limit
    bench.mac.set_aggregated_duty_cycle_limit(12);
    assert!(bench.mac.unconfirmed_data(1, b"x"));
    uplink_no_downlink(&mut bench);
    // the session kept the joining rate (5, SF7)
    let band_wait = 100 * transmit_time_up(
        Bandwidth::_125KHz,
        SpreadingFactor::_7,
        bench.mac.buffer_len as u8,
        TPS,
    );
    let wait = bench.mac.ticks_until_next_channel();
    // 2^12 dominates the 1% band factor
    assert!(wait > band_wait);
    bench.mac.set_aggregated_duty_cycle_limit(0);
}

#[test]
fn adr_walks_down_power_then_rate_then_unmasks() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);
    assert!(bench.mac.set_rate(5));
    assert!(bench.mac.set_power(3));

    let mut uplinks = 0;
    let mut send_one = |bench: &mut Bench| {
        bench.wait_ready();
        assert!(bench.mac.unconfirmed_data(1, b"x"));
        uplink_no_downlink(bench);
    };

    while uplinks < 64 {
        send_one(&mut bench);
        uplinks += 1;
    }
    assert!(bench.mac.adr_ack_req);
    assert_eq!(bench.mac.session().power, 3);
    assert_eq!(bench.mac.session().rate, 5);

    while uplinks < 96 {
        send_one(&mut bench);
        uplinks += 1;
    }
    assert_eq!(bench.mac.session().power, 0);
    assert_eq!(bench.mac.session().rate, 5);

    while uplinks < 128 {
        send_one(&mut bench);
        uplinks += 1;
    }
    assert_eq!(bench.mac.session().rate, 4);

    // keep walking down to the default rate, then the final step unmasks
    // every channel and pins the counter
    while uplinks < 224 {
        send_one(&mut bench);
        uplinks += 1;
    }
    assert_eq!(bench.mac.session().rate, DEFAULT_RATE);
    assert_eq!(bench.mac.adr_ack_counter, u8::MAX);
    for ch in 0..Region::Eu868.num_channels() {
        assert!(!bench.mac.session().channel_is_masked(Region::Eu868, ch));
    }
}

#[test]
fn sticky_rx_param_setup_ans_survives_until_transmitted() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Rx1);

    let mut req = RXParamSetupReqCreator::new();
    req.set_dl_settings(0x12).set_frequency(868_800_000);
    let frame = downlink(
        &bench,
        0,
        codec_parser::FCtrl::new(0, false),
        None,
        &[],
        &[&req],
    );
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);

    // the request applied and the answer is pending
    assert_eq!(bench.mac.session().rx1_dr_offset, 1);
    assert_eq!(bench.mac.session().rx2_data_rate, 2);
    assert_eq!(bench.mac.session().rx2_freq, 868_800_000);
    assert_eq!(bench.mac.rx_param_setup_ans, Some(0x07));

    // an immediate MAC-only uplink goes out carrying the answer; the flag
    // survives queueing and clears only once transmission completes
    assert_eq!(bench.mac.op(), Op::DataUnconfirmed);
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    assert_eq!(bench.mac.rx_param_setup_ans, Some(0x07));

    let (_, mut frame) = bench.radio.take_tx().unwrap();
    let sm = network_sm(&bench);
    match codec_parser::parse(&mut frame[..]).unwrap() {
        codec_parser::PhyPayload::Data(codec_parser::DataPayload::Encrypted(phy)) => {
            let fcnt = u32::from(phy.fhdr().fcnt());
            assert!(phy.validate_mic(&sm, loramac_codec::keys::KeyDesc::FNwkSInt, fcnt));
            let cmds: Vec<UplinkMacCommand<'_>> =
                parse_uplink_mac_commands(phy.fhdr().data()).collect();
            assert!(matches!(cmds[0], UplinkMacCommand::RXParamSetupAns(_)));
        }
        other => panic!("unexpected uplink {:?}", other),
    }

    bench.signal(DIO_TX_COMPLETE);
    assert_eq!(bench.mac.rx_param_setup_ans, None);
}

#[test]
fn adr_block_with_bad_rate_rolls_back_atomically() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    let before = bench.mac.session().clone();

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());

    let mut first = LinkADRReqCreator::new();
    first.set_data_rate(4).unwrap();
    first.set_tx_power(0).unwrap();
    first.set_channel_mask([0x07, 0x00]);
    first.set_redundancy(0x02);
    let mut second = LinkADRReqCreator::new();
    // EU868 has no uplink rate 7
    second.set_data_rate(7).unwrap();
    second.set_tx_power(0).unwrap();
    second.set_channel_mask([0x07, 0x00]);
    second.set_redundancy(0x03);

    let frame = downlink(
        &bench,
        0,
        codec_parser::FCtrl::new(0, false),
        Some(0),
        &[],
        &[&first, &second],
    );
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);

    // rate, power, nbTrans and mask are untouched
    let after = bench.mac.session();
    assert_eq!(after.rate, before.rate);
    assert_eq!(after.power, before.power);
    assert_eq!(after.nb_trans, before.nb_trans);
    assert_eq!(after.mask, before.mask);

    // exactly one LinkADRAns reporting the data rate failure
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    let (_, mut frame) = bench.radio.take_tx().unwrap();
    let sm = network_sm(&bench);
    match codec_parser::parse(&mut frame[..]).unwrap() {
        codec_parser::PhyPayload::Data(codec_parser::DataPayload::Encrypted(phy)) => {
            let fcnt = u32::from(phy.fhdr().fcnt());
            let decrypted = phy.decrypt(
                &sm,
                loramac_codec::keys::KeyDesc::NwkSEnc,
                loramac_codec::keys::KeyDesc::AppS,
                fcnt,
            );
            let data = decrypted.fhdr().data().to_vec();
            let cmds: Vec<UplinkMacCommand<'_>> = parse_uplink_mac_commands(&data).collect();
            assert_eq!(cmds.len(), 1);
            match &cmds[0] {
                UplinkMacCommand::LinkADRAns(ans) => {
                    assert!(ans.channel_mask_ack());
                    assert!(!ans.data_rate_ack());
                    assert!(ans.power_ack());
                }
                other => panic!("unexpected answer {:?}", other),
            }
        }
        other => panic!("unexpected uplink {:?}", other),
    }
}

#[test]
fn confirmed_data_acked_and_nacked() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    // ACK bit set: the confirmed operation completes
    assert!(bench.mac.confirmed_data(5, b"ping"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    let mut fctrl = codec_parser::FCtrl::new(0, false);
    fctrl.set_ack();
    let frame = downlink(&bench, 0, fctrl, Some(7), b"pong", &[]);
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);
    let events = bench.log.take();
    assert!(events.contains(&Logged::DataComplete));
    assert!(events.contains(&Logged::Rx { counter: 0, port: 7, data: b"pong".to_vec() }));
    assert_eq!(bench.mac.session().down, 1);

    // downlink without the ACK bit: the operation is not acknowledged
    bench.wait_ready();
    assert!(bench.mac.confirmed_data(5, b"ping"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    let frame = downlink(&bench, 1, codec_parser::FCtrl::new(0, false), None, &[], &[]);
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);
    assert!(bench.log.take().contains(&Logged::DataNak));
    assert_eq!(bench.mac.session().down, 2);
}

#[test]
fn downlink_counter_window_is_enforced() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());

    // exactly MaxFCNTGap ahead: dropped, counter untouched
    let frame =
        downlink(&bench, 16384, codec_parser::FCtrl::new(0, false), Some(3), b"no", &[]);
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);
    assert_eq!(bench.mac.session().down, 0);
    let events = bench.log.take();
    assert!(!events.iter().any(|e| matches!(e, Logged::Rx { .. })));

    // one below the gap is accepted
    bench.wait_ready();
    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    let frame =
        downlink(&bench, 16383, codec_parser::FCtrl::new(0, false), Some(3), b"ok", &[]);
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);
    assert_eq!(bench.mac.session().down, 16384);
    assert!(bench
        .log
        .take()
        .contains(&Logged::Rx { counter: 16383, port: 3, data: b"ok".to_vec() }));
}

#[test]
fn bad_mic_downlink_is_dropped_silently() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());

    let mut frame =
        downlink(&bench, 0, codec_parser::FCtrl::new(0, false), Some(3), b"evil", &[]);
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);

    assert_eq!(bench.mac.session().down, 0);
    let events = bench.log.take();
    assert!(!events.iter().any(|e| matches!(e, Logged::Rx { .. })));
    // the operation still completes as if nothing arrived
    assert!(events.contains(&Logged::DataComplete));
}

#[test]
fn cancel_returns_to_idle_and_sleeps_radio() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    assert_eq!(bench.mac.state(), State::WaitTx);
    bench.mac.cancel();
    assert_eq!(bench.mac.state(), State::Idle);
    assert_eq!(bench.mac.op(), Op::None);
    assert_eq!(bench.radio.last_mode(), Some(Mode::Sleep));

    // cancelling in idle is a no-op
    bench.mac.cancel();
    assert_eq!(bench.mac.state(), State::Idle);
}

#[test]
fn chip_error_triggers_recovery_and_preserves_session() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }

    // never signal tx-complete; the watchdog fires at double the air time
    assert!(bench.step());
    assert!(bench.log.contains(&Logged::ChipError));
    assert_eq!(bench.mac.state(), State::RecoveryReset);

    // recovery walks the same reset cycle with the longer lockout
    bench.boot();
    assert!(bench.log.contains(&Logged::Startup(0xdeadbeef)));
    assert!(bench.mac.joined());
}

#[test]
fn forget_wipes_session_but_keeps_dev_nonce() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);
    assert_eq!(bench.mac.session().dev_nonce, 1);

    bench.mac.forget();
    assert!(!bench.mac.joined());
    assert_eq!(bench.mac.session().dev_nonce, 1);
    assert_eq!(bench.mac.session().up, 0);
}

#[test]
fn session_round_trips_through_persistence() {
    let saved = {
        let mut bench = Bench::new(Region::Eu868);
        join(&mut bench);
        assert!(bench.mac.unconfirmed_data(1, b"x"));
        uplink_no_downlink(&mut bench);
        let saved = bench.platform.0.borrow().saved.clone().unwrap();
        saved
    };

    let platform = TestPlatform::new();
    platform.0.borrow_mut().restore = Some(saved);
    let mut bench = Bench::with_platform(Region::Eu868, platform);
    bench.boot();

    assert!(bench.mac.joined());
    assert_eq!(bench.mac.session().up, 1);
    assert_eq!(bench.mac.session().dev_nonce, 1);
}

#[test]
fn mtu_accounts_for_pending_answers() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    // ADR kept the joining rate (5), which allows 250 bytes of MAC payload,
    // 8 of which are header
    assert_eq!(bench.mac.mtu(), 242);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    bench.radio.take_tx();
    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());

    let mut req = RXParamSetupReqCreator::new();
    req.set_dl_settings(0x00).set_frequency(869_525_000);
    let frame = downlink(
        &bench,
        0,
        codec_parser::FCtrl::new(0, false),
        None,
        &[],
        &[&req],
    );
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);

    // the sticky answer costs two bytes until it is transmitted
    assert_eq!(bench.mac.mtu(), 240);
}

#[test]
fn link_check_piggybacks_and_reports_status() {
    let mut bench = Bench::new(Region::Eu868);
    join(&mut bench);

    assert!(bench.mac.check(false));
    assert!(bench.mac.link_check_pending);

    assert!(bench.mac.unconfirmed_data(1, b"x"));
    // queueing the uplink consumed the request
    assert!(!bench.mac.link_check_pending);
    while bench.radio.0.borrow().tx.is_none() {
        assert!(bench.step());
    }
    let (_, mut frame) = bench.radio.take_tx().unwrap();
    match codec_parser::parse(&mut frame[..]).unwrap() {
        codec_parser::PhyPayload::Data(codec_parser::DataPayload::Encrypted(phy)) => {
            let cmds: Vec<UplinkMacCommand<'_>> =
                parse_uplink_mac_commands(phy.fhdr().data()).collect();
            assert!(matches!(cmds[0], UplinkMacCommand::LinkCheckReq(_)));
        }
        other => panic!("unexpected uplink {:?}", other),
    }

    bench.signal(DIO_TX_COMPLETE);
    assert!(bench.step());
    assert_eq!(bench.mac.state(), State::Rx1);

    let mut ans = loramac_codec::maccommandcreator::LinkCheckAnsCreator::new();
    ans.set_margin(20).set_gateway_count(3);
    let frame = downlink(
        &bench,
        0,
        codec_parser::FCtrl::new(0, false),
        None,
        &[],
        &[&ans],
    );
    bench.radio.inject(&frame, -90, 5);
    bench.signal(DIO_RX_READY);

    assert!(bench
        .log
        .take()
        .contains(&Logged::LinkStatus { margin: 20, gw_count: 3 }));
}
