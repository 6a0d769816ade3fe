use loramac_codec::maccommandcreator::*;
use loramac_codec::maccommands::*;

macro_rules! test_helper {
    ( $cmd:ident, $data:ident, $name:ident, $type:ident, $size:expr, $( ( $method:ident, $val:expr ) ,)*) => {{
        {
            assert!($type::new(&[]).is_err());
            let res = $type::new(&$data[..]).unwrap();
            assert_eq!($type::len(), $size);
            $(
                assert_eq!(res.$method(), $val);
            )*
        }
    }};

    ( $cmd:ident, $name:ident, $type:ident ) => {{
        {
            let data = [];
            let mc = $cmd::$name($type::new(&data[..]));
            assert_eq!(mc.len(), 0);
        }
    }};
}

#[test]
fn test_link_check_req_new() {
    test_helper!(UplinkMacCommand, LinkCheckReq, LinkCheckReqPayload);
}

#[test]
fn test_link_check_ans_new() {
    let data = [0xa, 0x0f];
    test_helper!(
        DownlinkMacCommand,
        data,
        LinkCheckAns,
        LinkCheckAnsPayload,
        2,
        (margin, 10),
        (gateway_count, 15),
    );
}

#[test]
fn test_link_adr_req_new() {
    let data = [0x12, 0x04, 0x00, 0x45];
    let expected_channel_mask = ChannelMask::new(&[0x04, 0x00]).unwrap();
    test_helper!(
        DownlinkMacCommand,
        data,
        LinkADRReq,
        LinkADRReqPayload,
        4,
        (data_rate, 1),
        (tx_power, 2),
        (channel_mask, expected_channel_mask),
        (redundancy, Redundancy::new(0x45)),
    );
}

#[test]
fn test_link_adr_ans_new() {
    let examples = [
        ([0x00], false, false, false, false),
        ([0x01], true, false, false, false),
        ([0x02], false, true, false, false),
        ([0x04], false, false, true, false),
        ([0x07], true, true, true, true),
    ];
    assert!(LinkADRAnsPayload::new(&[]).is_err());
    for (v, e_cm, e_dr, e_power, e_ack) in &examples {
        let laa = LinkADRAnsPayload::new(&v[..]).unwrap();
        assert_eq!(LinkADRAnsPayload::len(), 1);
        assert_eq!(laa.channel_mask_ack(), *e_cm);
        assert_eq!(laa.data_rate_ack(), *e_dr);
        assert_eq!(laa.power_ack(), *e_power);
        assert_eq!(laa.ack(), *e_ack);
    }
}

#[test]
fn test_duty_cycle_req_new() {
    let data = [0x02];
    test_helper!(
        DownlinkMacCommand,
        data,
        DutyCycleReq,
        DutyCycleReqPayload,
        1,
        (max_duty_cycle_raw, 2),
    );
}

#[test]
fn test_rx_param_setup_req_new() {
    let data = [0x3b, 0x01, 0x02, 0x04];
    test_helper!(
        DownlinkMacCommand,
        data,
        RXParamSetupReq,
        RXParamSetupReqPayload,
        4,
        (dl_settings, DLSettings::new(0x3b)),
        (frequency, Frequency::new_from_raw(&data[1..])),
    );
    assert_eq!(DLSettings::new(0x3b).rx1_dr_offset(), 3);
    assert_eq!(DLSettings::new(0x3b).rx2_data_rate(), 11);
    assert_eq!(Frequency::new_from_raw(&data[1..]).value(), 0x0402_01 * 100);
}

#[test]
fn test_new_channel_req_new() {
    let data = [0x03, 0x01, 0x02, 0x04, 0x5a];
    test_helper!(
        DownlinkMacCommand,
        data,
        NewChannelReq,
        NewChannelReqPayload,
        5,
        (channel_index, 3),
        (frequency, Frequency::new_from_raw(&data[1..4])),
        (data_rate_range, DataRateRange::new_from_raw(0x5a)),
    );
    let drr = DataRateRange::new_from_raw(0x5a);
    assert_eq!(drr.max_data_rate(), 5);
    assert_eq!(drr.min_data_rate(), 10);
    assert!(DataRateRange::new(0x5a).is_err());
    assert!(DataRateRange::new(0xa5).is_ok());
}

#[test]
fn test_rx_timing_setup_req_new() {
    let data = [0x3b];
    test_helper!(
        DownlinkMacCommand,
        data,
        RXTimingSetupReq,
        RXTimingSetupReqPayload,
        1,
        (delay, 11),
    );
}

#[test]
fn test_tx_param_setup_req_new() {
    let data = [0x3f];
    let req = TXParamSetupReqPayload::new(&data[..]).unwrap();
    assert!(req.downlink_dwell_time());
    assert!(req.uplink_dwell_time());
    assert_eq!(req.max_eirp(), 36);
}

#[test]
fn test_dl_channel_req_new() {
    let data = [0x01, 0x02, 0x04, 0x08];
    test_helper!(
        DownlinkMacCommand,
        data,
        DlChannelReq,
        DlChannelReqPayload,
        4,
        (channel_index, 1),
        (frequency, Frequency::new_from_raw(&data[1..])),
    );
}

#[test]
fn test_dev_status_ans_margin_sign_extension() {
    let data = [0xfe, 0x3f];
    let ans = DevStatusAnsPayload::new(&data[..]).unwrap();
    assert_eq!(ans.battery(), 254);
    assert_eq!(ans.margin(), -1);

    let data = [0x00, 0x1f];
    assert_eq!(DevStatusAnsPayload::new(&data[..]).unwrap().margin(), 31);
}

#[test]
fn test_parse_downlink_stream() {
    // LinkADRReq + DutyCycleReq + RXTimingSetupReq back to back
    let data = [0x03, 0x50, 0xff, 0x00, 0x01, 0x04, 0x02, 0x08, 0x03];
    let cmds: Vec<DownlinkMacCommand<'_>> = parse_downlink_mac_commands(&data).collect();
    assert_eq!(cmds.len(), 3);
    assert!(matches!(cmds[0], DownlinkMacCommand::LinkADRReq(_)));
    assert!(matches!(cmds[1], DownlinkMacCommand::DutyCycleReq(_)));
    assert!(matches!(cmds[2], DownlinkMacCommand::RXTimingSetupReq(_)));
}

#[test]
fn test_parse_stops_on_unknown_tag() {
    // DutyCycleReq then an unknown CID; the rest is skipped silently
    let data = [0x04, 0x02, 0x60, 0x04, 0x01];
    let cmds: Vec<DownlinkMacCommand<'_>> = parse_downlink_mac_commands(&data).collect();
    assert_eq!(cmds.len(), 1);
    assert!(matches!(cmds[0], DownlinkMacCommand::DutyCycleReq(_)));
}

#[test]
fn test_parse_stops_on_truncated_command() {
    // LinkADRReq requires four payload bytes but only two are present
    let data = [0x03, 0x50, 0xff];
    assert_eq!(parse_downlink_mac_commands(&data).count(), 0);
}

#[test]
fn test_creators_serialize_expected_bytes() {
    let mut adr_ans = LinkADRAnsCreator::new();
    adr_ans.set_channel_mask_ack(true).set_data_rate_ack(false).set_tx_power_ack(true);
    assert_eq!(adr_ans.build(), [0x03, 0x05]);

    let mut rx_param = RXParamSetupAnsCreator::new();
    rx_param.set_channel_ack(true).set_rx2_data_rate_ack(true).set_rx1_dr_offset_ack(true);
    assert_eq!(rx_param.build(), [0x05, 0x07]);

    let mut dev_status = DevStatusAnsCreator::new();
    dev_status.set_battery(254).set_margin(-1);
    assert_eq!(dev_status.build(), [0x06, 0xfe, 0x3f]);

    let mut dl_channel = DlChannelAnsCreator::new();
    dl_channel.set_channel_frequency_ack(true).set_uplink_frequency_ack(true);
    assert_eq!(dl_channel.build(), [0x0a, 0x03]);

    assert_eq!(RXTimingSetupAnsCreator::new().build(), [0x08]);
    assert_eq!(LinkCheckReqCreator::new().build(), [0x02]);
    assert_eq!(DutyCycleAnsCreator::new().build(), [0x04]);
}

#[test]
fn test_build_mac_commands() {
    let mut adr_ans = LinkADRAnsCreator::new();
    adr_ans.set_channel_mask_ack(true).set_data_rate_ack(true).set_tx_power_ack(true);
    let link_check = LinkCheckReqCreator::new();
    let cmds: [&dyn SerializableMacCommand; 2] = [&adr_ans, &link_check];

    assert_eq!(mac_commands_len(&cmds), 3);

    let mut out = [0u8; 8];
    let len = build_mac_commands(&cmds, &mut out).unwrap();
    assert_eq!(&out[..len], &[0x03, 0x07, 0x02]);

    let mut small = [0u8; 2];
    assert!(build_mac_commands(&cmds, &mut small).is_err());
}
