//! Downlink MAC command processing and uplink answer synthesis.
//!
//! Commands mutate a shadow copy of the session. Adjacent LinkADRReq
//! commands form one atomic block answered exactly once; if any part of the
//! block is rejected, the rate, power, nbTrans and channel mask roll back
//! while everything else the downlink carried still applies.

use super::{Event, Handler, Mac};
use crate::platform::Platform;
use crate::radio::Radio;

use loramac_codec::keys::SecurityModule;
use loramac_codec::maccommandcreator::{
    DevStatusAnsCreator, DlChannelAnsCreator, DutyCycleAnsCreator, LinkADRAnsCreator,
    NewChannelAnsCreator, RXParamSetupAnsCreator, RXTimingSetupAnsCreator,
};
use loramac_codec::maccommands::{parse_downlink_mac_commands, DownlinkMacCommand};

/// Upper bound on one round of serialized answers.
pub(crate) const MAX_ANSWERS_LEN: usize = 128;

#[derive(PartialEq)]
enum AdrState {
    None,
    Ok,
    Bad,
}

impl<R, S, P, H> Mac<R, S, P, H>
where
    R: Radio,
    S: SecurityModule,
    P: Platform,
    H: Handler,
{
    pub(super) fn process_commands(
        &mut self,
        data: &[u8],
        in_fopts: bool,
    ) -> heapless::Vec<u8, MAX_ANSWERS_LEN> {
        let mut out: heapless::Vec<u8, MAX_ANSWERS_LEN> = heapless::Vec::new();
        let mut shadow = self.session.clone();

        let mut adr_state = AdrState::None;
        let mut adr_power_ok = false;
        let mut adr_data_rate_ok = false;
        let mut adr_channel_mask_ok = true;

        let mut iter = parse_downlink_mac_commands(data);
        while let Some(cmd) = iter.next() {
            match cmd {
                DownlinkMacCommand::LinkCheckAns(ans) => {
                    debug!(
                        "link_check_ans: margin={} gw_count={}",
                        ans.margin(),
                        ans.gateway_count()
                    );
                    self.handler.on_event(Event::LinkStatus {
                        margin: ans.margin(),
                        gw_count: ans.gateway_count(),
                        in_fopts,
                    });
                }

                DownlinkMacCommand::LinkADRReq(req) => {
                    let block_ends = !matches!(
                        iter.clone().next(),
                        Some(DownlinkMacCommand::LinkADRReq(_))
                    );

                    if adr_state != AdrState::None {
                        debug!("ignoring second run of ADR requests");
                        if block_ends {
                            let _ = out.extend_from_slice(LinkADRAnsCreator::new().build());
                        }
                        continue;
                    }

                    let ctl = req.redundancy().channel_mask_control();
                    let mask = req.channel_mask();
                    if self.region.is_dynamic() {
                        match ctl {
                            0 => {
                                for i in 0..16u8 {
                                    if mask.is_enabled(usize::from(i)).unwrap_or(false) {
                                        shadow.unmask_channel(self.region, i);
                                    } else {
                                        shadow.mask_channel(self.region, i);
                                    }
                                }
                            }
                            6 => shadow.unmask_all(self.region),
                            _ => adr_channel_mask_ok = false,
                        }
                    } else {
                        match ctl {
                            // all 125kHz sub-banks on or off
                            6 | 7 => {
                                for i in 0..64u8 {
                                    if ctl == 6 {
                                        shadow.unmask_channel(self.region, i);
                                    } else {
                                        shadow.mask_channel(self.region, i);
                                    }
                                }
                            }
                            _ => {
                                for i in 0..16u8 {
                                    let ch = ctl * 16 + i;
                                    if mask.is_enabled(usize::from(i)).unwrap_or(false) {
                                        shadow.unmask_channel(self.region, ch);
                                    } else {
                                        shadow.mask_channel(self.region, ch);
                                    }
                                }
                            }
                        }
                    }

                    if block_ends {
                        if self.session.adr {
                            adr_data_rate_ok = true;
                            adr_power_ok = true;

                            // zero means keep the existing setting
                            if req.redundancy().number_of_transmissions() > 0 {
                                shadow.nb_trans = req.redundancy().number_of_transmissions();
                            }

                            // 0xf means ignore
                            if req.data_rate() < 0xf {
                                if self.rate_setting_valid(req.data_rate()) {
                                    shadow.rate = req.data_rate();
                                } else {
                                    adr_data_rate_ok = false;
                                }
                            }

                            if req.tx_power() < 0xf {
                                if self.region.power_valid(req.tx_power()) {
                                    shadow.power = req.tx_power();
                                } else {
                                    adr_power_ok = false;
                                }
                            }

                            adr_state = if adr_data_rate_ok && adr_power_ok && adr_channel_mask_ok
                            {
                                AdrState::Ok
                            } else {
                                AdrState::Bad
                            };
                        } else {
                            debug!("ignoring ADR while not in ADR mode");
                            adr_power_ok = false;
                            adr_data_rate_ok = false;
                            adr_channel_mask_ok = false;
                            adr_state = AdrState::Bad;
                        }

                        let mut ans = LinkADRAnsCreator::new();
                        ans.set_channel_mask_ack(adr_channel_mask_ok)
                            .set_data_rate_ack(adr_data_rate_ok)
                            .set_tx_power_ack(adr_power_ok);
                        let _ = out.extend_from_slice(ans.build());
                    }
                }

                DownlinkMacCommand::DutyCycleReq(req) => {
                    debug!("duty_cycle_req: {}", req.max_duty_cycle_raw());
                    shadow.max_duty_cycle = req.max_duty_cycle_raw();
                    let _ = out.extend_from_slice(DutyCycleAnsCreator::new().build());
                }

                DownlinkMacCommand::RXParamSetupReq(req) => {
                    debug!(
                        "rx_param_setup: rx1_dr_offset={} rx2_data_rate={}",
                        req.dl_settings().rx1_dr_offset(),
                        req.dl_settings().rx2_data_rate()
                    );
                    shadow.rx1_dr_offset = req.dl_settings().rx1_dr_offset();
                    shadow.rx2_data_rate = req.dl_settings().rx2_data_rate();
                    shadow.rx2_freq = req.frequency().value();

                    let mut ans = RXParamSetupAnsCreator::new();
                    ans.set_channel_ack(true)
                        .set_rx2_data_rate_ack(true)
                        .set_rx1_dr_offset_ack(true);
                    let _ = out.extend_from_slice(ans.build());
                    // the answer rides on every uplink until one is sent
                    self.rx_param_setup_ans = Some(ans.build()[1]);
                }

                DownlinkMacCommand::DevStatusReq(_) => {
                    debug!("dev_status_req");
                    let mut ans = DevStatusAnsCreator::new();
                    ans.set_battery(self.platform.battery_level())
                        .set_margin(self.margin.clamp(-32, 31) as i8);
                    let _ = out.extend_from_slice(ans.build());
                }

                DownlinkMacCommand::NewChannelReq(req) => {
                    debug!("new_channel_req: index={}", req.channel_index());
                    // fixed channel plans are immutable
                    if self.region.is_dynamic() {
                        let range = req.data_rate_range();
                        let rate_ok = self.region.validate_rate(
                            req.channel_index(),
                            range.min_data_rate(),
                            range.max_data_rate(),
                        );
                        let freq_ok = self
                            .region
                            .validate_freq(req.channel_index(), req.frequency().value());

                        if rate_ok && freq_ok {
                            shadow.set_channel(
                                self.region,
                                req.channel_index(),
                                req.frequency().value(),
                                range.min_data_rate(),
                                range.max_data_rate(),
                            );
                        }

                        let mut ans = NewChannelAnsCreator::new();
                        ans.set_data_rate_range_ack(rate_ok).set_channel_frequency_ack(freq_ok);
                        let _ = out.extend_from_slice(ans.build());
                    }
                }

                DownlinkMacCommand::RXTimingSetupReq(req) => {
                    debug!("rx_timing_setup: delay={}", req.delay());
                    shadow.rx1_delay = match req.delay() {
                        0 => 1,
                        d => d,
                    };
                    let _ = out.extend_from_slice(RXTimingSetupAnsCreator::new().build());
                    self.rx_timing_setup_ans_pending = true;
                }

                DownlinkMacCommand::TXParamSetupReq(_) => {
                    // EIRP and dwell limits do not apply in the supported
                    // regions; parsed and dropped without an answer
                    debug!("tx_param_setup ignored");
                }

                DownlinkMacCommand::DlChannelReq(req) => {
                    debug!("dl_channel_req: index={}", req.channel_index());
                    if self.region.is_dynamic() {
                        let freq_ok = self
                            .region
                            .validate_freq(req.channel_index(), req.frequency().value());
                        let uplink_ok =
                            shadow.channel(self.region, req.channel_index()).is_some();

                        let mut ans = DlChannelAnsCreator::new();
                        ans.set_channel_frequency_ack(freq_ok).set_uplink_frequency_ack(uplink_ok);
                        let _ = out.extend_from_slice(ans.build());
                        self.dl_channel_ans = Some(ans.build()[1]);
                    }
                }
            }
        }

        if adr_state == AdrState::Bad {
            debug!("bad ADR setting; rollback");
            shadow.mask = self.session.mask;
            shadow.rate = self.session.rate;
            shadow.power = self.session.power;
            shadow.nb_trans = self.session.nb_trans;
        }

        self.session = shadow;
        out
    }
}
