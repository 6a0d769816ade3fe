//! The class A MAC state machine.
//!
//! Strictly event driven: [`Mac::process`] drains whatever timers and latched
//! inputs are due, performs at most one state transition per source, and
//! returns. Nothing blocks. The application sleeps for
//! [`Mac::ticks_until_next_event`] between calls.

use crate::event::{Events, Input, Timer, NUM_BANDS};
use crate::platform::Platform;
use crate::radio::{Bandwidth, Mode, PacketMeta, Radio, RadioEvent, RxSettings, SpreadingFactor, TxSettings};
use crate::region::{Region, DEFAULT_RATE};

use loramac_codec::creator::{DataPayloadCreator, JoinRequestCreator};
use loramac_codec::keys::{KeyDesc, SecurityModule};
use loramac_codec::parser::{
    parse, CfList, DataHeader, DataPayload, DevNonce, FCtrl, FRMPayload, JoinAcceptPayload,
    PhyPayload, DATA_OVERHEAD, PHY_OVERHEAD,
};

mod commands;
mod session;

#[cfg(test)]
mod tests;

pub use session::{Channel, Session, SESSION_BLOB_LEN};

/// Largest PHY payload the stack will carry.
pub const MAX_PACKET: usize = 255;

const ADR_ACK_LIMIT: u8 = 64;
const ADR_ACK_DELAY: u8 = 32;

/// MAC state.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Stack constructed, radio not yet reset.
    Init,
    /// Holding the reset line.
    InitReset,
    /// Waiting for power-on-reset to finish.
    InitLockout,
    /// Holding the reset line after a chip error.
    RecoveryReset,
    /// Waiting out the post-error lockout.
    RecoveryLockout,
    /// Sampling radio entropy.
    Entropy,
    /// Ready for operations.
    Idle,
    /// Waiting for the uplink channel to become available.
    WaitTx,
    /// Radio is transmitting.
    Tx,
    /// Waiting for the first receive window to open.
    WaitRx1,
    /// First receive window is open.
    Rx1,
    /// Waiting for the second receive window to open.
    WaitRx2,
    /// Second receive window is open.
    Rx2,
    /// Waiting to retry a join.
    WaitRetry,
}

/// The operation in flight.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    None,
    Joining,
    DataUnconfirmed,
    DataConfirmed,
    Reset,
}

/// Reason the last API call returned `false`.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    None,
    /// No upstream channel available.
    NoChannel,
    /// Message too large to send.
    Size,
    /// Data rate setting not valid for region.
    Rate,
    /// Port not valid for an upstream message.
    Port,
    /// Stack is busy; request cannot be processed.
    Busy,
    /// Stack is not joined.
    NotJoined,
    /// Power setting not valid for region.
    Power,
    /// The device nonce space is exhausted; rotate the root keys.
    DevNonce,
    /// Implementation fault.
    Internal,
}

/// Receive window identifier.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Rx1,
    Rx2,
}

/// Events pushed to the application.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event<'a> {
    /// Chip is being reset; wait for [`Event::Startup`].
    Reset,
    /// MAC has started and is ready for commands. Carries an entropy sample
    /// for seeding the host random source.
    Startup { entropy: u32 },
    /// Chip did not respond as expected; a recovery reset follows.
    ChipError,
    TxBegin { freq: u32, sf: SpreadingFactor, bw: Bandwidth, power: u8, size: u8 },
    TxComplete,
    /// A receive window opened (or was skipped for missing its margin).
    RxSlot {
        window: Window,
        /// Allowed timing error in ticks.
        margin: u32,
        /// Observed timing error in ticks.
        error: u32,
        freq: u32,
        sf: SpreadingFactor,
        bw: Bandwidth,
        /// Preamble timeout in symbols.
        timeout: u8,
    },
    /// A downstream message arrived (any type, before validation).
    Downstream { rssi: i16, snr: i16, size: u8 },
    /// Application data received.
    Rx { counter: u32, port: u8, data: &'a [u8] },
    /// Answer to a link check.
    LinkStatus { margin: u8, gw_count: u8, in_fopts: bool },
    JoinComplete,
    /// Join attempt got no answer; the stack retries in `retry_ms`.
    JoinTimeout { retry_ms: u32 },
    DataComplete,
    /// Confirmed data got no downlink at all.
    DataTimeout,
    /// Confirmed data got a downlink but no acknowledgement.
    DataNak,
}

/// Application callback bound at construction.
pub trait Handler {
    fn on_event(&mut self, event: Event<'_>);
}

impl<F: FnMut(Event<'_>)> Handler for F {
    fn on_event(&mut self, event: Event<'_>) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy)]
struct TxSelection {
    ch_index: u8,
    freq: u32,
    rate: u8,
    power: u8,
}

pub struct Mac<R, S, P, H> {
    radio: R,
    sm: S,
    platform: P,
    handler: H,
    region: Region,
    events: Events,

    state: State,
    op: Op,
    errno: Errno,

    session: Session,

    buffer: [u8; MAX_PACKET],
    buffer_len: usize,

    /// One ready-bit per band plus the aggregated limit.
    band_ready: u8,

    /// SNR of the last downlink, for DevStatusAns.
    margin: i16,
    /// Wall-clock second of the last downlink; zero until one arrives.
    last_downlink: u32,

    tx: TxSelection,

    rx1_margin: u32,
    rx2_margin: u32,
    rx1_symbols: u8,
    rx2_symbols: u8,

    /// Nonce the in-flight join request was built with.
    join_dev_nonce: u16,

    link_check_pending: bool,
    /// Sticky answers ride on every uplink until one goes out; the payload
    /// byte re-sent is the one evaluated on receipt.
    rx_param_setup_ans: Option<u8>,
    dl_channel_ans: Option<u8>,
    rx_timing_setup_ans_pending: bool,

    adr_ack_counter: u8,
    adr_ack_req: bool,

    /// Wall-clock seconds accumulator.
    time: u32,
    first_join_attempt: u32,
    ms_until_retry: u32,
    join_trial: u16,

    tx_dither: u8,
}

const COMBINED_BAND_BIT: u8 = 1 << NUM_BANDS;

impl<R, S, P, H> Mac<R, S, P, H>
where
    R: Radio,
    S: SecurityModule,
    P: Platform,
    H: Handler,
{
    /// Construct the stack and start the radio reset cycle.
    ///
    /// The cached session is read back through
    /// [`Platform::restore_context`]; region defaults apply when nothing
    /// usable is stored. The aggregated band is blocked for 60 seconds so a
    /// reset loop cannot defeat the duty cycle.
    pub fn new(region: Region, mut radio: R, sm: S, mut platform: P, handler: H) -> Self {
        let events = Events::new();
        let now = platform.ticks();
        let tps = platform.tps();
        let eps = platform.eps();

        let mut blob = [0u8; SESSION_BLOB_LEN];
        let session = match platform.restore_context(&mut blob) {
            Some(n) => Session::from_bytes(&blob[..n]).unwrap_or_else(|| Session::new(region)),
            None => Session::new(region),
        };

        let mut band_ready = u8::MAX;
        band_ready &= !COMBINED_BAND_BIT;
        events.set_timer(Timer::BandCombined, now, 60 * (tps + eps));

        radio.set_mode(Mode::Boot);

        // leave the reset line alone for 10ms
        events.set_timer(Timer::WaitA, now, (tps + eps) / 100);

        // the largest whole-second interval
        events.set_timer(Timer::Time, now, (i32::MAX as u32 / tps) * tps);

        Self {
            radio,
            sm,
            platform,
            handler,
            region,
            events,
            state: State::Init,
            op: Op::None,
            errno: Errno::None,
            session,
            buffer: [0; MAX_PACKET],
            buffer_len: 0,
            band_ready,
            margin: 0,
            last_downlink: 0,
            tx: TxSelection { ch_index: u8::MAX, freq: 0, rate: 0, power: 0 },
            rx1_margin: 0,
            rx2_margin: 0,
            rx1_symbols: 0,
            rx2_symbols: 0,
            join_dev_nonce: 0,
            link_check_pending: false,
            rx_param_setup_ans: None,
            dl_channel_ans: None,
            rx_timing_setup_ans_pending: false,
            adr_ack_counter: 0,
            adr_ack_req: false,
            time: 0,
            first_join_attempt: 0,
            ms_until_retry: 0,
            join_trial: 0,
            tx_dither: 0,
        }
    }

    pub fn errno(&self) -> Errno {
        self.errno
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn joined(&self) -> bool {
        self.session.joined
    }

    /// Ready to accept a data or join request right now.
    pub fn ready(&self) -> bool {
        self.state == State::Idle && self.ticks_until_next_channel() == 0
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn security_module(&self) -> &S {
        &self.sm
    }

    /// Initiate over-the-air activation, forgetting any current session.
    ///
    /// The stack retries forever (with the §7-style backoff) until a
    /// join-accept arrives or the application calls [`Mac::cancel`].
    pub fn otaa(&mut self) -> bool {
        self.errno = Errno::None;

        if self.state != State::Idle {
            self.errno = Errno::Busy;
            return false;
        }

        if self.session.joined {
            self.forget();
        }

        self.join_trial = 0;
        self.tx.rate = self.region.join_rate(self.join_trial);
        self.tx.power = 0;

        // a finite off-time only stalls the attempt; no band at all fails it
        if self.ticks_until_next_channel() == u32::MAX {
            self.errno = Errno::NoChannel;
            return false;
        }

        if self.session.dev_nonce == u16::MAX {
            self.errno = Errno::DevNonce;
            return false;
        }
        let dev_nonce = self.session.dev_nonce;
        self.session.dev_nonce += 1;
        self.join_dev_nonce = dev_nonce;

        let identity = self.platform.identity();
        let mut creator = match JoinRequestCreator::new(&mut self.buffer[..]) {
            Ok(creator) => creator,
            Err(_) => {
                self.errno = Errno::Internal;
                return false;
            }
        };
        creator
            .set_app_eui(identity.app_eui)
            .set_dev_eui(identity.dev_eui)
            .set_dev_nonce(dev_nonce.to_le_bytes());
        self.buffer_len = creator.build(&self.sm).len();

        // dither the first attempt over a minute
        let delay = self.platform.rand() % (60 * self.platform.tps());
        debug!("sending join in {} ticks", delay);

        let now = self.platform.ticks();
        self.events.set_timer(Timer::WaitA, now, delay);

        self.state = State::WaitTx;
        self.op = Op::Joining;
        self.first_join_attempt = self.time_now().wrapping_add(delay / self.platform.tps());

        self.save_context();
        true
    }

    /// Send unconfirmed data upstream.
    pub fn unconfirmed_data(&mut self, port: u8, data: &[u8]) -> bool {
        self.external_data_command(false, port, data)
    }

    /// Send confirmed data upstream.
    pub fn confirmed_data(&mut self, port: u8, data: &[u8]) -> bool {
        self.external_data_command(true, port, data)
    }

    /// Request a link check, either as its own MAC-only uplink right now or
    /// piggy-backed on the next uplink.
    pub fn check(&mut self, now: bool) -> bool {
        self.errno = Errno::None;
        self.link_check_pending = false;

        if self.state != State::Idle {
            self.errno = Errno::Busy;
            return false;
        }
        if !self.session.joined {
            self.errno = Errno::NotJoined;
            return false;
        }

        if now {
            if self.ticks_until_next_channel() == 0 {
                self.link_check_pending = true;
                self.data_command(false, 0, &[])
            } else {
                self.errno = Errno::NoChannel;
                false
            }
        } else {
            self.link_check_pending = true;
            true
        }
    }

    /// Forget the network: wipe the session, keep the device nonce.
    pub fn forget(&mut self) {
        self.cancel();
        if self.session.joined {
            self.session.restore_defaults(self.region, true);
            self.save_context();
        }
    }

    /// Return to idle from any non-reset state, discarding the current
    /// operation and putting the radio to sleep.
    pub fn cancel(&mut self) {
        match self.state {
            State::Idle
            | State::Init
            | State::InitReset
            | State::InitLockout
            | State::RecoveryReset
            | State::RecoveryLockout
            | State::Entropy => {}
            _ => {
                self.state = State::Idle;
                self.op = Op::None;
                self.events.clear_input();
                self.events.clear_timer(Timer::WaitA);
                self.events.clear_timer(Timer::WaitB);
                self.radio.set_mode(Mode::Sleep);
            }
        }
    }

    pub fn set_rate(&mut self, rate: u8) -> bool {
        self.errno = Errno::None;
        if self.rate_setting_valid(rate) {
            self.session.rate = rate;
            self.save_context();
            true
        } else {
            self.errno = Errno::Rate;
            false
        }
    }

    pub fn rate(&self) -> u8 {
        self.session.rate
    }

    pub fn set_power(&mut self, power: u8) -> bool {
        self.errno = Errno::None;
        if self.region.power_valid(power) {
            self.session.power = power;
            self.save_context();
            true
        } else {
            self.errno = Errno::Power;
            false
        }
    }

    pub fn power(&self) -> u8 {
        self.session.power
    }

    pub fn enable_adr(&mut self) {
        self.session.adr = true;
        self.save_context();
    }

    pub fn disable_adr(&mut self) {
        self.session.adr = false;
        self.save_context();
    }

    pub fn adr(&self) -> bool {
        self.session.adr
    }

    /// Add `0..dither` seconds of randomisation to the next message sent.
    /// One-shot; cleared once used.
    pub fn set_send_dither(&mut self, dither: u8) {
        self.tx_dither = dither;
    }

    /// Set the aggregated duty-cycle limit `1 / 2^limit`; useful for meeting
    /// a network fair-access policy. Zero removes the limit.
    pub fn set_aggregated_duty_cycle_limit(&mut self, limit: u8) {
        self.session.max_duty_cycle = limit & 0x0f;
    }

    /// Current maximum application payload, accounting for region, rate and
    /// pending MAC answers.
    pub fn mtu(&self) -> u8 {
        let max = self.region.datarate(self.session.rate).max_payload;
        let mut overhead = DATA_OVERHEAD + self.pending_answers_len();
        if self.link_check_pending {
            overhead += 1;
        }

        if overhead > usize::from(max) {
            0
        } else {
            max - overhead as u8
        }
    }

    /// Seconds since the last accepted downstream message; `u32::MAX` if
    /// there has not been one.
    pub fn time_since_downlink(&mut self) -> u32 {
        if self.last_downlink == 0 {
            u32::MAX
        } else {
            self.time_now().wrapping_sub(self.last_downlink)
        }
    }

    /// Ticks until `process()` has something to do; `u32::MAX` when no event
    /// is pending. Safe to call from the main loop between interrupts.
    pub fn ticks_until_next_event(&self) -> u32 {
        self.events.ticks_until_next(self.platform.ticks())
    }

    /// Ticks until an upstream channel becomes available at the current rate.
    pub fn ticks_until_next_channel(&self) -> u32 {
        let now = self.platform.ticks();
        let mut min = u32::MAX;
        for i in 0..self.region.num_channels() {
            min = min.min(self.ticks_until_available(i, self.session.rate, now));
        }
        let combined = self.events.ticks_until(Timer::BandCombined, now);
        if combined != u32::MAX && combined > min {
            min = combined;
        }
        min
    }

    /// Signal a radio DIO line. The only entry point that is safe from
    /// interrupt context.
    pub fn interrupt(&self, dio: u8, time: u32) {
        match self.radio.dio_event(dio) {
            Some(RadioEvent::TxComplete) => self.events.signal(Input::TxComplete, time),
            Some(RadioEvent::RxReady) => self.events.signal(Input::RxReady, time),
            Some(RadioEvent::RxTimeout) => self.events.signal(Input::RxTimeout, time),
            None => warn!("radio cannot translate interrupt line {}", dio),
        }
    }

    /// Drive the MAC: drain due timers and inputs exactly once and return.
    pub fn process(&mut self) {
        let now = self.platform.ticks();

        // band duty-cycle off-times
        for i in 0..=NUM_BANDS as u8 {
            let timer = if usize::from(i) < NUM_BANDS {
                Timer::band(i)
            } else {
                Timer::BandCombined
            };
            if self.events.check_timer(timer, now).is_some() {
                self.band_ready |= 1 << i;
            }
        }

        // keep the wall clock moving
        let _ = self.time_now();

        match self.state {
            State::Idle => {}

            State::Init => {
                if self.events.check_timer(Timer::WaitA, now).is_some() {
                    self.radio.set_mode(Mode::Reset);
                    self.state = State::InitReset;
                    self.op = Op::Reset;
                    // hold reset for at least 100us
                    self.set_short_timer(Timer::WaitA, 10_000);
                    self.handler.on_event(Event::Reset);
                }
            }

            State::InitReset | State::RecoveryReset => {
                if self.events.check_timer(Timer::WaitA, now).is_some() {
                    self.radio.set_mode(Mode::Boot);
                    self.op = Op::Reset;
                    let tps = self.platform.tps();
                    let eps = self.platform.eps();
                    if self.state == State::InitReset {
                        self.state = State::InitLockout;
                        // 10ms for power-on-reset
                        self.set_short_timer(Timer::WaitA, 100);
                    } else {
                        self.state = State::RecoveryLockout;
                        // 60s lockout after a chip error
                        self.events.set_timer(Timer::WaitA, now, (tps + eps) * 60);
                    }
                }
            }

            State::InitLockout | State::RecoveryLockout => {
                if self.events.check_timer(Timer::WaitA, now).is_some() {
                    self.op = Op::Reset;
                    self.state = State::Entropy;
                    self.radio.set_mode(Mode::Rx);
                    // 100us of noise
                    self.set_short_timer(Timer::WaitA, 10_000);
                }
            }

            State::Entropy => {
                if self.events.check_timer(Timer::WaitA, now).is_some() {
                    let entropy = self.radio.read_entropy();
                    self.radio.set_mode(Mode::Sleep);
                    self.state = State::Idle;
                    self.op = Op::None;
                    self.handler.on_event(Event::Startup { entropy });
                }
            }

            State::WaitTx => {
                if self.events.check_timer(Timer::WaitA, now).is_some() {
                    self.start_tx();
                }
            }

            State::Tx => {
                if let Some(error) = self.events.check_input(Input::TxComplete, now) {
                    self.finish_tx(error);
                } else if self.events.check_timer(Timer::WaitA, now).is_some() {
                    // no tx-complete within double the air time
                    self.start_recovery();
                }
            }

            State::WaitRx1 => {
                if let Some(error) = self.events.check_timer(Timer::WaitA, now) {
                    self.open_rx_window(Window::Rx1, error);
                }
            }

            State::WaitRx2 => {
                if let Some(error) = self.events.check_timer(Timer::WaitB, now) {
                    self.open_rx_window(Window::Rx2, error);
                }
            }

            State::Rx1 | State::Rx2 => {
                if self.events.check_input(Input::RxReady, now).is_some() {
                    self.handle_rx_ready();
                } else if self.events.check_input(Input::RxTimeout, now).is_some() {
                    self.handle_rx_timeout();
                } else if self.events.check_timer(Timer::WaitA, now).is_some()
                    || self.events.check_timer(Timer::WaitB, now).is_some()
                {
                    // the chip stopped answering mid-window
                    self.start_recovery();
                }
            }

            State::WaitRetry => {
                if self.events.check_timer(Timer::WaitA, now).is_some() {
                    let tpms = self.platform.tps() / 1000;
                    let max_ms = i32::MAX as u32 / tpms;
                    if self.ms_until_retry > 0 {
                        if self.ms_until_retry > max_ms {
                            self.events.set_timer(Timer::WaitA, now, max_ms * tpms);
                            self.ms_until_retry -= max_ms;
                        } else {
                            debug!("wait another {} ticks", self.ms_until_retry * tpms);
                            self.events.set_timer(Timer::WaitA, now, self.ms_until_retry * tpms);
                            self.ms_until_retry = 0;
                        }
                    } else {
                        self.events.set_timer(Timer::WaitA, now, 0);
                        self.state = State::WaitTx;
                    }
                }
            }
        }
    }

    // ---- uplink path -----------------------------------------------------

    fn external_data_command(&mut self, confirmed: bool, port: u8, data: &[u8]) -> bool {
        self.errno = Errno::None;

        if self.state != State::Idle {
            self.errno = Errno::Busy;
            return false;
        }
        if !self.session.joined {
            self.errno = Errno::NotJoined;
            return false;
        }
        if port == 0 || port > 223 {
            self.errno = Errno::Port;
            return false;
        }
        if self.ticks_until_next_channel() != 0 {
            self.errno = Errno::NoChannel;
            return false;
        }
        let max_payload = self.region.datarate(self.session.rate).max_payload;
        if data.len() > usize::from(max_payload) - DATA_OVERHEAD {
            self.errno = Errno::Size;
            return false;
        }
        self.data_command(confirmed, port, data)
    }

    /// Build and schedule a data frame. Pending MAC answers take priority: if
    /// the user payload no longer fits beside them, a MAC-only unconfirmed
    /// frame goes out instead and the call reports [`Errno::Size`].
    fn data_command(&mut self, confirmed: bool, port: u8, data: &[u8]) -> bool {
        self.tx.rate = self.session.rate;
        self.tx.power = self.session.power;

        let mut opts: heapless::Vec<u8, 15> = heapless::Vec::new();
        self.write_pending_answers(&mut opts);
        if self.link_check_pending {
            let _ = opts.push(0x02);
            self.link_check_pending = false;
        }

        let max_payload = self.region.datarate(self.tx.rate).max_payload;

        if self.session.up == u32::MAX {
            // counter exhausted; the session is dead
            self.session.joined = false;
            self.save_context();
            self.errno = Errno::NotJoined;
            return false;
        }
        self.session.up += 1;

        let mut fctrl = FCtrl::new(0, true);
        if self.session.adr {
            fctrl.set_adr();
        }
        if self.adr_ack_req {
            fctrl.set_adr_ack_req();
        }

        let fits = opts.len() + DATA_OVERHEAD + data.len() <= usize::from(max_payload);
        let retval;

        {
            let mut creator = DataPayloadCreator::new(&mut self.buffer[..])
                .expect("buffer is always large enough");
            creator
                .set_uplink(true)
                .set_dev_addr(self.session.dev_addr.to_le_bytes())
                .set_fctrl(&fctrl)
                .set_fcnt(self.session.up);

            let built = if fits {
                creator.set_confirmed(confirmed);
                if port > 0 || !data.is_empty() {
                    creator.set_f_port(port);
                }
                self.op = if confirmed { Op::DataConfirmed } else { Op::DataUnconfirmed };
                retval = true;
                creator.build_with_fopts(data, &opts, &self.sm)
            } else {
                // goalposts moved: send the MAC answers alone
                creator.set_confirmed(false);
                self.op = Op::DataUnconfirmed;
                self.errno = Errno::Size;
                retval = false;
                creator.build_with_fopts(&[], &opts, &self.sm)
            };

            match built {
                Ok(packet) => self.buffer_len = packet.len(),
                Err(_) => {
                    self.errno = Errno::Internal;
                    self.op = Op::None;
                    return false;
                }
            }
        }

        self.state = State::WaitTx;

        let mut send_delay = 0;
        if self.tx_dither > 0 {
            send_delay =
                self.platform.rand() % (u32::from(self.tx_dither) * self.platform.tps());
            self.tx_dither = 0;
        }

        let now = self.platform.ticks();
        self.events.set_timer(Timer::WaitA, now, send_delay);

        self.save_context();
        retval
    }

    fn start_tx(&mut self) {
        match self.select_channel(self.tx.rate, self.tx.ch_index) {
            Some((ch_index, freq)) => {
                self.tx.ch_index = ch_index;
                self.tx.freq = freq;
            }
            None => {
                // off-time has not expired yet; try again when it has
                let wait = self.ticks_until_next_channel();
                if wait == u32::MAX {
                    info!("cannot send; all channels disabled");
                    self.state = State::Idle;
                    self.op = Op::None;
                } else {
                    let now = self.platform.ticks();
                    self.events.set_timer(Timer::WaitA, now, wait.min(i32::MAX as u32));
                }
                return;
            }
        }

        let dr = self.region.datarate(self.tx.rate);
        let settings = TxSettings {
            freq: self.tx.freq,
            sf: dr.spreading_factor,
            bw: dr.bandwidth,
            dbm100: self.region.tx_power(self.tx.power),
        };

        let tps = self.platform.tps();
        let tx_time = transmit_time_up(dr.bandwidth, dr.spreading_factor, self.buffer_len as u8, tps);

        self.events.clear_input();
        self.events.set_input(Input::TxComplete);

        self.radio.transmit(&settings, &self.buffer[..self.buffer_len]);

        self.register_time(self.tx.freq, tx_time);

        self.state = State::Tx;

        // reset the radio if tx-complete does not appear within double the
        // expected air time
        let now = self.platform.ticks();
        self.events.set_timer(Timer::WaitA, now, tx_time << 1);

        self.handler.on_event(Event::TxBegin {
            freq: self.tx.freq,
            sf: dr.spreading_factor,
            bw: dr.bandwidth,
            power: self.tx.power,
            size: self.buffer_len as u8,
        });
    }

    fn finish_tx(&mut self, error: u32) {
        let tps = self.platform.tps();
        let eps = self.platform.eps();

        // the wait interval is always measured in whole seconds
        let wait_secs = u32::from(if self.op == Op::Joining {
            self.region.ja1_delay()
        } else {
            self.session.rx1_delay
        });

        // the fastest clock must not open the window before the earliest
        // start time
        let wait_ticks = wait_secs * tps + wait_secs * eps;

        // interrupt response time, radio ramp-up and the latency of
        // observing tx-complete all advance the schedule
        let advance = self.platform.advance() + error;

        let rx1_rate = self.region.rx1_datarate(self.tx.rate, self.session.rx1_dr_offset);
        let advance_a = {
            let dr = self.region.datarate(rx1_rate);
            let period = symbol_period(dr.spreading_factor, dr.bandwidth, tps);
            let xtal_error = wait_secs * eps * 2;
            let extra = extra_symbols(xtal_error, period);
            self.rx1_margin = (3 + u32::from(extra)) * period;
            self.rx1_symbols = 8 + extra;
            advance + u32::from(extra) * period
        };

        let advance_b = {
            let dr = self.region.datarate(self.session.rx2_data_rate);
            let period = symbol_period(dr.spreading_factor, dr.bandwidth, tps);
            let xtal_error = (wait_secs + 1) * eps * 2;
            let extra = extra_symbols(xtal_error, period);
            self.rx2_margin = (3 + u32::from(extra)) * period;
            self.rx2_symbols = 8 + extra;
            advance + u32::from(extra) * period
        };

        let now = self.platform.ticks();
        if advance_b <= wait_ticks + (tps + eps) {
            self.events.set_timer(Timer::WaitB, now, wait_ticks + (tps + eps) - advance_b);
            if advance_a <= wait_ticks {
                self.events.set_timer(Timer::WaitA, now, wait_ticks - advance_a);
                self.state = State::WaitRx1;
            } else {
                self.events.clear_timer(Timer::WaitA);
                self.state = State::WaitRx2;
            }
        } else {
            self.events.clear_timer(Timer::WaitA);
            self.events.set_timer(Timer::WaitB, now, 0);
            self.state = State::WaitRx2;
        }

        // the answers this frame carried are no longer pending
        if matches!(self.op, Op::DataUnconfirmed | Op::DataConfirmed) {
            self.rx_param_setup_ans = None;
            self.dl_channel_ans = None;
            self.rx_timing_setup_ans_pending = false;
        }

        self.handler.on_event(Event::TxComplete);
    }

    fn open_rx_window(&mut self, window: Window, error: u32) {
        let (rate, freq, margin, symbols) = match window {
            Window::Rx1 => (
                self.region.rx1_datarate(self.tx.rate, self.session.rx1_dr_offset),
                self.region.rx1_freq(self.tx.freq, self.tx.ch_index),
                self.rx1_margin,
                self.rx1_symbols,
            ),
            Window::Rx2 => (
                self.session.rx2_data_rate,
                self.session.rx2_freq,
                self.rx2_margin,
                self.rx2_symbols,
            ),
        };

        let dr = self.region.datarate(rate);
        let settings = RxSettings {
            freq,
            sf: dr.spreading_factor,
            bw: dr.bandwidth,
            timeout_symbols: symbols,
            max_size: dr.max_payload.saturating_add(PHY_OVERHEAD as u8),
        };

        self.state = match window {
            Window::Rx1 => State::Rx1,
            Window::Rx2 => State::Rx2,
        };

        let missed = error > margin;
        if !missed {
            self.events.clear_input();
            self.events.set_input(Input::RxReady);
            self.events.set_input(Input::RxTimeout);

            self.radio.receive(&settings);

            // watchdog in case the chip never signals
            let now = self.platform.ticks();
            self.events.set_timer(Timer::WaitA, now, self.platform.tps() << 4);
        } else if window == Window::Rx1 {
            self.state = State::WaitRx2;
        }

        self.handler.on_event(Event::RxSlot {
            window,
            margin,
            error,
            freq,
            sf: dr.spreading_factor,
            bw: dr.bandwidth,
            timeout: symbols,
        });

        if missed && window == Window::Rx2 {
            // missed RX2 entirely; the operation is over
            self.complete_rx2_timeout();
        }
    }

    fn handle_rx_timeout(&mut self) {
        if self.state == State::Rx2 {
            self.events.clear_timer(Timer::WaitA);
            self.complete_rx2_timeout();
            self.save_context();
        } else {
            self.state = State::WaitRx2;
        }
    }

    /// The second window closed with nothing received.
    fn complete_rx2_timeout(&mut self) {
        match self.op {
            Op::DataUnconfirmed => {
                self.adapt_rate();
                self.handler.on_event(Event::DataComplete);
                self.state = State::Idle;
                self.op = Op::None;
            }
            Op::DataConfirmed => {
                self.adapt_rate();
                self.handler.on_event(Event::DataTimeout);
                self.state = State::Idle;
                self.op = Op::None;
            }
            Op::Joining => {
                self.ms_until_retry = self.retry_interval(self.first_join_attempt);
                self.join_trial = self.join_trial.wrapping_add(1);
                self.tx.rate = self.region.join_rate(self.join_trial);

                if let Some((ch_index, freq)) = self.select_channel(self.tx.rate, self.tx.ch_index)
                {
                    self.tx.ch_index = ch_index;
                    self.tx.freq = freq;
                }

                info!("join timeout; retry in {} ms", self.ms_until_retry);
                self.handler.on_event(Event::JoinTimeout { retry_ms: self.ms_until_retry });

                self.state = State::WaitRetry;
                let now = self.platform.ticks();
                self.events.set_timer(Timer::WaitA, now, 0);
            }
            _ => {
                self.state = State::Idle;
                self.op = Op::None;
            }
        }
    }

    fn start_recovery(&mut self) {
        self.handler.on_event(Event::ChipError);
        self.events.clear_input();
        self.events.clear_timer(Timer::WaitA);
        self.events.clear_timer(Timer::WaitB);

        self.state = State::RecoveryReset;
        self.op = Op::Reset;

        self.radio.set_mode(Mode::Reset);

        // hold reset for at least 100us
        self.set_short_timer(Timer::WaitA, 10_000);
    }

    // ---- downlink path ---------------------------------------------------

    fn handle_rx_ready(&mut self) {
        self.events.clear_timer(Timer::WaitA);
        self.events.clear_timer(Timer::WaitB);

        let mut buf = [0u8; MAX_PACKET];
        let mut meta = PacketMeta::default();
        let len = self.radio.read_buffer(&mut meta, &mut buf);

        self.handler.on_event(Event::Downstream {
            rssi: meta.rssi,
            snr: meta.snr,
            size: len as u8,
        });

        self.margin = meta.snr;
        self.last_downlink = self.time_now();

        self.adr_ack_counter = 0;
        self.adr_ack_req = false;
        self.rx_param_setup_ans = None;
        self.dl_channel_ans = None;
        self.rx_timing_setup_ans_pending = false;

        let mut accepted = false;
        let mut acked = false;
        let mut answers: heapless::Vec<u8, { commands::MAX_ANSWERS_LEN }> = heapless::Vec::new();

        match parse(&mut buf[..len]) {
            Ok(PhyPayload::JoinAccept(JoinAcceptPayload::Encrypted(encrypted))) => {
                if self.op == Op::Joining {
                    let decrypted = encrypted.decrypt(&self.sm, KeyDesc::Nwk);
                    if decrypted.validate_mic(&self.sm, KeyDesc::Nwk) {
                        self.session.restore_defaults(self.region, true);
                        self.session.joined = true;

                        if self.session.adr {
                            // keep the joining rate
                            self.session.rate = self.tx.rate;
                        }

                        self.session.rx1_dr_offset = decrypted.dl_settings().rx1_dr_offset();
                        self.session.rx2_data_rate = decrypted.dl_settings().rx2_data_rate();
                        self.session.rx1_delay = decrypted.rx_delay();
                        self.session.dev_addr = u32::from(&decrypted.dev_addr());
                        self.session.net_id = u32::from(&decrypted.net_id());

                        match decrypted.c_f_list() {
                            Some(CfList::DynamicChannel(freqs)) => {
                                for (i, freq) in freqs.iter().enumerate() {
                                    let freq = freq.value();
                                    if freq == 0 {
                                        continue;
                                    }
                                    if self.region.band(freq).is_some() {
                                        self.session.set_channel(
                                            self.region,
                                            3 + i as u8,
                                            freq,
                                            0,
                                            5,
                                        );
                                    } else {
                                        info!("cflist channel is invalid for the region");
                                    }
                                }
                            }
                            Some(CfList::FixedChannel(mask)) => {
                                for ch in 0..self.region.num_channels() {
                                    if mask.is_enabled(usize::from(ch)).unwrap_or(false) {
                                        self.session.unmask_channel(self.region, ch);
                                    }
                                }
                            }
                            None => {}
                        }

                        decrypted.derive_session_keys(
                            &DevNonce::from(self.join_dev_nonce.to_le_bytes()),
                            &mut self.sm,
                        );

                        accepted = true;
                    } else {
                        info!("unexpected mic");
                    }
                } else {
                    info!("unexpected join-accept");
                }
            }
            Ok(PhyPayload::Data(DataPayload::Encrypted(encrypted))) => {
                if !self.session.joined {
                    info!("unexpected data");
                } else if encrypted.is_uplink() {
                    info!("unexpected direction");
                } else if u32::from(&encrypted.fhdr().dev_addr()) != self.session.dev_addr {
                    info!("unexpected devaddr");
                } else {
                    // rebuild the 32-bit counter from the on-wire low half
                    let rx16 = encrypted.fhdr().fcnt();
                    let mut counter =
                        (self.session.down & 0xffff_0000) | u32::from(rx16);
                    if counter < self.session.down {
                        counter = counter.wrapping_add(0x1_0000);
                    }

                    if !encrypted.validate_mic(&self.sm, KeyDesc::FNwkSInt, counter) {
                        info!("unexpected mic");
                    } else if counter.wrapping_sub(self.session.down)
                        >= u32::from(self.region.max_fcnt_gap())
                    {
                        info!("unexpected counter");
                    } else {
                        acked = encrypted.fhdr().fctrl().ack();
                        self.session.down = counter.wrapping_add(1);

                        let decrypted =
                            encrypted.decrypt(&self.sm, KeyDesc::NwkSEnc, KeyDesc::AppS, counter);

                        match decrypted.frm_payload() {
                            FRMPayload::Data(data) => {
                                if let Some(port) = decrypted.f_port() {
                                    self.handler.on_event(Event::Rx {
                                        counter,
                                        port,
                                        data,
                                    });
                                }
                                answers =
                                    self.process_commands(decrypted.fhdr().data(), true);
                            }
                            FRMPayload::MACCommands(cmds) => {
                                answers = self.process_commands(cmds.data(), false);
                            }
                            FRMPayload::None => {
                                answers =
                                    self.process_commands(decrypted.fhdr().data(), true);
                            }
                        }

                        accepted = true;
                    }
                }
            }
            Ok(_) => info!("unexpected direction"),
            Err(_) => info!("unexpected encoding"),
        }

        match self.op {
            Op::DataUnconfirmed => self.handler.on_event(Event::DataComplete),
            Op::DataConfirmed => {
                if accepted && acked {
                    self.handler.on_event(Event::DataComplete);
                } else {
                    self.handler.on_event(Event::DataNak);
                }
            }
            Op::Joining => {
                if accepted {
                    self.handler.on_event(Event::JoinComplete);
                } else {
                    self.handler.on_event(Event::JoinTimeout { retry_ms: 0 });
                }
            }
            _ => {}
        }

        if !answers.is_empty() {
            // the commands may have masked everything
            if self.ticks_until_next_channel() != u32::MAX {
                self.send_mac_answers(&answers);
            } else {
                info!("cannot send; all channels disabled");
                self.state = State::Idle;
                self.op = Op::None;
            }
        } else {
            self.state = State::Idle;
            self.op = Op::None;
        }

        self.save_context();
    }

    /// Immediately answer a downlink that carried MAC commands.
    fn send_mac_answers(&mut self, answers: &[u8]) {
        self.tx.rate = self.session.rate;
        self.tx.power = self.session.power;

        if self.session.up == u32::MAX {
            self.session.joined = false;
            self.state = State::Idle;
            self.op = Op::None;
            return;
        }
        self.session.up += 1;

        let mut fctrl = FCtrl::new(0, true);
        if self.session.adr {
            fctrl.set_adr();
        }
        if self.adr_ack_req {
            fctrl.set_adr_ack_req();
        }

        let built = {
            let mut creator = DataPayloadCreator::new(&mut self.buffer[..])
                .expect("buffer is always large enough");
            creator
                .set_uplink(true)
                .set_confirmed(false)
                .set_dev_addr(self.session.dev_addr.to_le_bytes())
                .set_fctrl(&fctrl)
                .set_fcnt(self.session.up);
            if answers.len() <= 15 {
                creator.build_with_fopts(&[], answers, &self.sm).map(|p| p.len())
            } else {
                creator.set_f_port(0);
                creator.build_with_fopts(answers, &[], &self.sm).map(|p| p.len())
            }
        };

        match built {
            Ok(len) => {
                self.buffer_len = len;
                let now = self.platform.ticks();
                self.events
                    .set_timer(Timer::WaitA, now, self.ticks_until_next_channel());
                self.state = State::WaitTx;
                self.op = Op::DataUnconfirmed;
            }
            Err(_) => {
                self.state = State::Idle;
                self.op = Op::None;
            }
        }
    }

    // ---- channel plan ----------------------------------------------------

    fn is_available(&self, ch_index: u8, rate: u8) -> bool {
        if self.session.channel_is_masked(self.region, ch_index) {
            return false;
        }
        let Some((freq, min_rate, max_rate)) = self.session.channel(self.region, ch_index) else {
            return false;
        };
        if rate < min_rate || rate > max_rate {
            return false;
        }
        match self.region.band(freq) {
            Some(band) => (self.band_ready & (1 << band)) != 0,
            None => false,
        }
    }

    fn ticks_until_available(&self, ch_index: u8, rate: u8, now: u32) -> u32 {
        if self.session.channel_is_masked(self.region, ch_index) {
            return u32::MAX;
        }
        let Some((freq, min_rate, max_rate)) = self.session.channel(self.region, ch_index) else {
            return u32::MAX;
        };
        if rate < min_rate || rate > max_rate {
            return u32::MAX;
        }
        match self.region.band(freq) {
            Some(band) => {
                if (self.band_ready & (1 << band)) != 0 {
                    0
                } else {
                    self.events.ticks_until(Timer::band(band), now)
                }
            }
            None => u32::MAX,
        }
    }

    /// Pick an available channel uniformly at random, rotating away from the
    /// previous one when there is a choice.
    fn select_channel(&mut self, rate: u8, prev_ch_index: u8) -> Option<(u8, u32)> {
        if self.band_ready & COMBINED_BAND_BIT == 0 {
            return None;
        }

        let mut available: u8 = 0;
        let mut except = u8::MAX;
        for i in 0..self.region.num_channels() {
            if self.is_available(i, rate) {
                if i == prev_ch_index {
                    except = i;
                }
                available += 1;
            }
        }

        if available == 0 {
            return None;
        }

        if except != u8::MAX {
            if available == 1 {
                except = u8::MAX;
            } else {
                available -= 1;
            }
        }

        let index = (self.platform.rand() % u32::from(available)) as u8;
        let mut j = 0;
        for i in 0..self.region.num_channels() {
            if self.is_available(i, rate) && i != except {
                if index == j {
                    let (freq, _, _) = self.session.channel(self.region, i)?;
                    return Some((i, freq));
                }
                j += 1;
            }
        }

        None
    }

    /// Account the air time of a transmission against its band and the
    /// aggregated limit.
    fn register_time(&mut self, freq: u32, air_time: u32) {
        let now = self.platform.ticks();
        if let Some(band) = self.region.band(freq) {
            let factor = self.region.off_time_factor(band);
            if factor > 0 {
                self.band_ready &= !(1 << band);
                self.events
                    .set_timer(Timer::band(band), now, air_time * u32::from(factor));
            }
        }

        if self.session.max_duty_cycle > 0 {
            self.band_ready &= !COMBINED_BAND_BIT;
            self.events.set_timer(
                Timer::BandCombined,
                now,
                air_time << (self.session.max_duty_cycle & 0x0f),
            );
        }
    }

    fn rate_setting_valid(&self, rate: u8) -> bool {
        (0..self.region.num_channels()).any(|i| self.region.validate_rate(i, rate, rate))
    }

    // ---- ADR -------------------------------------------------------------

    /// Runs whenever an RX window closes without a downlink and ADR is on.
    fn adapt_rate(&mut self) {
        self.adr_ack_req = false;

        if !self.session.adr {
            return;
        }
        if self.adr_ack_counter == u8::MAX {
            // every recovery step has already been taken
            return;
        }
        self.adr_ack_counter += 1;

        if self.adr_ack_counter < ADR_ACK_LIMIT {
            return;
        }
        self.adr_ack_req = true;

        if self.adr_ack_counter >= ADR_ACK_LIMIT + ADR_ACK_DELAY
            && (self.adr_ack_counter - (ADR_ACK_LIMIT + ADR_ACK_DELAY)) % ADR_ACK_DELAY == 0
        {
            if self.session.power > 0 {
                debug!("adr: full power restored");
                self.session.power = 0;
            } else if self.session.rate > DEFAULT_RATE {
                self.session.rate -= 1;
                debug!("adr: rate reduced to {}", self.session.rate);
            } else {
                debug!("adr: all channels unmasked");
                self.session.unmask_all(self.region);
                self.adr_ack_counter = u8::MAX;
            }
        }
    }

    // ---- timing ----------------------------------------------------------

    /// Wall-clock seconds since init, maintained by re-arming the `Time`
    /// slot with the largest whole-second interval that fits a timer.
    fn time_now(&mut self) -> u32 {
        let tps = self.platform.tps();
        let max = (i32::MAX as u32 / tps) * tps;
        let now = self.platform.ticks();

        let until = self.events.ticks_until(Timer::Time, now);
        if until == 0 {
            if let Some(error) = self.events.check_timer(Timer::Time, now) {
                self.time = self.time.wrapping_add(max / tps);
                self.events.set_timer(Timer::Time, now, max - error);
            }
            self.time
        } else {
            self.time.wrapping_add((max - until) / tps)
        }
    }

    /// Join retry interval per the LoRaWAN duty-cycle ramp: roughly 1%, then
    /// 0.1% after an hour, then 0.01% after eleven hours.
    fn retry_interval(&mut self, start_time: u32) -> u32 {
        let elapsed = self.time_now().wrapping_sub(start_time);
        let dither = self.platform.rand() & 0xffff;

        let dr = self.region.datarate(self.tx.rate);
        let tps = self.platform.tps();
        let tx_time_ms = transmit_time_up(dr.bandwidth, dr.spreading_factor, self.buffer_len as u8, tps)
            / (tps / 1000);

        let interval = if elapsed < 60 * 60 {
            (50 + dither % 100) * tx_time_ms
        } else if elapsed < 11 * 60 * 60 {
            (500 + dither % 1000) * tx_time_ms
        } else {
            (5000 + dither % 10000) * tx_time_ms
        };

        let next_channel = self.ticks_until_next_channel() / (tps / 1000) + 1;

        interval.max(next_channel)
    }

    /// Arm a short interval given as a divisor of one second (e.g. 100 for
    /// 10 ms), rounded up to at least one tick.
    fn set_short_timer(&mut self, timer: Timer, divisor: u32) {
        let now = self.platform.ticks();
        let ticks = (self.platform.tps() + self.platform.eps()) / divisor + 1;
        self.events.set_timer(timer, now, ticks);
    }

    fn pending_answers_len(&self) -> usize {
        let mut len = 0;
        if self.dl_channel_ans.is_some() {
            len += 2;
        }
        if self.rx_timing_setup_ans_pending {
            len += 1;
        }
        if self.rx_param_setup_ans.is_some() {
            len += 2;
        }
        len
    }

    fn write_pending_answers(&self, opts: &mut heapless::Vec<u8, 15>) {
        if let Some(bits) = self.dl_channel_ans {
            let _ = opts.push(0x0a);
            let _ = opts.push(bits);
        }
        if self.rx_timing_setup_ans_pending {
            let _ = opts.push(0x08);
        }
        if let Some(bits) = self.rx_param_setup_ans {
            let _ = opts.push(0x05);
            let _ = opts.push(bits);
        }
    }

    fn save_context(&mut self) {
        let blob = self.session.to_bytes();
        self.platform.save_context(&blob);
    }
}

/// Air time in ticks of an upstream frame (explicit header, CRC on), from
/// the SX127x data sheet timing formulas.
pub fn transmit_time_up(bw: Bandwidth, sf: SpreadingFactor, size: u8, tps: u32) -> u32 {
    transmit_time(bw, sf, size, true, tps)
}

/// Air time in ticks of a downstream frame (no CRC).
pub fn transmit_time_down(bw: Bandwidth, sf: SpreadingFactor, size: u8, tps: u32) -> u32 {
    transmit_time(bw, sf, size, false, tps)
}

fn transmit_time(bw: Bandwidth, sf: SpreadingFactor, size: u8, crc: bool, tps: u32) -> u32 {
    // low data rate optimisation per the data sheet
    let ldro = bw == Bandwidth::_125KHz
        && (sf == SpreadingFactor::_11 || sf == SpreadingFactor::_12);
    let sf_n = sf.factor();
    let cr = 1u32; // 4/5

    let ts = symbol_period(sf, bw, tps);
    let t_preamble = ts * 12 + ts / 4;

    let numerator = (8 * i32::from(size) - 4 * sf_n as i32 + 28 + if crc { 16 } else { 0 } - 20)
        .max(0) as u32;
    let denom = 4 * (sf_n - if ldro { 2 } else { 0 });

    let n_payload = 8 + numerator.div_ceil(denom) * (cr + 4);

    t_preamble + n_payload * ts
}

fn symbol_period(sf: SpreadingFactor, bw: Bandwidth, tps: u32) -> u32 {
    ((1u32 << sf.factor()) * tps) / bw.hz()
}

fn extra_symbols(xtal_error: u32, symbol_period: u32) -> u8 {
    (xtal_error.div_ceil(symbol_period)) as u8
}
