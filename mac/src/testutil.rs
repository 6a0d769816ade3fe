//! Shared fixtures for MAC scenario tests: a scripted radio, a fake-clock
//! platform and an event recorder.
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use crate::mac::{Event, Handler, Mac, State, Window};
use crate::platform::{Identity, Platform};
use crate::radio::{Mode, PacketMeta, Radio, RadioEvent, RxSettings, TxSettings};
use crate::region::Region;

use loramac_codec::default_sm::DefaultSecurityModule;
use loramac_codec::keys::Aes128Key;

pub const TPS: u32 = 1_000_000;
pub const EPS: u32 = 10;

/// DIO lines as wired by the test radio.
pub const DIO_TX_COMPLETE: u8 = 0;
pub const DIO_RX_READY: u8 = 1;
pub const DIO_RX_TIMEOUT: u8 = 2;

#[derive(Default)]
pub struct RadioState {
    pub modes: Vec<Mode>,
    pub tx: Option<(TxSettings, Vec<u8>)>,
    pub rx: Option<RxSettings>,
    pub next_packet: Option<(Vec<u8>, PacketMeta)>,
}

#[derive(Clone, Default)]
pub struct TestRadio(pub Rc<RefCell<RadioState>>);

impl TestRadio {
    pub fn take_tx(&self) -> Option<(TxSettings, Vec<u8>)> {
        self.0.borrow_mut().tx.take()
    }

    pub fn inject(&self, packet: &[u8], rssi: i16, snr: i16) {
        self.0.borrow_mut().next_packet = Some((packet.to_vec(), PacketMeta { rssi, snr }));
    }

    pub fn last_mode(&self) -> Option<Mode> {
        self.0.borrow().modes.last().copied()
    }
}

impl Radio for TestRadio {
    fn set_mode(&mut self, mode: Mode) {
        self.0.borrow_mut().modes.push(mode);
    }

    fn transmit(&mut self, settings: &TxSettings, data: &[u8]) {
        self.0.borrow_mut().tx = Some((*settings, data.to_vec()));
    }

    fn receive(&mut self, settings: &RxSettings) {
        self.0.borrow_mut().rx = Some(*settings);
    }

    fn read_buffer(&mut self, meta: &mut PacketMeta, out: &mut [u8]) -> usize {
        match self.0.borrow_mut().next_packet.take() {
            Some((data, m)) => {
                *meta = m;
                out[..data.len()].copy_from_slice(&data);
                data.len()
            }
            None => 0,
        }
    }

    fn read_entropy(&mut self) -> u32 {
        0xdeadbeef
    }

    fn dio_event(&self, dio: u8) -> Option<RadioEvent> {
        match dio {
            DIO_TX_COMPLETE => Some(RadioEvent::TxComplete),
            DIO_RX_READY => Some(RadioEvent::RxReady),
            DIO_RX_TIMEOUT => Some(RadioEvent::RxTimeout),
            _ => None,
        }
    }
}

pub struct PlatformState {
    pub clock: u32,
    pub rand_state: u32,
    pub saved: Option<Vec<u8>>,
    pub restore: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct TestPlatform(pub Rc<RefCell<PlatformState>>);

impl TestPlatform {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(PlatformState {
            clock: 0,
            rand_state: 0x1234_5678,
            saved: None,
            restore: None,
        })))
    }

    pub fn advance_clock(&self, ticks: u32) {
        let mut state = self.0.borrow_mut();
        state.clock = state.clock.wrapping_add(ticks);
    }
}

impl Platform for TestPlatform {
    fn ticks(&self) -> u32 {
        self.0.borrow().clock
    }

    fn tps(&self) -> u32 {
        TPS
    }

    fn eps(&self) -> u32 {
        EPS
    }

    fn rand(&mut self) -> u32 {
        let mut state = self.0.borrow_mut();
        state.rand_state = state.rand_state.wrapping_mul(1664525).wrapping_add(1013904223);
        state.rand_state
    }

    fn identity(&self) -> Identity {
        Identity::default()
    }

    fn battery_level(&self) -> u8 {
        254
    }

    fn save_context(&mut self, blob: &[u8]) {
        self.0.borrow_mut().saved = Some(blob.to_vec());
    }

    fn restore_context(&mut self, blob: &mut [u8]) -> Option<usize> {
        let restore = self.0.borrow().restore.clone();
        match restore {
            Some(data) => {
                blob[..data.len()].copy_from_slice(&data);
                Some(data.len())
            }
            None => None,
        }
    }
}

/// Owned mirror of [`Event`] so tests can assert on history.
#[derive(Debug, Clone, PartialEq)]
pub enum Logged {
    Reset,
    Startup(u32),
    ChipError,
    TxBegin { freq: u32, size: u8 },
    TxComplete,
    RxSlot(Window),
    Downstream,
    Rx { counter: u32, port: u8, data: Vec<u8> },
    LinkStatus { margin: u8, gw_count: u8 },
    JoinComplete,
    JoinTimeout(u32),
    DataComplete,
    DataTimeout,
    DataNak,
}

#[derive(Clone, Default)]
pub struct EventLog(pub Rc<RefCell<Vec<Logged>>>);

impl EventLog {
    pub fn take(&self) -> Vec<Logged> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub fn contains(&self, wanted: &Logged) -> bool {
        self.0.borrow().iter().any(|e| e == wanted)
    }
}

impl Handler for EventLog {
    fn on_event(&mut self, event: Event<'_>) {
        let logged = match event {
            Event::Reset => Logged::Reset,
            Event::Startup { entropy } => Logged::Startup(entropy),
            Event::ChipError => Logged::ChipError,
            Event::TxBegin { freq, size, .. } => Logged::TxBegin { freq, size },
            Event::TxComplete => Logged::TxComplete,
            Event::RxSlot { window, .. } => Logged::RxSlot(window),
            Event::Downstream { .. } => Logged::Downstream,
            Event::Rx { counter, port, data } => {
                Logged::Rx { counter, port, data: data.to_vec() }
            }
            Event::LinkStatus { margin, gw_count, .. } => Logged::LinkStatus { margin, gw_count },
            Event::JoinComplete => Logged::JoinComplete,
            Event::JoinTimeout { retry_ms } => Logged::JoinTimeout(retry_ms),
            Event::DataComplete => Logged::DataComplete,
            Event::DataTimeout => Logged::DataTimeout,
            Event::DataNak => Logged::DataNak,
        };
        self.0.borrow_mut().push(logged);
    }
}

pub type TestMac = Mac<TestRadio, DefaultSecurityModule, TestPlatform, EventLog>;

/// A MAC wired to the test doubles, with handles kept for inspection.
pub struct Bench {
    pub mac: TestMac,
    pub radio: TestRadio,
    pub platform: TestPlatform,
    pub log: EventLog,
}

impl Bench {
    pub fn new(region: Region) -> Self {
        Self::with_platform(region, TestPlatform::new())
    }

    pub fn with_platform(region: Region, platform: TestPlatform) -> Self {
        let radio = TestRadio::default();
        let log = EventLog::default();
        let sm = DefaultSecurityModule::new(Aes128Key([0; 16]));
        let mac = Mac::new(region, radio.clone(), sm, platform.clone(), log.clone());
        Bench { mac, radio, platform, log }
    }

    pub fn now(&self) -> u32 {
        self.platform.0.borrow().clock
    }

    /// Advance the fake clock to the next pending event and process it.
    pub fn step(&mut self) -> bool {
        let next = self.mac.ticks_until_next_event();
        if next == u32::MAX {
            return false;
        }
        self.platform.advance_clock(next);
        self.mac.process();
        true
    }

    /// Latch a radio DIO line and process the resulting input.
    pub fn signal(&mut self, dio: u8) {
        self.mac.interrupt(dio, self.now());
        self.mac.process();
    }

    /// Drive the reset/entropy cycle through to idle.
    pub fn boot(&mut self) {
        while self.mac.state() != State::Idle {
            assert!(self.step(), "ran out of events before reaching idle");
        }
    }

    /// Advance until an upstream channel is available again.
    pub fn wait_ready(&mut self) {
        for _ in 0..16 {
            if self.mac.ready() {
                return;
            }
            let wait = self.mac.ticks_until_next_channel();
            assert_ne!(wait, u32::MAX, "no channel will ever become available");
            self.platform.advance_clock(wait);
            self.mac.process();
        }
        panic!("channel never became available");
    }
}
