//! Timer and latched-input primitive driving the MAC state machine.
//!
//! The MAC arms timers and input expectations from `process()`; the radio
//! integration latches inputs from interrupt context through [`Events::signal`].
//! State lives behind a critical section so the two never race. Every
//! operation takes the current tick count explicitly; the primitive itself
//! never reads a clock.

use core::cell::RefCell;
use critical_section::Mutex;

/// Timer slots. One general purpose pair, the wall-clock accumulator, one
/// slot per duty-cycle band and one for the aggregated limit.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Time,
    WaitA,
    WaitB,
    Band1,
    Band2,
    Band3,
    Band4,
    Band5,
    BandCombined,
}

pub(crate) const NUM_TIMERS: usize = 9;
pub(crate) const NUM_BANDS: usize = 5;

impl Timer {
    /// The slot for duty-cycle band `index` (0-based).
    pub(crate) fn band(index: u8) -> Timer {
        match index {
            0 => Timer::Band1,
            1 => Timer::Band2,
            2 => Timer::Band3,
            3 => Timer::Band4,
            _ => Timer::Band5,
        }
    }
}

/// Inputs latched by the radio integration.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    TxComplete,
    RxReady,
    RxTimeout,
}

impl Input {
    fn bit(self) -> u8 {
        match self {
            Input::TxComplete => 1,
            Input::RxReady => 2,
            Input::RxTimeout => 4,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct TimerState {
    time: u32,
    armed: bool,
}

#[derive(Clone, Copy, Default)]
struct InputState {
    armed: u8,
    state: u8,
    time: u32,
}

#[derive(Default)]
struct Inner {
    timer: [TimerState; NUM_TIMERS],
    input: InputState,
}

pub struct Events {
    inner: Mutex<RefCell<Inner>>,
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl Events {
    pub fn new() -> Self {
        Self { inner: Mutex::new(RefCell::new(Inner::default())) }
    }

    /// Arm `timer` to fire `ticks` ticks after `now`. `ticks` must not exceed
    /// `i32::MAX`; longer intervals are decomposed by the caller.
    pub fn set_timer(&self, timer: Timer, now: u32, ticks: u32) {
        debug_assert!(ticks <= i32::MAX as u32);
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.timer[timer as usize] = TimerState { time: now.wrapping_add(ticks), armed: true };
        });
    }

    pub fn clear_timer(&self, timer: Timer) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).timer[timer as usize].armed = false;
        });
    }

    /// Succeeds exactly once per arming, when the deadline has passed.
    /// Returns how many ticks late the caller observed it.
    pub fn check_timer(&self, timer: Timer, now: u32) -> Option<u32> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let t = &mut inner.timer[timer as usize];
            if t.armed && delta(t.time, now) < i32::MAX as u32 {
                t.armed = false;
                Some(delta(t.time, now))
            } else {
                None
            }
        })
    }

    /// Arm the expectation of an input. Must happen before the matching
    /// [`Events::signal`] for the signal to be observed.
    pub fn set_input(&self, input: Input) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).input.armed |= input.bit();
        });
    }

    /// Latch an armed input. Safe to call from interrupt context. `time` is
    /// the tick count captured when the interrupt fired. Only the first
    /// signal after arming is kept.
    pub fn signal(&self, input: Input, time: u32) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.input.state == 0 && (inner.input.armed & input.bit()) != 0 {
                inner.input.time = time;
                inner.input.state = input.bit();
            }
        });
    }

    /// Succeeds exactly once per armed-then-signalled cycle. Returns the
    /// ticks elapsed between the signal and this observation.
    pub fn check_input(&self, input: Input, now: u32) -> Option<u32> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if (inner.input.state & input.bit()) != 0 {
                inner.input.state = 0;
                Some(delta(inner.input.time, now))
            } else {
                None
            }
        })
    }

    pub fn clear_input(&self) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.input.state = 0;
            inner.input.armed = 0;
        });
    }

    /// `0` if a signalled input is waiting, otherwise the minimum remaining
    /// timer interval, `u32::MAX` if nothing is armed.
    pub fn ticks_until_next(&self, now: u32) -> u32 {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            if inner.input.state > 0 {
                return 0;
            }
            let mut min = u32::MAX;
            for t in inner.timer.iter() {
                if !t.armed {
                    continue;
                }
                if delta(t.time, now) <= i32::MAX as u32 {
                    return 0;
                }
                min = min.min(delta(now, t.time));
            }
            min
        })
    }

    /// Remaining ticks of one specific slot; `0` when due, `u32::MAX` when
    /// not armed.
    pub fn ticks_until(&self, timer: Timer, now: u32) -> u32 {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            let t = &inner.timer[timer as usize];
            if !t.armed {
                u32::MAX
            } else if delta(t.time, now) <= i32::MAX as u32 {
                0
            } else {
                delta(now, t.time)
            }
        })
    }
}

/// Circular 32-bit difference; the timer space is split in half between
/// "past" and "future".
fn delta(timeout: u32, time: u32) -> u32 {
    if timeout <= time {
        time - timeout
    } else {
        u32::MAX - timeout + time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_once() {
        let ev = Events::new();
        ev.set_timer(Timer::WaitA, 0, 100);
        assert_eq!(ev.check_timer(Timer::WaitA, 50), None);
        assert_eq!(ev.check_timer(Timer::WaitA, 103), Some(3));
        // single shot per arming
        assert_eq!(ev.check_timer(Timer::WaitA, 200), None);
    }

    #[test]
    fn timer_clears() {
        let ev = Events::new();
        ev.set_timer(Timer::WaitB, 0, 10);
        ev.clear_timer(Timer::WaitB);
        assert_eq!(ev.check_timer(Timer::WaitB, 20), None);
    }

    #[test]
    fn timer_handles_tick_wraparound() {
        let ev = Events::new();
        let now = u32::MAX - 5;
        ev.set_timer(Timer::WaitA, now, 10);
        assert_eq!(ev.check_timer(Timer::WaitA, now), None);
        // deadline is past the wrap point
        assert_eq!(ev.check_timer(Timer::WaitA, 4), Some(0));
    }

    #[test]
    fn input_requires_arming() {
        let ev = Events::new();
        ev.signal(Input::TxComplete, 10);
        assert_eq!(ev.check_input(Input::TxComplete, 20), None);

        ev.set_input(Input::TxComplete);
        ev.signal(Input::TxComplete, 30);
        assert_eq!(ev.check_input(Input::TxComplete, 35), Some(5));
        // consumed
        assert_eq!(ev.check_input(Input::TxComplete, 40), None);
    }

    #[test]
    fn only_first_signal_latches() {
        let ev = Events::new();
        ev.set_input(Input::RxReady);
        ev.set_input(Input::RxTimeout);
        ev.signal(Input::RxTimeout, 10);
        ev.signal(Input::RxReady, 15);
        assert_eq!(ev.check_input(Input::RxReady, 20), None);
        assert_eq!(ev.check_input(Input::RxTimeout, 20), Some(10));
    }

    #[test]
    fn ticks_until_next_prefers_pending_input() {
        let ev = Events::new();
        assert_eq!(ev.ticks_until_next(0), u32::MAX);

        ev.set_timer(Timer::WaitA, 0, 500);
        ev.set_timer(Timer::WaitB, 0, 200);
        assert_eq!(ev.ticks_until_next(0), 200);
        assert_eq!(ev.ticks_until_next(150), 50);

        ev.set_input(Input::TxComplete);
        ev.signal(Input::TxComplete, 100);
        assert_eq!(ev.ticks_until_next(150), 0);
    }

    #[test]
    fn ticks_until_next_is_nonincreasing_within_interval() {
        let ev = Events::new();
        ev.set_timer(Timer::WaitA, 0, 1000);
        let mut last = u32::MAX;
        for now in (0..=1000).step_by(50) {
            let next = ev.ticks_until_next(now);
            assert!(next <= last);
            last = next;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn ticks_until_single_slot() {
        let ev = Events::new();
        assert_eq!(ev.ticks_until(Timer::Band1, 0), u32::MAX);
        ev.set_timer(Timer::Band1, 0, 300);
        assert_eq!(ev.ticks_until(Timer::Band1, 100), 200);
        assert_eq!(ev.ticks_until(Timer::Band1, 300), 0);
    }
}
