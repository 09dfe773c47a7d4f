//! Wrap-safe monotonic microsecond clock built on top of a platform
//! free-running tick counter. Mirrors the `osalSysLock`/`osalSysUnlock`
//! critical section of the reference clock with `critical_section` so the
//! same code runs bare-metal or on host tests.

use core::cell::RefCell;

use critical_section::Mutex;

/// Supplies the raw free-running counter. Host tests can implement this over
/// a fake to drive deterministic wraparound.
pub trait TickSource {
    /// Width in bits of the counter returned by [`ticks`](Self::ticks).
    const BITS: u32;
    /// Counter frequency in Hz.
    const TICK_HZ: u64;

    fn ticks(&self) -> u64;
}

struct ClockState {
    prev: u64,
    wrap_count: u64,
}

/// Tracks `prev`/`wrap_count` behind a critical section so readers on
/// different priorities observe a monotonic sequence.
pub struct MonotonicClock<T: TickSource> {
    source: T,
    state: Mutex<RefCell<ClockState>>,
}

impl<T: TickSource> MonotonicClock<T> {
    pub const fn new(source: T) -> Self {
        Self {
            source,
            state: Mutex::new(RefCell::new(ClockState {
                prev: 0,
                wrap_count: 0,
            })),
        }
    }

    /// Microseconds since this clock was created, rounded up.
    pub fn now_us(&self) -> u64 {
        let now = self.source.ticks();
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.borrow_mut();
            if now < state.prev {
                state.wrap_count += 1;
            }
            state.prev = now;

            let period = 1u64 << T::BITS;
            let total_ticks = state.wrap_count.saturating_mul(period) + now;
            // Rounded-up tick-to-microsecond conversion.
            (total_ticks.saturating_mul(1_000_000) + T::TICK_HZ - 1) / T::TICK_HZ
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct FakeTicks {
        value: Cell<u64>,
    }

    impl TickSource for &FakeTicks {
        const BITS: u32 = 16;
        const TICK_HZ: u64 = 1_000_000;

        fn ticks(&self) -> u64 {
            self.value.get()
        }
    }

    #[test]
    fn monotonic_without_wrap() {
        let ticks = FakeTicks {
            value: Cell::new(0),
        };
        let clock = MonotonicClock::new(&ticks);
        ticks.value.set(100);
        assert_eq!(clock.now_us(), 100);
        ticks.value.set(5_000);
        assert_eq!(clock.now_us(), 5_000);
    }

    #[test]
    fn wraparound_advances_time_instead_of_going_backward() {
        let ticks = FakeTicks {
            value: Cell::new(0),
        };
        let clock = MonotonicClock::new(&ticks);
        ticks.value.set(u16::MAX as u64);
        let before_wrap = clock.now_us();
        ticks.value.set(10);
        let after_wrap = clock.now_us();
        assert!(after_wrap > before_wrap);
    }
}
