#![no_std]

//! Bounded-memory single-producer/single-consumer append pipeline in front
//! of the ring engine. The producer (`write`) never blocks: slab allocation
//! is try-only and the mailbox is sized to the pool so a post can never
//! fail. A worker reads the mailbox with a timeout and performs the actual
//! (blocking) page write.
//!
//! This crate provides the worker loop as a plain `async fn run(&self)`
//! rather than spawning a task itself — `embassy_executor::task` functions
//! must be monomorphic, so the application instantiates a concrete
//! `#[embassy_executor::task]` wrapper around `Logger::run` for its chosen
//! `D`/`C`/`PDS`/`N`.

mod fmt;

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use fmt::warn;
use ring_device::NandFlash;
use ring_log_core::clock::{MonotonicClock, TickSource};
use ring_log_core::{Ring, RingError, RingState};
use thiserror::Error;

/// Index into the slab pool. Posted through the mailbox instead of a raw
/// pointer.
pub type SlabHandle = usize;

const WORKER_FETCH_TIMEOUT: Duration = Duration::from_millis(100);

struct Pool<const PDS: usize, const N: usize> {
    slots: [[u8; PDS]; N],
    free: [bool; N],
}

impl<const PDS: usize, const N: usize> Pool<PDS, N> {
    const fn new() -> Self {
        Self {
            slots: [[0u8; PDS]; N],
            free: [true; N],
        }
    }

    fn alloc(&mut self) -> Option<SlabHandle> {
        self.free.iter().position(|&f| f).inspect(|&i| {
            self.free[i] = false;
        })
    }

    fn free_slot(&mut self, handle: SlabHandle) {
        self.free[handle] = true;
    }

    fn slot(&self, handle: SlabHandle) -> &[u8; PDS] {
        &self.slots[handle]
    }

    fn slot_mut(&mut self, handle: SlabHandle) -> &mut [u8; PDS] {
        &mut self.slots[handle]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoggerState {
    Uninit,
    Ready,
    NoSpace,
    Stop,
}

#[derive(Debug, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoggerError {
    #[error("ring must be mounted before starting the logger")]
    RingNotMounted,
    #[error("logger already started")]
    AlreadyStarted,
    #[error("operation not valid in the current logger state")]
    WrongState,
    #[error("slab pool exhausted")]
    PoolExhausted,
    #[error("ring engine error")]
    Ring(#[from] RingError),
}

/// Bounded-memory append pipeline. `PDS` must equal `D::PAGE_DATA_SIZE` and
/// `N` is the slab pool depth (the reference default is 3); both are
/// checked at `start`.
pub struct Logger<'d, D: NandFlash, C: TickSource, const PDS: usize, const N: usize> {
    clock: &'d MonotonicClock<C>,
    pool: BlockingMutex<CriticalSectionRawMutex, RefCell<Pool<PDS, N>>>,
    channel: Channel<CriticalSectionRawMutex, SlabHandle, N>,
    ring: RefCell<Option<Ring<D>>>,
    terminate: AtomicBool,
    done: Signal<CriticalSectionRawMutex, ()>,
    cur_slab: Cell<Option<SlabHandle>>,
    free_in_slab: Cell<usize>,
    state: Cell<LoggerState>,
}

impl<'d, D: NandFlash, C: TickSource, const PDS: usize, const N: usize> Logger<'d, D, C, PDS, N> {
    pub const fn new(clock: &'d MonotonicClock<C>) -> Self {
        Self {
            clock,
            pool: BlockingMutex::new(RefCell::new(Pool::new())),
            channel: Channel::new(),
            ring: RefCell::new(None),
            terminate: AtomicBool::new(false),
            done: Signal::new(),
            cur_slab: Cell::new(None),
            free_in_slab: Cell::new(0),
            state: Cell::new(LoggerState::Uninit),
        }
    }

    pub fn state(&self) -> LoggerState {
        self.state.get()
    }

    fn pool_alloc(&self) -> Option<SlabHandle> {
        self.pool.lock(|cell| cell.borrow_mut().alloc())
    }

    fn copy_into_slab(&self, slab: SlabHandle, offset: usize, data: &[u8]) {
        self.pool.lock(|cell| {
            cell.borrow_mut().slot_mut(slab)[offset..offset + data.len()].copy_from_slice(data);
        });
    }

    /// Allocates the slab pool (once per lifetime) and acquires the first
    /// slab. `ring` must already be `Mounted`.
    pub fn start(&self, ring: Ring<D>) -> Result<(), LoggerError> {
        if self.state.get() == LoggerState::Ready {
            return Err(LoggerError::AlreadyStarted);
        }
        if ring.state() != RingState::Mounted {
            return Err(LoggerError::RingNotMounted);
        }
        debug_assert_eq!(D::PAGE_DATA_SIZE, PDS);

        *self.ring.borrow_mut() = Some(ring);
        self.terminate.store(false, Ordering::Relaxed);

        if self.cur_slab.get().is_none() {
            match self.pool_alloc() {
                Some(slab) => {
                    self.cur_slab.set(Some(slab));
                    self.free_in_slab.set(PDS);
                }
                None => return Err(LoggerError::PoolExhausted),
            }
        }
        self.state.set(LoggerState::Ready);
        Ok(())
    }

    /// Appends `buf` to the current slab, shipping full slabs to the worker.
    /// Returns the number of bytes accepted, which is `< buf.len()` under
    /// backpressure (the pool has nothing free) and `0` once the ring is
    /// exhausted. Never blocks.
    pub fn write(&self, buf: &[u8]) -> usize {
        if self.state.get() == LoggerState::NoSpace {
            return 0;
        }
        if self.cur_slab.get().is_none() {
            match self.pool_alloc() {
                Some(slab) => {
                    self.cur_slab.set(Some(slab));
                    self.free_in_slab.set(PDS);
                }
                None => return 0,
            }
        }

        let mut copied = 0usize;
        while buf.len() - copied >= self.free_in_slab.get() {
            let slab = self.cur_slab.get().expect("checked above");
            let free = self.free_in_slab.get();
            self.copy_into_slab(slab, PDS - free, &buf[copied..copied + free]);
            copied += free;

            if self.channel.try_send(slab).is_err() {
                warn!("mailbox post failed though it is sized to the pool");
            }
            self.cur_slab.set(None);

            match self.pool_alloc() {
                Some(next) => {
                    self.cur_slab.set(Some(next));
                    self.free_in_slab.set(PDS);
                }
                None => {
                    self.free_in_slab.set(0);
                    return copied;
                }
            }
        }

        let slab = self.cur_slab.get().expect("checked above");
        let free = self.free_in_slab.get();
        let tail = &buf[copied..];
        self.copy_into_slab(slab, PDS - free, tail);
        self.free_in_slab.set(free - tail.len());
        copied += tail.len();
        copied
    }

    /// Delivers one slab to the ring engine and returns it to the pool,
    /// regardless of the outcome.
    fn deliver(&self, slab: SlabHandle) {
        let now = self.clock.now_us();
        let mut ring_slot = self.ring.borrow_mut();
        if let Some(ring) = ring_slot.as_mut() {
            let result = self
                .pool
                .lock(|cell| ring.append_page(cell.borrow().slot(slab), now));
            match result {
                Ok(()) => {}
                Err(RingError::NoSpace) => {
                    warn!("ring out of space, latching logger to NO_SPACE");
                    self.state.set(LoggerState::NoSpace);
                }
                Err(_) => {
                    warn!("ring rejected page write");
                }
            }
        }
        drop(ring_slot);
        self.pool.lock(|cell| cell.borrow_mut().free_slot(slab));
    }

    /// Worker loop: fetch a slab with a bounded timeout and hand it to the
    /// ring engine. Runs until [`Self::stop`] sets the termination flag,
    /// then drains whatever remains in the mailbox without a timeout.
    pub async fn run(&self) {
        loop {
            match with_timeout(WORKER_FETCH_TIMEOUT, self.channel.receive()).await {
                Ok(slab) => self.deliver(slab),
                Err(_timeout) => {}
            }
            if self.terminate.load(Ordering::Relaxed) {
                while let Ok(slab) = self.channel.try_receive() {
                    self.deliver(slab);
                }
                self.done.signal(());
                return;
            }
        }
    }

    /// Zero-pads and posts the current slab, then signals the worker to
    /// terminate and waits for it to fully drain the mailbox. The ring is
    /// left mounted; the caller owns its lifecycle.
    pub async fn stop(&self) {
        if let Some(slab) = self.cur_slab.get() {
            let free = self.free_in_slab.get();
            if free > 0 {
                self.pool.lock(|cell| {
                    cell.borrow_mut().slot_mut(slab)[PDS - free..].fill(0);
                });
            }
            if self.channel.try_send(slab).is_err() {
                warn!("mailbox post failed during stop though it is sized to the pool");
            }
            self.cur_slab.set(None);
            self.free_in_slab.set(0);
        }
        self.terminate.store(true, Ordering::Relaxed);
        self.done.wait().await;
        self.done.reset();
        self.state.set(LoggerState::Stop);
    }

    /// Forwards to the ring engine's umount. Precondition: logger `Stop`.
    /// `Ring::umount` accepts both `Mounted` and `NoSpace`, so this is
    /// reachable after the logger has latched `NoSpace` and not only after a
    /// normal stop — the caller can replace the underlying device and
    /// `mount` again without dropping down to a directly held `Ring`.
    pub fn umount(&self) -> Result<(), LoggerError> {
        if self.state.get() != LoggerState::Stop {
            return Err(LoggerError::WrongState);
        }
        let mut ring_slot = self.ring.borrow_mut();
        let ring = ring_slot.as_mut().ok_or(LoggerError::WrongState)?;
        ring.umount().map_err(LoggerError::Ring)
    }

    /// Forwards to the ring engine's erase. Precondition: logger `Stop`
    /// (and, per the ring's own precondition, the ring already `Idle`).
    pub fn erase(&self) -> Result<(), LoggerError> {
        if self.state.get() != LoggerState::Stop {
            return Err(LoggerError::WrongState);
        }
        let mut ring_slot = self.ring.borrow_mut();
        let ring = ring_slot.as_mut().ok_or(LoggerError::WrongState)?;
        ring.erase().map_err(LoggerError::Ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell as StdCell;
    use ring_device::virt::VirtualNandFlash;
    use ring_log_core::ring::RingConfig;
    use test_log::test;

    const PDS: usize = 64;
    const PSS: usize = 40;
    const PPB: usize = 4;
    const BC: usize = 40;
    const N: usize = 3;

    type Flash = VirtualNandFlash<PDS, PSS, PPB, BC>;

    struct FakeTicks(StdCell<u64>);
    impl TickSource for &FakeTicks {
        const BITS: u32 = 32;
        const TICK_HZ: u64 = 1_000_000;
        fn ticks(&self) -> u64 {
            self.0.get()
        }
    }

    fn mounted_ring() -> Ring<Flash> {
        let mut ring = Ring::object_init(Flash::new());
        ring.start(RingConfig {
            start_blk: ring_device::BlockIndex::new(0),
            len: 32,
        })
        .unwrap();
        ring.erase().unwrap();
        ring.mount().unwrap();
        ring
    }

    #[test]
    fn write_exactly_one_page_posts_a_slab() {
        let ticks = FakeTicks(StdCell::new(0));
        let clock = MonotonicClock::new(&ticks);
        let logger: Logger<Flash, &FakeTicks, PDS, N> = Logger::new(&clock);
        logger.start(mounted_ring()).unwrap();

        let n = logger.write(&[0xAB; PDS]);
        assert_eq!(n, PDS);
        assert_eq!(logger.free_in_slab.get(), PDS);

        let slab = logger.channel.try_receive().expect("slab posted");
        logger.deliver(slab);

        let ring_slot = logger.ring.borrow();
        let ring = ring_slot.as_ref().unwrap();
        assert_eq!(ring.cursor_id(), 2);
    }

    #[test]
    fn partial_write_leaves_slab_open() {
        let ticks = FakeTicks(StdCell::new(0));
        let clock = MonotonicClock::new(&ticks);
        let logger: Logger<Flash, &FakeTicks, PDS, N> = Logger::new(&clock);
        logger.start(mounted_ring()).unwrap();

        let n = logger.write(&[1; PDS / 2]);
        assert_eq!(n, PDS / 2);
        assert_eq!(logger.free_in_slab.get(), PDS - PDS / 2);
        assert!(logger.channel.try_receive().is_err());
    }

    #[test]
    fn pool_exhaustion_yields_short_write() {
        let ticks = FakeTicks(StdCell::new(0));
        let clock = MonotonicClock::new(&ticks);
        let logger: Logger<Flash, &FakeTicks, PDS, N> = Logger::new(&clock);
        logger.start(mounted_ring()).unwrap();

        // Exhaust every slot in the pool (N=3) with full-page writes that
        // never get drained, then the final write should return 0.
        let big = [0u8; PDS * N];
        let first_pass = logger.write(&big);
        assert_eq!(first_pass, PDS * N);
        let n = logger.write(&[9; PDS]);
        assert_eq!(n, 0);
    }
}
