//! Session iterator: walks the reverse-linked chain of `back_link` values to
//! yield sessions newest-first. Binding borrows the ring exclusively for the
//! walk's lifetime, which is the borrow-checker's version of the "no append
//! while bounded" precondition.

use ring_device::{BlockIndex, NandFlash, PageIndex};

use crate::error::RingError;
use crate::ring::{Ring, RingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionClass {
    NoSession,
    Single,
    Looped,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingSession {
    pub id: u64,
    pub time_boot_us: u64,
    pub utc_correction: u32,
    pub first_blk: BlockIndex,
    pub last_blk: BlockIndex,
    pub last_page: PageIndex,
}

pub struct SessionIterator<'a, D: NandFlash> {
    ring: &'a mut Ring<D>,
    class: SessionClass,
    last_blk: BlockIndex,
    notch: BlockIndex,
    finished: bool,
}

impl<'a, D: NandFlash> SessionIterator<'a, D> {
    /// Classifies the ring and binds the walk. `ring` must be `Mounted`.
    pub fn bind(ring: &'a mut Ring<D>) -> Result<Self, RingError> {
        if ring.state != RingState::Mounted {
            return Err(RingError::WrongState);
        }

        if ring.cur_id == 1 {
            ring.state = RingState::IteratorBounded;
            return Ok(Self {
                ring,
                class: SessionClass::NoSession,
                last_blk: BlockIndex::new(0),
                notch: BlockIndex::new(0),
                finished: true,
            });
        }

        let mut best: Option<(BlockIndex, u64)> = None;
        for i in 0..ring.cfg.len {
            let block = ring.cfg.start_blk + i;
            if ring.dev.is_bad(block) {
                continue;
            }
            let id = ring.page0_id(block);
            if id > 0 {
                match best {
                    Some((_, best_id)) if best_id >= id => {}
                    _ => best = Some((block, id)),
                }
            }
        }
        let last_blk = best.map(|(b, _)| b).ok_or(RingError::Other)?;
        let notch = ring.cur_back_link;

        let class = match ring.next_good(ring.cur_blk) {
            None => SessionClass::Single,
            Some(candidate) => match ring.read_header(candidate, PageIndex::new(0)) {
                None => SessionClass::Single,
                Some(h) if h.back_link == ring.cur_back_link => SessionClass::Looped,
                Some(_) => SessionClass::Multi,
            },
        };

        ring.state = RingState::IteratorBounded;
        Ok(Self {
            ring,
            class,
            last_blk,
            notch,
            finished: false,
        })
    }

    pub fn class(&self) -> SessionClass {
        self.class
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Yields the next session moving backward in time, or `None` once the
    /// chain is exhausted (equivalently, `finished()` becomes true).
    pub fn next(&mut self) -> Option<RingSession> {
        if self.finished || self.class == SessionClass::NoSession {
            self.finished = true;
            return None;
        }

        let ring = &mut *self.ring;

        let last_page = match ring.last_written_page(self.last_blk) {
            Some(p) => p,
            None => {
                self.finished = true;
                return None;
            }
        };
        let header_last = match ring.read_header(self.last_blk, last_page) {
            Some(h) => h,
            None => {
                self.finished = true;
                return None;
            }
        };

        let first_blk = match self.class {
            SessionClass::NoSession => unreachable!(),
            SessionClass::Single => {
                self.finished = true;
                let end_blk = ring.cfg.start_blk + (ring.cfg.len - 1);
                ring.next_good(end_blk)?
            }
            SessionClass::Looped => {
                self.finished = true;
                ring.next_good(ring.cur_blk)?
            }
            SessionClass::Multi => match ring.next_good(header_last.back_link) {
                Some(b) => b,
                None => {
                    self.finished = true;
                    return None;
                }
            },
        };

        let header_first = match ring.read_header(first_blk, PageIndex::new(0)) {
            Some(h) => h,
            None => {
                self.finished = true;
                return None;
            }
        };

        if header_first.back_link != header_last.back_link || header_first.id == header_last.id {
            self.finished = true;
            return None;
        }

        let session = RingSession {
            id: header_first.id,
            time_boot_us: header_first.time_boot_us,
            utc_correction: header_last.utc_correction,
            first_blk,
            last_blk: self.last_blk,
            last_page,
        };

        if self.class == SessionClass::Multi && header_first.back_link == self.notch {
            self.finished = true;
        }
        self.last_blk = header_last.back_link;

        Some(session)
    }

    /// Returns the ring to `Mounted`. Equivalent to dropping the iterator;
    /// kept as an explicit method to match the operation table.
    pub fn release(self) {}
}

impl<'a, D: NandFlash> Drop for SessionIterator<'a, D> {
    fn drop(&mut self) {
        self.ring.state = RingState::Mounted;
    }
}
