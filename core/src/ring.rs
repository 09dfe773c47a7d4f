//! Ring engine: on-media layout, mount/recovery, bad-block-aware block
//! advance, write-time rescue. This owns the block device and all volatile
//! cursor state; the session walk lives in [`crate::session`].
//!
//! Every device error this engine observes is handled locally: a failed
//! erase or program marks the block bad and retries elsewhere (see
//! `erase_next`, `block_data_rescue`), it is never propagated to the
//! caller as a [`crate::error::RingError`] variant.

use ring_device::{BlockIndex, NandFlash, PageIndex};

use crate::error::RingError;
use crate::fmt::{debug, warn};
use crate::header::{PageHeader, BAD_MARK_OK, MAX_PAGE_DATA_SIZE, MAX_SPARE_SIZE};
use crate::service;

/// `start_blk`/`len` of the block range the ring occupies, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingConfig {
    pub start_blk: BlockIndex,
    pub len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingState {
    Uninit,
    Idle,
    Mounted,
    IteratorBounded,
    NoSpace,
    Stop,
}

/// Debug counters tracking every retry and newly detected bad block; no
/// failure path is silently dropped (see error-handling policy).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingCounters {
    pub data_rescue: u32,
    pub new_badblocks: u32,
    pub write_data_failed: u32,
    pub write_spare_failed: u32,
    pub erase_failed: u32,
}

pub struct Ring<D: NandFlash> {
    pub(crate) dev: D,
    pub(crate) cfg: RingConfig,
    pub(crate) state: RingState,
    pub(crate) cur_blk: BlockIndex,
    pub(crate) cur_page: PageIndex,
    pub(crate) cur_id: u64,
    pub(crate) cur_back_link: BlockIndex,
    utc_correction: u32,
    counters: RingCounters,
}

impl<D: NandFlash> Ring<D> {
    /// Zeroes cursor state; `start` must be called before any other
    /// operation.
    pub fn object_init(dev: D) -> Self {
        Self {
            dev,
            cfg: RingConfig {
                start_blk: BlockIndex::new(0),
                len: 0,
            },
            state: RingState::Uninit,
            cur_blk: BlockIndex::new(0),
            cur_page: PageIndex::new(0),
            cur_id: 0,
            cur_back_link: BlockIndex::new(0),
            utc_correction: 0,
            counters: RingCounters::default(),
        }
    }

    /// Validates `cfg` against the device geometry and the compile-time
    /// stack-buffer bounds this crate uses for spare/data scratch space.
    pub fn start(&mut self, cfg: RingConfig) -> Result<(), RingError> {
        if self.state != RingState::Uninit {
            return Err(RingError::WrongState);
        }
        if cfg.len < 32 {
            return Err(RingError::InvalidConfig);
        }
        if cfg.start_blk.as_u16() as usize + cfg.len as usize > D::BLOCK_COUNT {
            return Err(RingError::InvalidConfig);
        }
        if PageHeader::ENCODED_LEN > D::PAGE_SPARE_SIZE {
            return Err(RingError::InvalidConfig);
        }
        if D::PAGE_SPARE_SIZE > MAX_SPARE_SIZE || D::PAGE_DATA_SIZE > MAX_PAGE_DATA_SIZE {
            return Err(RingError::InvalidConfig);
        }
        self.cfg = cfg;
        self.state = RingState::Idle;
        Ok(())
    }

    pub fn state(&self) -> RingState {
        self.state
    }

    pub fn counters(&self) -> RingCounters {
        self.counters
    }

    /// Sequence id the next [`Self::append_page`] call will stamp.
    pub fn cursor_id(&self) -> u64 {
        self.cur_id
    }

    pub fn set_utc_correction(&mut self, correction: u32) {
        self.utc_correction = correction;
    }

    pub fn total_good(&self) -> u32 {
        (0..self.cfg.len)
            .filter(|&i| !self.dev.is_bad(self.cfg.start_blk + i))
            .count() as u32
    }

    pub fn into_device(self) -> D {
        self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    fn end_blk(&self) -> BlockIndex {
        self.cfg.start_blk + (self.cfg.len - 1)
    }

    fn ring_offset(&self, block: BlockIndex) -> u16 {
        block.as_u16() - self.cfg.start_blk.as_u16()
    }

    fn block_at_offset(&self, offset: u16) -> BlockIndex {
        self.cfg.start_blk + (offset % self.cfg.len)
    }

    /// First good block strictly after `from`, wrapping within the ring.
    /// Pure lookup: never erases, never mutates state.
    pub(crate) fn next_good(&self, from: BlockIndex) -> Option<BlockIndex> {
        let start_offset = self.ring_offset(from);
        for step in 1..=self.cfg.len {
            let candidate = self.block_at_offset(start_offset + step);
            if !self.dev.is_bad(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Picks the next good block after `cur`, erasing it. On erase failure
    /// marks the block bad and tries the next one. `None` once a full
    /// traversal wraps without finding a usable block.
    fn erase_next(&mut self, cur: BlockIndex) -> Option<BlockIndex> {
        let mut candidate = cur;
        loop {
            let next = self.next_good(candidate)?;
            match self.dev.erase_block(next) {
                Ok(()) => return Some(next),
                Err(_) => {
                    let _ = self.dev.mark_bad(next);
                    self.counters.erase_failed += 1;
                    self.counters.new_badblocks += 1;
                    candidate = next;
                }
            }
        }
    }

    pub(crate) fn page0_id(&mut self, block: BlockIndex) -> u64 {
        match self.read_header(block, PageIndex::new(0)) {
            Some(h) => h.id,
            None => 0,
        }
    }

    /// Reads and validates the header at `(block, page)`. `None` covers both
    /// a device read error and a failed/absent CRC — both mean "not a
    /// sealed page" to every caller.
    pub(crate) fn read_header(&mut self, block: BlockIndex, page: PageIndex) -> Option<PageHeader> {
        let mut spare = [0u8; MAX_SPARE_SIZE];
        self.dev
            .read_page_spare(block, page, &mut spare[..D::PAGE_SPARE_SIZE])
            .ok()?;
        PageHeader::from_bytes(&spare[..D::PAGE_SPARE_SIZE]).filter(|h| h.is_sealed())
    }

    /// Largest page index in `block` with a valid header, scanning forward
    /// from page 0 and stopping at the first gap.
    pub(crate) fn last_written_page(&mut self, block: BlockIndex) -> Option<PageIndex> {
        let mut last = None;
        for p in 0..D::PAGES_PER_BLOCK as u32 {
            let page = PageIndex::new(p);
            if self.read_header(block, page).is_some() {
                last = Some(page);
            } else {
                break;
            }
        }
        last
    }

    /// Overwrites `[last_page+1, PPB)` of `block` with all-zero data and a
    /// spare area that is zero except the two bytes that keep it from being
    /// misread as a bad-block mark.
    fn close_tail(&mut self, block: BlockIndex, last_page: PageIndex) {
        let data = [0u8; MAX_PAGE_DATA_SIZE];
        let mut spare = [0u8; MAX_SPARE_SIZE];
        spare[0] = 0xFF;
        spare[1] = 0xFF;
        for p in (last_page.as_u32() + 1)..D::PAGES_PER_BLOCK as u32 {
            let page = PageIndex::new(p);
            let ok = self
                .dev
                .write_page_data(block, page, &data[..D::PAGE_DATA_SIZE])
                .is_ok()
                && self
                    .dev
                    .write_page_spare(block, page, &spare[..D::PAGE_SPARE_SIZE])
                    .is_ok();
            if !ok {
                warn!("closing tail of block {} failed, marking bad", block.as_u16());
                let _ = self.dev.mark_bad(block);
                self.counters.new_badblocks += 1;
                break;
            }
        }
    }

    /// Scans the ring for the most recently mounted session tail and resumes
    /// writing after it, or formats a fresh cursor if the media is empty.
    pub fn mount(&mut self) -> Result<(), RingError> {
        if self.state != RingState::Idle {
            return Err(RingError::WrongState);
        }
        if self.total_good() < self.cfg.len as u32 / 2 {
            return Err(RingError::NotEnoughValidBlocks);
        }

        let mut best: Option<(BlockIndex, u64)> = None;
        for i in 0..self.cfg.len {
            let block = self.cfg.start_blk + i;
            if self.dev.is_bad(block) {
                continue;
            }
            let id = self.page0_id(block);
            if id > 0 {
                match best {
                    Some((_, best_id)) if best_id >= id => {}
                    _ => best = Some((block, id)),
                }
            }
        }

        let last_blk = match best {
            None => {
                let end = self.end_blk();
                let cur_blk = self.erase_next(end).ok_or(RingError::NotEnoughValidBlocks)?;
                self.cur_blk = cur_blk;
                self.cur_page = PageIndex::new(0);
                self.cur_id = 1;
                self.cur_back_link = end;
                self.state = RingState::Mounted;
                debug!("mount: empty media, starting fresh at block {}", cur_blk.as_u16());
                return Ok(());
            }
            Some((block, _)) => block,
        };

        let last_page = self
            .last_written_page(last_blk)
            .expect("argmax block must have at least one valid header");
        let last_header = self
            .read_header(last_blk, last_page)
            .expect("last_written_page only returns validated pages");

        self.close_tail(last_blk, last_page);

        let cur_blk = self.erase_next(last_blk).ok_or(RingError::NotEnoughValidBlocks)?;
        self.cur_blk = cur_blk;
        self.cur_page = PageIndex::new(0);
        self.cur_id = last_header.id + 1;
        self.cur_back_link = last_blk;
        self.state = RingState::Mounted;
        debug!(
            "mount: resuming at block {} page {} id {}",
            cur_blk.as_u16(),
            0,
            self.cur_id
        );
        Ok(())
    }

    /// Valid from `Mounted` and also from `NoSpace`. A ring in `NoSpace` has
    /// exhausted every good block in its configured range (see `erase_next`),
    /// and no device in this crate exposes a way to clear a bad-block mark —
    /// that is permanent, matching real NAND. Recovery therefore needs a
    /// *replacement* or *externally reformatted* device underneath, not a
    /// call to [`Self::erase`] on this same one (which only erases blocks
    /// that are not already marked bad, and so cannot undo the exhaustion
    /// that produced `NoSpace`). Reaching `Idle` from `NoSpace` is the step
    /// this method provides; swapping the device and calling `mount` again
    /// is the caller's job.
    pub fn umount(&mut self) -> Result<(), RingError> {
        if self.state != RingState::Mounted && self.state != RingState::NoSpace {
            return Err(RingError::WrongState);
        }
        self.state = RingState::Idle;
        Ok(())
    }

    pub fn erase(&mut self) -> Result<(), RingError> {
        if self.state != RingState::Idle {
            return Err(RingError::WrongState);
        }
        let new_bad = service::erase_range(&mut self.dev, self.cfg.start_blk, self.cfg.len, false);
        self.counters.new_badblocks += new_bad;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), RingError> {
        if self.state != RingState::Idle {
            return Err(RingError::WrongState);
        }
        self.state = RingState::Stop;
        Ok(())
    }

    /// Relocates the valid pages of `cur_blk` (if any precede `cur_page`) to
    /// a fresh block and retries there. Invoked when a program fails partway
    /// through filling a block.
    fn block_data_rescue(&mut self) -> Result<(), RingError> {
        self.counters.data_rescue += 1;
        loop {
            let candidate = match self.erase_next(self.cur_blk) {
                Some(b) => b,
                None => {
                    self.state = RingState::NoSpace;
                    return Err(RingError::NoSpace);
                }
            };
            if self.cur_page.as_u32() == 0 {
                self.cur_blk = candidate;
                return Ok(());
            }
            match service::data_move(&mut self.dev, self.cur_blk, candidate, self.cur_page.as_u32()) {
                Ok(()) => {
                    self.cur_blk = candidate;
                    return Ok(());
                }
                Err(_) => {
                    let _ = self.dev.mark_bad(candidate);
                    self.counters.new_badblocks += 1;
                }
            }
        }
    }

    /// Appends exactly one page of `D::PAGE_DATA_SIZE` bytes, sealing it with
    /// a header stamped `time_boot_us = now_us`. `now_us` is supplied by the
    /// caller (the logger worker, via its clock) rather than the ring
    /// reading a clock itself, keeping the engine free of a time-source
    /// generic parameter.
    pub fn append_page(&mut self, data: &[u8], now_us: u64) -> Result<(), RingError> {
        if self.state == RingState::NoSpace {
            return Err(RingError::NoSpace);
        }
        if self.state != RingState::Mounted {
            return Err(RingError::WrongState);
        }
        debug_assert_eq!(data.len(), D::PAGE_DATA_SIZE);

        loop {
            let page_ecc = match self.dev.write_page_data(self.cur_blk, self.cur_page, data) {
                Ok(ecc) => ecc,
                Err(_) => {
                    let _ = self.dev.mark_bad(self.cur_blk);
                    self.counters.write_data_failed += 1;
                    self.counters.new_badblocks += 1;
                    self.block_data_rescue()?;
                    continue;
                }
            };

            let header = PageHeader {
                bad_mark: BAD_MARK_OK,
                id: self.cur_id,
                time_boot_us: now_us,
                utc_correction: self.utc_correction,
                page_ecc,
                back_link: self.cur_back_link,
                written: D::PAGE_DATA_SIZE as u16,
                spare_crc: 0,
            };
            let bytes = header.to_bytes();
            if self
                .dev
                .write_page_spare(self.cur_blk, self.cur_page, &bytes)
                .is_err()
            {
                let _ = self.dev.mark_bad(self.cur_blk);
                self.counters.write_spare_failed += 1;
                self.counters.new_badblocks += 1;
                self.block_data_rescue()?;
                continue;
            }

            self.cur_id += 1;
            let next_page = self.cur_page.as_u32() + 1;
            if next_page == D::PAGES_PER_BLOCK as u32 {
                self.cur_page = PageIndex::new(0);
                match self.erase_next(self.cur_blk) {
                    Some(block) => self.cur_blk = block,
                    None => {
                        self.state = RingState::NoSpace;
                        return Err(RingError::NoSpace);
                    }
                }
            } else {
                self.cur_page = PageIndex::new(next_page);
            }
            return Ok(());
        }
    }
}
