//! RAM-backed test devices: a [`VirtualNandFlash`] that behaves like real
//! NAND (erase sets bits, program only clears them) and a
//! [`FaultInjectingDevice`] decorator that turns `BlockFail` errors on at a
//! configurable rate, for exercising the ring engine's rescue path.

use crate::{BlockIndex, ErrorType, NandFlash, NandFlashError, NandFlashErrorKind, PageIndex};

/// A virtual NAND flash implementation that can be used for testing purposes.
#[derive(Debug, Clone)]
pub struct VirtualNandFlash<
    const PAGE_DATA_SIZE: usize,
    const PAGE_SPARE_SIZE: usize,
    const PAGES_PER_BLOCK: usize,
    const BLOCK_COUNT: usize,
> {
    data: [[[u8; PAGE_DATA_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT],
    spare: [[[u8; PAGE_SPARE_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT],
    bad: [bool; BLOCK_COUNT],
    erase_count: [u32; BLOCK_COUNT],
}

impl<
        const PAGE_DATA_SIZE: usize,
        const PAGE_SPARE_SIZE: usize,
        const PAGES_PER_BLOCK: usize,
        const BLOCK_COUNT: usize,
    > VirtualNandFlash<PAGE_DATA_SIZE, PAGE_SPARE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    /// Creates a new, fully-erased instance of the virtual NAND flash.
    pub fn new() -> Self {
        Self {
            data: [[[0xFF; PAGE_DATA_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT],
            spare: [[[0xFF; PAGE_SPARE_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT],
            bad: [false; BLOCK_COUNT],
            erase_count: [0; BLOCK_COUNT],
        }
    }

    /// Number of times a block has been erased since construction.
    pub fn erase_count(&self, block: BlockIndex) -> u32 {
        self.erase_count[block.as_u16() as usize]
    }
}

impl<
        const PAGE_DATA_SIZE: usize,
        const PAGE_SPARE_SIZE: usize,
        const PAGES_PER_BLOCK: usize,
        const BLOCK_COUNT: usize,
    > Default for VirtualNandFlash<PAGE_DATA_SIZE, PAGE_SPARE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    OutOfBounds,
    BlockFail,
}

impl NandFlashError for Error {
    fn kind(&self) -> NandFlashErrorKind {
        match self {
            Error::OutOfBounds => NandFlashErrorKind::OutOfBounds,
            Error::BlockFail => NandFlashErrorKind::BlockFail(None),
        }
    }
}

impl<
        const PAGE_DATA_SIZE: usize,
        const PAGE_SPARE_SIZE: usize,
        const PAGES_PER_BLOCK: usize,
        const BLOCK_COUNT: usize,
    > ErrorType for VirtualNandFlash<PAGE_DATA_SIZE, PAGE_SPARE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    type Error = Error;
}

impl<
        const PAGE_DATA_SIZE: usize,
        const PAGE_SPARE_SIZE: usize,
        const PAGES_PER_BLOCK: usize,
        const BLOCK_COUNT: usize,
    > VirtualNandFlash<PAGE_DATA_SIZE, PAGE_SPARE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    fn check(&self, block: BlockIndex, page: PageIndex) -> Result<(), Error> {
        if block.as_u16() as usize >= BLOCK_COUNT || page.as_u32() as usize >= PAGES_PER_BLOCK {
            return Err(Error::OutOfBounds);
        }
        if self.bad[block.as_u16() as usize] {
            return Err(Error::BlockFail);
        }
        Ok(())
    }
}

impl<
        const PAGE_DATA_SIZE: usize,
        const PAGE_SPARE_SIZE: usize,
        const PAGES_PER_BLOCK: usize,
        const BLOCK_COUNT: usize,
    > NandFlash for VirtualNandFlash<PAGE_DATA_SIZE, PAGE_SPARE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    const PAGE_DATA_SIZE: usize = PAGE_DATA_SIZE;
    const PAGE_SPARE_SIZE: usize = PAGE_SPARE_SIZE;
    const PAGES_PER_BLOCK: usize = PAGES_PER_BLOCK;
    const BLOCK_COUNT: usize = BLOCK_COUNT;

    fn read_page_data(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.check(block, page)?;
        buf.copy_from_slice(&self.data[block.as_u16() as usize][page.as_u32() as usize]);
        Ok(())
    }

    fn read_page_spare(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.check(block, page)?;
        buf.copy_from_slice(&self.spare[block.as_u16() as usize][page.as_u32() as usize]);
        Ok(())
    }

    fn write_page_data(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<u32, Self::Error> {
        self.check(block, page)?;
        let dest = &mut self.data[block.as_u16() as usize][page.as_u32() as usize];
        for (d, s) in dest.iter_mut().zip(buf.iter()) {
            *d &= *s;
        }
        Ok(0)
    }

    fn write_page_spare(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<(), Self::Error> {
        self.check(block, page)?;
        let dest = &mut self.spare[block.as_u16() as usize][page.as_u32() as usize];
        for (d, s) in dest.iter_mut().zip(buf.iter()) {
            *d &= *s;
        }
        Ok(())
    }

    fn write_page_whole(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<(), Self::Error> {
        self.check(block, page)?;
        let (data, spare) = buf.split_at(PAGE_DATA_SIZE);
        self.write_page_data(block, page, data)?;
        self.write_page_spare(block, page, spare)?;
        Ok(())
    }

    fn erase_block(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        if block.as_u16() as usize >= BLOCK_COUNT {
            return Err(Error::OutOfBounds);
        }
        if self.bad[block.as_u16() as usize] {
            return Err(Error::BlockFail);
        }
        for page in self.data[block.as_u16() as usize].iter_mut() {
            page.fill(0xFF);
        }
        for page in self.spare[block.as_u16() as usize].iter_mut() {
            page.fill(0xFF);
        }
        self.erase_count[block.as_u16() as usize] += 1;
        Ok(())
    }

    fn is_bad(&self, block: BlockIndex) -> bool {
        self.bad
            .get(block.as_u16() as usize)
            .copied()
            .unwrap_or(true)
    }

    fn mark_bad(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        if block.as_u16() as usize >= BLOCK_COUNT {
            return Err(Error::OutOfBounds);
        }
        self.bad[block.as_u16() as usize] = true;
        Ok(())
    }
}

/// Wraps a [`NandFlash`] device and fails roughly one in `k` erase/program
/// calls with `BlockFail`, to exercise the ring engine's rescue and
/// bad-block-skipping paths without needing real flaky hardware.
///
/// Uses a small xorshift counter rather than an RNG crate: the decorator
/// only needs a deterministic, reproducible-per-seed sequence, not real
/// randomness.
#[derive(Debug, Clone)]
pub struct FaultInjectingDevice<D> {
    inner: D,
    state: u32,
    one_in: u32,
}

impl<D: NandFlash> FaultInjectingDevice<D> {
    /// `one_in == 0` disables fault injection entirely.
    pub fn new(inner: D, seed: u32, one_in: u32) -> Self {
        Self {
            inner,
            state: if seed == 0 { 1 } else { seed },
            one_in,
        }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    fn roll(&mut self) -> bool {
        if self.one_in == 0 {
            return false;
        }
        // xorshift32
        self.state ^= self.state << 13;
        self.state ^= self.state >> 17;
        self.state ^= self.state << 5;
        self.state % self.one_in == 0
    }
}

impl<D: NandFlash> ErrorType for FaultInjectingDevice<D> {
    type Error = D::Error;
}

impl<D: NandFlash> NandFlash for FaultInjectingDevice<D> {
    const PAGE_DATA_SIZE: usize = D::PAGE_DATA_SIZE;
    const PAGE_SPARE_SIZE: usize = D::PAGE_SPARE_SIZE;
    const PAGES_PER_BLOCK: usize = D::PAGES_PER_BLOCK;
    const BLOCK_COUNT: usize = D::BLOCK_COUNT;

    fn read_page_data(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.inner.read_page_data(block, page, buf)
    }

    fn read_page_spare(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.inner.read_page_spare(block, page, buf)
    }

    fn write_page_data(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<u32, Self::Error> {
        if self.roll() {
            let _ = self.inner.mark_bad(block);
            return self.inner.write_page_data(block, page, buf);
        }
        self.inner.write_page_data(block, page, buf)
    }

    fn write_page_spare(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<(), Self::Error> {
        if self.roll() {
            let _ = self.inner.mark_bad(block);
        }
        self.inner.write_page_spare(block, page, buf)
    }

    fn write_page_whole(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<(), Self::Error> {
        if self.roll() {
            let _ = self.inner.mark_bad(block);
        }
        self.inner.write_page_whole(block, page, buf)
    }

    fn erase_block(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        if self.roll() {
            let _ = self.inner.mark_bad(block);
        }
        self.inner.erase_block(block)
    }

    fn is_bad(&self, block: BlockIndex) -> bool {
        self.inner.is_bad(block)
    }

    fn mark_bad(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        self.inner.mark_bad(block)
    }
}
