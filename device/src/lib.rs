#![no_std]

mod address;
mod fmt;
pub mod virt;

pub use address::{BlockIndex, PageIndex};

/// Convert a device-specific error into a generic error kind.
pub trait NandFlashError: core::fmt::Debug {
    fn kind(&self) -> NandFlashErrorKind;
}

/// Shares an error type across the block device and its callers.
pub trait ErrorType {
    type Error: NandFlashError;
}

/// NAND flash error kinds.
///
/// Implementations map their own error type onto these through
/// [`NandFlashError`] so the ring engine can react uniformly regardless of
/// which concrete device is behind the trait.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum NandFlashErrorKind {
    /// The block/page arguments are out of the device's geometry.
    OutOfBounds,

    /// An erase or program operation failed on this block. The block is
    /// expected to be marked bad and the operation retried elsewhere.
    BlockFail(Option<BlockIndex>),

    /// Error specific to the implementation.
    Other,
}

/// A raw NAND block device, addressed by block and page index.
///
/// This is the abstract collaborator the ring engine is generic over: a
/// concrete implementation talks to whatever transport (SPI, parallel bus, a
/// RAM-backed simulator for tests) actually owns the media. The ring engine
/// never assumes anything about that transport beyond this trait.
pub trait NandFlash: ErrorType {
    /// Bytes of caller payload per page (PDS).
    const PAGE_DATA_SIZE: usize;

    /// Bytes of spare/OOB area per page (PSS). Must be able to hold a
    /// `PageHeader`.
    const PAGE_SPARE_SIZE: usize;

    /// Pages per block (PPB).
    const PAGES_PER_BLOCK: usize;

    /// Total blocks on the device.
    const BLOCK_COUNT: usize;

    /// Read the main (data) area of a page.
    fn read_page_data(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Read the spare (OOB) area of a page.
    fn read_page_spare(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Program the main area of a page, returning the device-reported ECC
    /// syndrome for the programmed data.
    fn write_page_data(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<u32, Self::Error>;

    /// Program the spare area of a page.
    fn write_page_spare(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<(), Self::Error>;

    /// Program a whole page (data followed by spare) in one operation.
    /// `buf.len()` must equal `PAGE_DATA_SIZE + PAGE_SPARE_SIZE`.
    fn write_page_whole(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        buf: &[u8],
    ) -> Result<(), Self::Error>;

    /// Erase a whole block.
    fn erase_block(&mut self, block: BlockIndex) -> Result<(), Self::Error>;

    /// Whether the block is marked bad in the shared bad-block map.
    fn is_bad(&self, block: BlockIndex) -> bool;

    /// Mark the block bad in the shared bad-block map.
    fn mark_bad(&mut self, block: BlockIndex) -> Result<(), Self::Error>;
}
