//! NAND service helpers: range erase, randomized fill (teardown/test), and
//! whole-page migration between blocks. These are plain functions over a
//! `D: NandFlash`, not ring state — the ring engine calls into them but so
//! can a standalone maintenance tool.

use ring_device::{BlockIndex, NandFlash, PageIndex};

use crate::header::MAX_SPARE_SIZE;

/// Erases every block in `[start, start+len)`. Skips blocks already marked
/// bad unless `force`. A block whose erase fails is marked bad. Returns the
/// number of newly detected bad blocks.
pub fn erase_range<D: NandFlash>(dev: &mut D, start: BlockIndex, len: u16, force: bool) -> u32 {
    let mut new_bad = 0;
    for i in 0..len {
        let block = start + i;
        if !force && dev.is_bad(block) {
            continue;
        }
        if dev.erase_block(block).is_err() {
            let _ = dev.mark_bad(block);
            new_bad += 1;
        }
    }
    new_bad
}

/// xorshift32, seeded explicitly by the caller. Used only to produce
/// reproducible filler bytes for [`fill_random_range`] — not a
/// cryptographic or statistically-tested RNG.
struct XorShift32(u32);

impl XorShift32 {
    fn new(seed: u32) -> Self {
        Self(if seed == 0 { 0x9E37_79B9 } else { seed })
    }

    fn next_byte(&mut self) -> u8 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        (self.0 & 0xFF) as u8
    }
}

/// Erases `[start, start+len)` then overwrites every good block's pages with
/// pseudo-random bytes, forcing the first two spare bytes of each page back
/// to `0xFF` so the randomized content can never be mistaken for a bad-block
/// mark. Used for secure teardown and as test-fixture scramble.
pub fn fill_random_range<D: NandFlash>(dev: &mut D, start: BlockIndex, len: u16, seed: u32) -> u32 {
    let new_bad = erase_range(dev, start, len, false);
    let mut rng = XorShift32::new(seed);
    let mut data = [0u8; crate::header::MAX_PAGE_DATA_SIZE];
    let mut spare = [0u8; MAX_SPARE_SIZE];

    for i in 0..len {
        let block = start + i;
        if dev.is_bad(block) {
            continue;
        }
        let mut failed = false;
        for p in 0..D::PAGES_PER_BLOCK as u32 {
            let page = PageIndex::new(p);
            for b in data[..D::PAGE_DATA_SIZE].iter_mut() {
                *b = rng.next_byte();
            }
            for b in spare[..D::PAGE_SPARE_SIZE].iter_mut() {
                *b = rng.next_byte();
            }
            spare[0] = 0xFF;
            spare[1] = 0xFF;
            if dev.write_page_data(block, page, &data[..D::PAGE_DATA_SIZE]).is_err()
                || dev
                    .write_page_spare(block, page, &spare[..D::PAGE_SPARE_SIZE])
                    .is_err()
            {
                failed = true;
                break;
            }
        }
        if failed {
            let _ = dev.mark_bad(block);
        }
    }
    new_bad
}

/// Copies the first `pages` whole pages (data + spare) from `src` to `dst`.
/// `dst` must already be erased. Stops at the first failed page and returns
/// the error.
pub fn data_move<D: NandFlash>(
    dev: &mut D,
    src: BlockIndex,
    dst: BlockIndex,
    pages: u32,
) -> Result<(), D::Error> {
    let mut data = [0u8; crate::header::MAX_PAGE_DATA_SIZE];
    let mut spare = [0u8; MAX_SPARE_SIZE];
    for p in 0..pages {
        let page = PageIndex::new(p);
        dev.read_page_data(src, page, &mut data[..D::PAGE_DATA_SIZE])?;
        dev.read_page_spare(src, page, &mut spare[..D::PAGE_SPARE_SIZE])?;
        dev.write_page_data(dst, page, &data[..D::PAGE_DATA_SIZE])?;
        dev.write_page_spare(dst, page, &spare[..D::PAGE_SPARE_SIZE])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_device::virt::VirtualNandFlash;

    const PDS: usize = 64;
    const PSS: usize = 32;
    const PPB: usize = 4;
    const BC: usize = 8;
    type Flash = VirtualNandFlash<PDS, PSS, PPB, BC>;

    #[test]
    fn erase_range_marks_bad_on_failure() {
        let mut flash = Flash::new();
        flash.mark_bad(BlockIndex::new(2)).unwrap();
        let new_bad = erase_range(&mut flash, BlockIndex::new(0), 4, false);
        assert_eq!(new_bad, 0);
        assert!(flash.is_bad(BlockIndex::new(2)));
    }

    #[test]
    fn fill_random_range_preserves_bad_mark_convention() {
        let mut flash = Flash::new();
        fill_random_range(&mut flash, BlockIndex::new(0), 2, 7);
        let mut spare = [0u8; PSS];
        flash
            .read_page_spare(BlockIndex::new(0), PageIndex::new(0), &mut spare)
            .unwrap();
        assert_eq!(&spare[..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn data_move_copies_payload() {
        let mut flash = Flash::new();
        flash
            .write_page_data(BlockIndex::new(0), PageIndex::new(0), &[7; PDS])
            .unwrap();
        flash
            .write_page_spare(BlockIndex::new(0), PageIndex::new(0), &[9; PSS])
            .unwrap();
        flash.erase_block(BlockIndex::new(1)).unwrap();
        data_move(&mut flash, BlockIndex::new(0), BlockIndex::new(1), 1).unwrap();
        let mut data = [0u8; PDS];
        let mut spare = [0u8; PSS];
        flash
            .read_page_data(BlockIndex::new(1), PageIndex::new(0), &mut data)
            .unwrap();
        flash
            .read_page_spare(BlockIndex::new(1), PageIndex::new(0), &mut spare)
            .unwrap();
        assert_eq!(data, [7; PDS]);
        assert_eq!(spare, [9; PSS]);
    }
}
