//! Block bundles: equally sized blocks tracked by two bitmaps.
//!
//! `allocated[i]` marks block `i` as in use. `continues[i]` marks block
//! `i + 1` as part of the same allocation as block `i`. An allocation of
//! `K` blocks at `i` therefore sets `allocated[i..i+K)` and
//! `continues[i..i+K-1)`; its length is recovered on free by counting the
//! set `continues` bits from `i`, without any per-allocation header.
//!
//! ```text
//! block       0   1   2   3   4   5
//! allocated   1   1   1   0   1   0
//! continues   1   1   0   0   0   0
//!             └─ 3 blocks ┘   └ 1 ┘
//! ```

use crate::bitset::Bitset;
use crate::error::HeapError;

#[derive(Debug)]
pub struct BlockBundle {
    base: usize,
    block_size: usize,
    block_count: usize,
    allocated: Bitset,
    continues: Bitset,
}

impl BlockBundle {
    /// `block_count` blocks of `block_size` bytes starting at `base`.
    #[must_use]
    pub fn new(base: usize, block_size: usize, block_count: usize) -> Self {
        debug_assert!(block_size > 0);
        Self {
            base,
            block_size,
            block_count,
            allocated: Bitset::new(block_count),
            continues: Bitset::new(block_count),
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// Bytes covered by the bundle.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.block_size * self.block_count
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.base + self.size()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Index of the block starting exactly at `addr`.
    #[must_use]
    pub const fn index_of(&self, addr: usize) -> Option<usize> {
        if !self.contains(addr) || (addr - self.base) % self.block_size != 0 {
            return None;
        }
        Some((addr - self.base) / self.block_size)
    }

    #[inline]
    #[must_use]
    pub const fn address_of(&self, index: usize) -> usize {
        self.base + index * self.block_size
    }

    /// Reserve `n` consecutive blocks and return the index of the first.
    ///
    /// # Errors
    /// `InvalidArgument` for `n == 0`, `OutOfBlocks` when no free run of
    /// `n` blocks exists.
    pub fn alloc(&mut self, n: usize) -> Result<usize, HeapError> {
        if n == 0 {
            return Err(HeapError::InvalidArgument);
        }
        let index = self
            .allocated
            .find_clear_run(n)
            .ok_or(HeapError::OutOfBlocks)?;
        self.allocated.set_range(index, n);
        self.continues.set_range(index, n - 1);
        Ok(index)
    }

    /// Release `n` blocks starting at `index`.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty or out-of-range span, `DoubleFree`
    /// when any of the blocks is not allocated. Nothing changes on error.
    pub fn free(&mut self, index: usize, n: usize) -> Result<(), HeapError> {
        if n == 0 || index.checked_add(n).is_none_or(|end| end > self.block_count) {
            return Err(HeapError::InvalidArgument);
        }
        if !self.allocated.is_range_set(index, n) {
            return Err(HeapError::DoubleFree);
        }
        self.allocated.clear_range(index, n);
        self.continues.clear_range(index, n);
        Ok(())
    }

    /// Blocks in the allocation starting at `index`.
    #[must_use]
    pub fn run_length(&self, index: usize) -> usize {
        self.continues.count_set_from(index) + 1
    }

    /// Decode and release the whole allocation starting at `index`.
    /// Returns the number of blocks released.
    ///
    /// # Errors
    /// `InvalidArgument` if `index` is out of range or lies inside a run,
    /// `DoubleFree` if the block is not allocated.
    pub fn free_run(&mut self, index: usize) -> Result<usize, HeapError> {
        if index >= self.block_count || (index > 0 && self.continues.test(index - 1)) {
            return Err(HeapError::InvalidArgument);
        }
        if !self.allocated.test(index) {
            return Err(HeapError::DoubleFree);
        }
        let n = self.run_length(index);
        self.free(index, n)?;
        Ok(n)
    }

    /// Bytes of the live allocation starting at `index`.
    #[must_use]
    pub fn size_of(&self, index: usize) -> Option<usize> {
        if index >= self.block_count {
            return None;
        }
        let starts_run = index == 0 || !self.continues.test(index - 1);
        (starts_run && self.allocated.test(index)).then(|| self.run_length(index) * self.block_size)
    }

    /// Whether any live block overlaps `[addr, addr + len)`.
    #[must_use]
    pub fn is_region_used(&self, addr: usize, len: usize) -> bool {
        let start = addr.max(self.base);
        let end = (addr + len).min(self.end());
        if start >= end {
            return false;
        }
        let first = (start - self.base) / self.block_size;
        let last = (end - 1 - self.base) / self.block_size;
        !self.allocated.is_range_clear(first, last - first + 1)
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.allocated.count_ones()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocated.none()
    }

    /// Allocation bitmap, for diagnostics.
    #[must_use]
    pub const fn allocation_map(&self) -> &Bitset {
        &self.allocated
    }

    /// Run-length bitmap, for diagnostics.
    #[must_use]
    pub const fn run_map(&self) -> &Bitset {
        &self.continues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x4000_0000;

    #[test]
    fn run_length_is_recovered_from_bitmaps() {
        let mut b = BlockBundle::new(BASE, 64, 16);
        let n = 200_usize.div_ceil(64);
        let i = b.alloc(n).unwrap();
        assert_eq!(i, 0);
        assert_eq!(b.live_blocks(), 4);
        assert_eq!(b.run_map().count_ones(), 3);
        assert_eq!(b.size_of(i), Some(256));

        assert_eq!(b.free_run(i), Ok(4));
        assert!(b.allocation_map().none());
        assert!(b.run_map().none());
    }

    #[test]
    fn every_run_length_reports_its_size() {
        let mut b = BlockBundle::new(BASE, 128, 32);
        for k in 1..=32 {
            let i = b.alloc(k).unwrap();
            assert_eq!(b.size_of(i), Some(k * 128));
            assert_eq!(b.free_run(i), Ok(k));
            assert!(b.is_empty());
        }
    }

    #[test]
    fn adjacent_runs_stay_separate() {
        let mut b = BlockBundle::new(BASE, 64, 8);
        let a = b.alloc(3).unwrap();
        let c = b.alloc(2).unwrap();
        assert_eq!(c, 3);
        assert_eq!(b.run_length(a), 3);
        assert_eq!(b.run_length(c), 2);

        // interior block of a run
        assert_eq!(b.free_run(a + 1), Err(HeapError::InvalidArgument));
        assert_eq!(b.size_of(a + 1), None);

        assert_eq!(b.free_run(a), Ok(3));
        assert_eq!(b.run_length(c), 2);
        assert_eq!(b.alloc(4), Err(HeapError::OutOfBlocks));
        assert_eq!(b.alloc(3), Ok(0));
    }

    #[test]
    fn double_free_leaves_bitmaps_unchanged() {
        let mut b = BlockBundle::new(BASE, 64, 8);
        let i = b.alloc(2).unwrap();
        let keep = b.alloc(1).unwrap();
        b.free_run(i).unwrap();
        let before = (b.allocation_map().clone(), b.run_map().clone());
        assert_eq!(b.free_run(i), Err(HeapError::DoubleFree));
        assert_eq!(b.free(i, 2), Err(HeapError::DoubleFree));
        assert_eq!(before, (b.allocation_map().clone(), b.run_map().clone()));
        assert_eq!(b.live_blocks(), 1);
        assert_eq!(b.size_of(keep), Some(64));
    }

    #[test]
    fn address_translation_and_usage() {
        let mut b = BlockBundle::new(BASE, 128, 32);
        assert_eq!(b.index_of(BASE + 256), Some(2));
        assert_eq!(b.index_of(BASE + 257), None);
        assert_eq!(b.index_of(BASE + 32 * 128), None);
        assert_eq!(b.address_of(3), BASE + 384);

        b.alloc(1).unwrap();
        assert!(b.is_region_used(BASE + 100, 1));
        assert!(!b.is_region_used(BASE + 128, 128 * 31));
        assert!(!b.is_region_used(BASE, 0));
        // clamped to the bundle
        assert!(b.is_region_used(BASE - 4096, 4097));
    }
}
