//! Heap of predefined single-block bundles.
//!
//! The bundles of a table are laid out back to back from the heap base.
//! Block sizes are cache line multiples but not necessarily powers of two,
//! so natural alignment does not hold and each candidate block is checked
//! against the requested alignment.

use crate::bitset::Bitset;
use crate::config::{BundleConfig, ConfigError, predefined};
use crate::error::HeapError;
use alloc::vec::Vec;
use fw_platform::memory::is_aligned;
use fw_sync::SpinLock;
use log::trace;

#[derive(Debug)]
struct PredefBundle {
    base: usize,
    block_size: usize,
    used: Bitset,
}

impl PredefBundle {
    fn end(&self) -> usize {
        self.base + self.block_size * self.used.len()
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

#[derive(Debug)]
pub struct PredefHeap {
    base: usize,
    size: usize,
    bundles: SpinLock<Vec<PredefBundle>>,
}

impl PredefHeap {
    /// Lay `table` out from `base` within `size` bytes.
    ///
    /// # Errors
    /// The table is empty, unordered, not cache aligned or larger than `size`.
    pub fn new(base: usize, size: usize, table: &[BundleConfig]) -> Result<Self, ConfigError> {
        predefined::validate(table, size)?;
        let mut next = base;
        let bundles = table
            .iter()
            .map(|b| {
                let bundle = PredefBundle {
                    base: next,
                    block_size: b.block_size,
                    used: Bitset::new(b.count),
                };
                next += b.size();
                bundle
            })
            .collect();
        Ok(Self {
            base,
            size,
            bundles: SpinLock::new(bundles),
        })
    }

    /// One block of the first bundle with blocks of at least `size` bytes,
    /// a free block, and that block aligned to `align`.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero size or a non-power-of-two alignment,
    /// `OutOfMemory` when no bundle qualifies.
    pub fn alloc(&self, size: usize, align: usize) -> Result<usize, HeapError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(HeapError::InvalidArgument);
        }
        let mut bundles = self.bundles.lock_critical();
        for b in bundles.iter_mut().filter(|b| b.block_size >= size) {
            let found = (0..b.used.len())
                .find(|&i| !b.used.test(i) && is_aligned(b.base + i * b.block_size, align));
            if let Some(i) = found {
                b.used.set_range(i, 1);
                let addr = b.base + i * b.block_size;
                trace!("predef: {size} bytes at {addr:#x} from {}-byte bundle", b.block_size);
                return Ok(addr);
            }
        }
        Err(HeapError::OutOfMemory)
    }

    /// # Errors
    /// `RegionNotFound` outside every bundle, `InvalidArgument` for an
    /// address that does not start a block, `DoubleFree` for a free block.
    pub fn free(&self, addr: usize) -> Result<(), HeapError> {
        let mut bundles = self.bundles.lock_critical();
        let b = bundles
            .iter_mut()
            .find(|b| b.contains(addr))
            .ok_or(HeapError::RegionNotFound)?;
        let offset = addr - b.base;
        if !offset.is_multiple_of(b.block_size) {
            return Err(HeapError::InvalidArgument);
        }
        let i = offset / b.block_size;
        if !b.used.test(i) {
            return Err(HeapError::DoubleFree);
        }
        b.used.clear_range(i, 1);
        Ok(())
    }

    #[must_use]
    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        let bundles = self.bundles.lock_critical();
        let b = bundles.iter().find(|b| b.contains(addr))?;
        let offset = addr - b.base;
        (offset.is_multiple_of(b.block_size) && b.used.test(offset / b.block_size))
            .then_some(b.block_size)
    }

    #[must_use]
    pub const fn owns(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.lock_critical().iter().all(|b| b.used.none())
    }
}
