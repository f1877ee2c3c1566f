//! # Virtual Memory Heap
//!
//! A set of [`BlockBundle`]s laid out back to back over one virtual region.
//! Physical pages are mapped lazily through the [`PageMapper`] when blocks
//! are handed out and unmapped once no live block needs them.
//!
//! ```text
//! region.base
//! ├── bundle 0: 128 B × 32 ──┼── bundle 1: 512 B × 8 ──┼── ... ──┤
//!  page aligned               page aligned               ≤ region.end
//! ```
//!
//! In fixed mode every allocation takes exactly one block of the first
//! bundle whose blocks are large enough. In contiguous mode an allocation
//! may span a run of blocks of any bundle with enough capacity.
//!
//! A heap records the core it belongs to but cannot see which core calls
//! it. Callers keep a [`RegionAttribute::CoreHeap`] heap on its own core;
//! the router does so through [`VirtualBuffers`](crate::backend::VirtualBuffers).

use crate::bundle::BlockBundle;
use crate::config::VmHeapConfig;
use crate::error::HeapError;
use crate::page_mapper::PageMapper;
use alloc::vec::Vec;
use fw_platform::{CoreId, PageDriver, RegionAttribute, VirtualRegion};
use log::{debug, error, warn};

pub struct VmHeap<D: PageDriver> {
    region: VirtualRegion,
    core: CoreId,
    contiguous: bool,
    bundles: Vec<BlockBundle>,
    driver: D,
}

impl<D: PageDriver> core::fmt::Debug for VmHeap<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmHeap")
            .field("region", &self.region)
            .field("core", &self.core)
            .field("contiguous", &self.contiguous)
            .field("bundles", &self.bundles.len())
            .field("live_blocks", &self.live_blocks())
            .finish_non_exhaustive()
    }
}

impl<D: PageDriver> VmHeap<D> {
    /// Lay `config` out over `region`.
    ///
    /// # Errors
    /// `InvalidConfig` if the layout is malformed or does not fit.
    pub fn new(
        region: VirtualRegion,
        core: CoreId,
        config: &VmHeapConfig,
        contiguous: bool,
        driver: D,
    ) -> Result<Self, HeapError> {
        config.validate(region.size)?;
        let mut base = region.base;
        let bundles = config
            .bundles()
            .iter()
            .map(|b| {
                let bundle = BlockBundle::new(base, b.block_size, b.count);
                base += b.size();
                bundle
            })
            .collect();
        debug!(
            "vm heap at {:#x}: {} bundles, {} mode",
            region.base,
            config.bundles().len(),
            if contiguous { "contiguous" } else { "fixed" }
        );
        Ok(Self {
            region,
            core,
            contiguous,
            bundles,
            driver,
        })
    }

    #[must_use]
    pub const fn region(&self) -> &VirtualRegion {
        &self.region
    }

    #[must_use]
    pub const fn attribute(&self) -> RegionAttribute {
        self.region.attr
    }

    #[must_use]
    pub const fn core(&self) -> CoreId {
        self.core
    }

    #[must_use]
    pub const fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    #[must_use]
    pub fn bundles(&self) -> &[BlockBundle] {
        &self.bundles
    }

    /// Address range covered by the bundles.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.bundles.iter().any(|b| b.contains(addr))
    }

    /// Allocate at least `size` bytes and back them with physical pages.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero size, `OutOfMemory` if no bundle can
    /// serve the request or the pages cannot be mapped.
    pub fn alloc(&mut self, size: usize) -> Result<usize, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidArgument);
        }
        let contiguous = self.contiguous;
        for bundle in &mut self.bundles {
            let bs = bundle.block_size();
            if !contiguous && bs < size {
                continue;
            }
            let blocks = size.div_ceil(bs);
            if blocks > bundle.block_count() {
                continue;
            }
            let Ok(index) = bundle.alloc(if contiguous { blocks } else { 1 }) else {
                continue;
            };
            let addr = bundle.address_of(index);
            let span = bundle.run_length(index) * bs;
            if let Err(e) = PageMapper::new(&self.driver, bundle).map(addr, span) {
                warn!("vm heap {:#x}: mapping {addr:#x}+{span:#x} failed: {e}", self.region.base);
                if let Err(undo) = bundle.free_run(index) {
                    error!("vm heap {:#x}: rollback of {addr:#x} failed: {undo}", self.region.base);
                }
                return Err(HeapError::OutOfMemory);
            }
            return Ok(addr);
        }
        Err(HeapError::OutOfMemory)
    }

    /// Release the allocation starting at `addr` and unmap the pages it alone used.
    ///
    /// # Errors
    /// `RegionNotFound` outside every bundle, `InvalidArgument` for an
    /// address that does not start an allocation, `DoubleFree` for a block
    /// that is not live, `MappingFailure` if unmapping failed.
    pub fn free(&mut self, addr: usize) -> Result<(), HeapError> {
        let bundle = self
            .bundles
            .iter_mut()
            .find(|b| b.contains(addr))
            .ok_or(HeapError::RegionNotFound)?;
        let index = bundle.index_of(addr).ok_or(HeapError::InvalidArgument)?;
        let blocks = bundle.free_run(index)?;
        PageMapper::new(&self.driver, bundle).unmap(addr, blocks * bundle.block_size())
    }

    /// Bytes of the live allocation starting at `addr`.
    #[must_use]
    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        let bundle = self.bundles.iter().find(|b| b.contains(addr))?;
        bundle.size_of(bundle.index_of(addr)?)
    }

    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.bundles.iter().map(BlockBundle::live_blocks).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.iter().all(BlockBundle::is_empty)
    }

    /// Drop the bundles. A retired heap owns no addresses and serves nothing.
    ///
    /// # Errors
    /// `NotEmpty` while any block is live.
    pub(crate) fn retire(&mut self) -> Result<(), HeapError> {
        if !self.is_empty() {
            return Err(HeapError::NotEmpty);
        }
        self.bundles = Vec::new();
        Ok(())
    }

    /// Replace the bundle layout of an empty heap.
    ///
    /// # Errors
    /// `NotEmpty` while any block is live, `InvalidConfig` for a bad layout;
    /// the heap is unchanged on error.
    pub(crate) fn relayout(&mut self, config: &VmHeapConfig, contiguous: bool) -> Result<(), HeapError>
    where
        D: Clone,
    {
        if !self.is_empty() {
            return Err(HeapError::NotEmpty);
        }
        *self = Self::new(self.region, self.core, config, contiguous, self.driver.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundleConfig;
    use fw_platform::memory::PAGE_SIZE;
    use fw_platform::sim::SimPageDriver;

    const BASE: usize = 0x4000_0000;

    fn heap<'d>(
        d: &'d SimPageDriver,
        size: usize,
        bundles: &[BundleConfig],
        contiguous: bool,
    ) -> VmHeap<&'d SimPageDriver> {
        let region = VirtualRegion::core_heap(CoreId::PRIMARY, BASE, size);
        VmHeap::new(region, CoreId::PRIMARY, &VmHeapConfig::new(bundles), contiguous, d).unwrap()
    }

    #[test]
    fn fixed_mode_picks_first_large_enough_bundle() {
        let d = SimPageDriver::default();
        let mut h = heap(
            &d,
            4 * PAGE_SIZE,
            &[BundleConfig::new(128, 32), BundleConfig::new(1024, 4), BundleConfig::new(2048, 2)],
            false,
        );
        let small = h.alloc(100).unwrap();
        assert_eq!(small, BASE);
        let mid = h.alloc(129).unwrap();
        assert_eq!(mid, BASE + PAGE_SIZE);
        assert_eq!(h.usable_size(mid), Some(1024));
        assert_eq!(h.alloc(4096), Err(HeapError::OutOfMemory));
        assert_eq!(d.mapped_pages(), 2);
    }

    #[test]
    fn contiguous_mode_spans_runs() {
        let d = SimPageDriver::default();
        let mut h = heap(&d, PAGE_SIZE, &[BundleConfig::new(64, 64)], true);
        let a = h.alloc(200).unwrap();
        assert_eq!(h.usable_size(a), Some(256));
        assert_eq!(h.bundles()[0].live_blocks(), 4);
        // more than the bundle holds
        assert_eq!(h.alloc(64 * 65), Err(HeapError::OutOfMemory));
        h.free(a).unwrap();
        assert!(h.is_empty());
        assert_eq!(d.mapped_pages(), 0);
    }

    #[test]
    fn free_reports_bad_addresses() {
        let d = SimPageDriver::default();
        let mut h = heap(&d, PAGE_SIZE, &[BundleConfig::new(128, 32)], false);
        let a = h.alloc(1).unwrap();
        assert_eq!(h.free(BASE + PAGE_SIZE), Err(HeapError::RegionNotFound));
        assert_eq!(h.free(a + 8), Err(HeapError::InvalidArgument));
        h.free(a).unwrap();
        assert_eq!(h.free(a), Err(HeapError::DoubleFree));
        assert_eq!(h.alloc(0), Err(HeapError::InvalidArgument));
    }

    #[test]
    fn map_failure_rolls_back_bitmaps() {
        let d = SimPageDriver::default();
        let mut h = heap(&d, 4 * PAGE_SIZE, &[BundleConfig::new(4096, 4)], true);
        d.fail_maps_after(Some(1));
        assert_eq!(h.alloc(3 * PAGE_SIZE), Err(HeapError::OutOfMemory));
        assert!(h.is_empty());
        assert_eq!(d.mapped_pages(), 0);
        d.fail_maps_after(None);
        assert_eq!(h.alloc(3 * PAGE_SIZE), Ok(BASE));
    }

    #[test]
    fn unmap_failure_surfaces() {
        let d = SimPageDriver::default();
        let mut h = heap(&d, PAGE_SIZE, &[BundleConfig::new(4096, 1)], false);
        let a = h.alloc(10).unwrap();
        d.fail_unmaps(true);
        assert!(matches!(h.free(a), Err(HeapError::MappingFailure(_))));
    }

    #[test]
    fn retire_and_relayout() {
        let d = SimPageDriver::default();
        let mut h = heap(&d, 2 * PAGE_SIZE, &[BundleConfig::new(128, 32)], false);
        let a = h.alloc(1).unwrap();
        assert_eq!(h.retire(), Err(HeapError::NotEmpty));
        assert_eq!(
            h.relayout(&VmHeapConfig::new(&[BundleConfig::new(64, 64)]), true),
            Err(HeapError::NotEmpty)
        );
        h.free(a).unwrap();
        h.relayout(&VmHeapConfig::new(&[BundleConfig::new(64, 128)]), true)
            .unwrap();
        assert!(h.is_contiguous());
        assert_eq!(h.bundles()[0].block_count(), 128);
        h.retire().unwrap();
        assert!(!h.contains(BASE));
        assert_eq!(h.alloc(1), Err(HeapError::OutOfMemory));
    }
}
