//! # Virtual Heap Registry
//!
//! Creates, finds and tears down [`VmHeap`]s over the regions of a
//! [`RegionTable`]. Heaps are keyed by region attribute, and additionally by
//! core for [`RegionAttribute::CoreHeap`].
//!
//! Lock order: the registry lock is taken before any heap lock, never the
//! other way around.

use crate::config::VmHeapConfig;
use crate::error::HeapError;
use crate::vm_heap::VmHeap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use fw_platform::{CoreId, PageDriver, RegionAttribute, RegionTable};
use fw_sync::SpinLock;
use log::{debug, info};

/// Shared handle to a registered heap.
pub type VmHeapHandle<D> = Arc<SpinLock<VmHeap<D>>>;

pub struct VmHeapRegistry<D: PageDriver + Clone> {
    regions: RegionTable,
    driver: D,
    heaps: SpinLock<Vec<VmHeapHandle<D>>>,
}

const fn same_key(attr: RegionAttribute, core: CoreId, a: RegionAttribute, c: CoreId) -> bool {
    match (attr, a) {
        (RegionAttribute::CoreHeap, RegionAttribute::CoreHeap) => core.index() == c.index(),
        (RegionAttribute::SharedHeap, RegionAttribute::SharedHeap)
        | (RegionAttribute::OpportunisticMemory, RegionAttribute::OpportunisticMemory) => true,
        _ => false,
    }
}

impl<D: PageDriver + Clone> VmHeapRegistry<D> {
    #[must_use]
    pub const fn new(regions: RegionTable, driver: D) -> Self {
        Self {
            regions,
            driver,
            heaps: SpinLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Create and register a heap over the region for `(attr, core)`.
    ///
    /// Without `config`, five bundles of 64 to 1024 bytes split the region.
    ///
    /// # Errors
    /// `AlreadyExists` when a heap holds the key, `RegionNotFound` when the
    /// table has no such region, `InvalidConfig` for a layout that does not
    /// fit it.
    pub fn init_heap(
        &self,
        config: Option<&VmHeapConfig>,
        attr: RegionAttribute,
        core: CoreId,
        contiguous: bool,
    ) -> Result<VmHeapHandle<D>, HeapError> {
        let mut heaps = self.heaps.lock_critical();
        if Self::position(&heaps, attr, core).is_some() {
            return Err(HeapError::AlreadyExists);
        }
        let region = *self
            .regions
            .lookup(attr, core)
            .ok_or(HeapError::RegionNotFound)?;
        let derived;
        let config = if let Some(c) = config {
            c
        } else {
            derived = VmHeapConfig::default_for(&region);
            &derived
        };
        let heap = VmHeap::new(region, core, config, contiguous, self.driver.clone())?;
        let handle = Arc::new(SpinLock::new(heap));
        heaps.push(Arc::clone(&handle));
        info!(
            "registered {attr:?} heap for core {core} at {:#x}+{:#x}",
            region.base, region.size
        );
        Ok(handle)
    }

    fn position(heaps: &[VmHeapHandle<D>], attr: RegionAttribute, core: CoreId) -> Option<usize> {
        heaps.iter().position(|h| {
            let h = h.lock_critical();
            same_key(attr, core, h.attribute(), h.core())
        })
    }

    /// The heap registered for `(attr, core)`. `core` is ignored for
    /// attributes other than [`RegionAttribute::CoreHeap`].
    #[must_use]
    pub fn get_heap_by_attribute(&self, attr: RegionAttribute, core: CoreId) -> Option<VmHeapHandle<D>> {
        let heaps = self.heaps.lock_critical();
        Self::position(&heaps, attr, core).map(|i| Arc::clone(&heaps[i]))
    }

    /// The registered heap whose bundles cover `addr`.
    #[must_use]
    pub fn find_owner(&self, addr: usize) -> Option<VmHeapHandle<D>> {
        self.heaps
            .lock_critical()
            .iter()
            .find(|h| h.lock_critical().contains(addr))
            .cloned()
    }

    /// Tear down an empty heap and forget it. Outstanding clones of the
    /// handle stay valid but can no longer allocate.
    ///
    /// # Errors
    /// `NotEmpty` while blocks are live, `RegionNotFound` if `heap` is not registered.
    pub fn free_heap(&self, heap: &VmHeapHandle<D>) -> Result<(), HeapError> {
        let mut heaps = self.heaps.lock_critical();
        let i = heaps
            .iter()
            .position(|h| Arc::ptr_eq(h, heap))
            .ok_or(HeapError::RegionNotFound)?;
        heap.lock_critical().retire()?;
        let removed = heaps.swap_remove(i);
        debug!("released heap at {:#x}", removed.lock_critical().region().base);
        Ok(())
    }

    /// Replace the layout of an empty registered heap in place.
    ///
    /// The heap keeps its key and handle; no other caller can observe it
    /// unregistered.
    ///
    /// # Errors
    /// `NotEmpty` while blocks are live, `RegionNotFound` if `heap` is not
    /// registered, `InvalidConfig` for a bad layout. Nothing changes on error.
    pub fn reconfigure_heap(
        &self,
        heap: &VmHeapHandle<D>,
        config: Option<&VmHeapConfig>,
        contiguous: bool,
    ) -> Result<(), HeapError> {
        let heaps = self.heaps.lock_critical();
        if !heaps.iter().any(|h| Arc::ptr_eq(h, heap)) {
            return Err(HeapError::RegionNotFound);
        }
        let mut h = heap.lock_critical();
        let derived;
        let config = if let Some(c) = config {
            c
        } else {
            derived = VmHeapConfig::default_for(h.region());
            &derived
        };
        h.relayout(config, contiguous)?;
        info!("reconfigured heap at {:#x}", h.region().base);
        Ok(())
    }

    /// Number of registered heaps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heaps.lock_critical().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundleConfig;
    use fw_platform::memory::PAGE_SIZE;
    use fw_platform::sim::SimPageDriver;

    const BASE: usize = 0x4000_0000;

    fn registry(d: &SimPageDriver) -> VmHeapRegistry<&SimPageDriver> {
        let table = RegionTable::per_core_layout(BASE, 2, 16 * PAGE_SIZE, 10 * PAGE_SIZE).unwrap();
        VmHeapRegistry::new(table, d)
    }

    #[test]
    fn keys_and_lookups() {
        let d = SimPageDriver::default();
        let r = registry(&d);
        let c0 = r
            .init_heap(None, RegionAttribute::CoreHeap, CoreId::new(0), false)
            .unwrap();
        let c1 = r
            .init_heap(None, RegionAttribute::CoreHeap, CoreId::new(1), false)
            .unwrap();
        assert_eq!(
            r.init_heap(None, RegionAttribute::CoreHeap, CoreId::new(1), true)
                .unwrap_err(),
            HeapError::AlreadyExists
        );
        assert_eq!(
            r.init_heap(None, RegionAttribute::CoreHeap, CoreId::new(2), false)
                .unwrap_err(),
            HeapError::RegionNotFound
        );
        let shared = r
            .init_heap(None, RegionAttribute::SharedHeap, CoreId::new(1), false)
            .unwrap();
        // shared heaps are one per attribute, whatever the core
        assert_eq!(
            r.init_heap(None, RegionAttribute::SharedHeap, CoreId::new(0), false)
                .unwrap_err(),
            HeapError::AlreadyExists
        );
        let found = r
            .get_heap_by_attribute(RegionAttribute::SharedHeap, CoreId::new(0))
            .unwrap();
        assert!(Arc::ptr_eq(&found, &shared));
        let found = r
            .get_heap_by_attribute(RegionAttribute::CoreHeap, CoreId::new(1))
            .unwrap();
        assert!(Arc::ptr_eq(&found, &c1));
        assert_eq!(r.len(), 3);

        let a = c0.lock().alloc(10).unwrap();
        assert!(Arc::ptr_eq(&r.find_owner(a).unwrap(), &c0));
        assert!(r.find_owner(BASE + 100 * PAGE_SIZE).is_none());
    }

    #[test]
    fn config_must_fit_region() {
        let d = SimPageDriver::default();
        let r = registry(&d);
        let big = VmHeapConfig::new(&[BundleConfig::new(4096, 17)]);
        assert!(matches!(
            r.init_heap(Some(&big), RegionAttribute::CoreHeap, CoreId::PRIMARY, false),
            Err(HeapError::InvalidConfig(_))
        ));
        assert!(r.is_empty());
    }

    #[test]
    fn free_and_reconfigure_require_empty_heap() {
        let d = SimPageDriver::default();
        let r = registry(&d);
        let h = r
            .init_heap(None, RegionAttribute::SharedHeap, CoreId::PRIMARY, false)
            .unwrap();
        let a = h.lock().alloc(64).unwrap();
        assert_eq!(r.free_heap(&h), Err(HeapError::NotEmpty));
        let cfg = VmHeapConfig::new(&[BundleConfig::new(64, 64)]);
        assert_eq!(r.reconfigure_heap(&h, Some(&cfg), true), Err(HeapError::NotEmpty));

        h.lock().free(a).unwrap();
        r.reconfigure_heap(&h, Some(&cfg), true).unwrap();
        assert!(h.lock().is_contiguous());

        r.free_heap(&h).unwrap();
        assert!(r
            .get_heap_by_attribute(RegionAttribute::SharedHeap, CoreId::PRIMARY)
            .is_none());
        assert_eq!(h.lock().alloc(1), Err(HeapError::OutOfMemory));
        assert_eq!(r.free_heap(&h), Err(HeapError::RegionNotFound));

        // the key is free again
        r.init_heap(None, RegionAttribute::SharedHeap, CoreId::PRIMARY, false)
            .unwrap();
    }
}
