//! Router backends.
//!
//! Every backend manages cached (canonical) addresses; the router applies
//! cache aliasing on top.

use crate::config::VmHeapConfig;
use crate::error::HeapError;
use crate::predef_heap::PredefHeap;
use crate::registry::{VmHeapHandle, VmHeapRegistry};
use crate::sys_heap::SysHeap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use fw_platform::{CoreId, PageDriver, RegionAttribute};
use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Default,
    PredefinedBundles,
    L3,
    Virtual,
}

/// Per-core fixed-block virtual heaps.
pub struct VirtualBuffers<D: PageDriver + Clone> {
    registry: Arc<VmHeapRegistry<D>>,
    heaps: Vec<Option<VmHeapHandle<D>>>,
}

impl<D: PageDriver + Clone> VirtualBuffers<D> {
    /// Create a fixed-mode core heap with `config` for each of `cores` cores.
    ///
    /// A core whose heap cannot be created is left without one; requests
    /// from it fall through to the next backend.
    #[must_use]
    pub fn boot(registry: Arc<VmHeapRegistry<D>>, config: &VmHeapConfig, cores: usize) -> Self {
        let heaps = (0..cores)
            .map(CoreId::new)
            .map(|core| {
                match registry.init_heap(Some(config), RegionAttribute::CoreHeap, core, false) {
                    Ok(h) => Some(h),
                    Err(e) => {
                        error!("core {core}: no virtual buffer heap: {e}");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        info!(
            "virtual buffers ready on {} of {cores} cores",
            heaps.iter().flatten().count()
        );
        Self { registry, heaps }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<VmHeapRegistry<D>> {
        &self.registry
    }

    #[must_use]
    pub fn heap_for(&self, core: CoreId) -> Option<&VmHeapHandle<D>> {
        self.heaps.get(core.index())?.as_ref()
    }

    fn owner(&self, addr: usize) -> Option<&VmHeapHandle<D>> {
        self.heaps
            .iter()
            .flatten()
            .find(|h| h.lock_critical().contains(addr))
    }

    fn alloc(&self, core: CoreId, size: usize) -> Result<usize, HeapError> {
        let mut heap = self
            .heap_for(core)
            .ok_or(HeapError::RegionNotFound)?
            .lock_critical();
        debug_assert_eq!(heap.core(), core);
        heap.alloc(size)
    }

    /// Blocks are released through the calling core's own heap.
    fn free(&self, core: CoreId, addr: usize) -> Result<(), HeapError> {
        let mut heap = self
            .heap_for(core)
            .ok_or(HeapError::RegionNotFound)?
            .lock_critical();
        debug_assert_eq!(heap.core(), core);
        if !heap.contains(addr) {
            return Err(HeapError::RegionNotFound);
        }
        heap.free(addr)
    }
}

pub enum HeapBackend<D: PageDriver + Clone> {
    /// Plain system heap.
    Default(SysHeap),
    PredefinedBundles(PredefHeap),
    /// Off-core L3 memory, reachable from the primary core only.
    L3(SysHeap),
    Virtual(VirtualBuffers<D>),
}

impl<D: PageDriver + Clone> HeapBackend<D> {
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Default(_) => BackendKind::Default,
            Self::PredefinedBundles(_) => BackendKind::PredefinedBundles,
            Self::L3(_) => BackendKind::L3,
            Self::Virtual(_) => BackendKind::Virtual,
        }
    }

    /// Whether `core` may allocate from this backend.
    #[must_use]
    pub fn is_available(&self, core: CoreId, primary: CoreId) -> bool {
        match self {
            Self::L3(_) => core == primary,
            Self::Virtual(v) => v.heap_for(core).is_some(),
            Self::Default(_) | Self::PredefinedBundles(_) => true,
        }
    }

    /// # Errors
    /// The backend's own allocation errors; `InvalidArgument` for L3 off
    /// the primary core.
    pub fn alloc(&self, core: CoreId, primary: CoreId, size: usize, align: usize) -> Result<usize, HeapError> {
        match self {
            Self::Default(h) => h.alloc(size, align),
            Self::PredefinedBundles(h) => h.alloc(size, align),
            Self::L3(h) if core == primary => h.alloc(size, align),
            Self::L3(_) => Err(HeapError::InvalidArgument),
            Self::Virtual(v) => v.alloc(core, size),
        }
    }

    /// # Errors
    /// The backend's own free errors; `InvalidArgument` for L3 off the
    /// primary core.
    pub fn free(&self, core: CoreId, primary: CoreId, addr: usize) -> Result<(), HeapError> {
        match self {
            Self::Default(h) => h.free(addr),
            Self::PredefinedBundles(h) => h.free(addr),
            Self::L3(h) if core == primary => h.free(addr),
            Self::L3(_) => Err(HeapError::InvalidArgument),
            Self::Virtual(v) => v.free(core, addr),
        }
    }

    #[must_use]
    pub fn owns(&self, addr: usize) -> bool {
        match self {
            Self::Default(h) | Self::L3(h) => h.owns(addr),
            Self::PredefinedBundles(h) => h.owns(addr),
            Self::Virtual(v) => v.owner(addr).is_some(),
        }
    }

    #[must_use]
    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        match self {
            Self::Default(h) | Self::L3(h) => h.usable_size(addr),
            Self::PredefinedBundles(h) => h.usable_size(addr),
            Self::Virtual(v) => v.owner(addr)?.lock_critical().usable_size(addr),
        }
    }
}
