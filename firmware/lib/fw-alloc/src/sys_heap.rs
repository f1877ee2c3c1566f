//! # Plain System Heap
//!
//! A [`FreeList`] over one fixed range behind a critical-section lock. It
//! backs the bootstrap allocator, the L3 and default router backends and
//! every user-isolated heap. Allocations need no size on free and report
//! their usable size, because the free list keeps a header in front of each
//! payload.

use crate::error::HeapError;
use crate::free_list::{FreeList, Lookup};
use fw_sync::SpinLock;
use log::{trace, warn};

pub use crate::free_list::HeapStats;

pub struct SysHeap {
    name: &'static str,
    list: SpinLock<FreeList>,
}

impl core::fmt::Debug for SysHeap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let list = self.list.lock();
        f.debug_struct("SysHeap")
            .field("name", &self.name)
            .field("start", &format_args!("{:#x}", list.start()))
            .field("end", &format_args!("{:#x}", list.end()))
            .field("stats", &list.stats())
            .finish()
    }
}

impl SysHeap {
    /// Build a heap over `[base, base + size)`.
    ///
    /// # Safety
    /// The range must be valid, writable and used by nothing else for as
    /// long as the heap or any allocation from it lives.
    #[must_use]
    pub unsafe fn new(name: &'static str, base: usize, size: usize) -> Self {
        let mut list = FreeList::empty();
        unsafe { list.init(base, size) };
        Self {
            name,
            list: SpinLock::new(list),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero size or a non-power-of-two alignment,
    /// `OutOfMemory` when no free block fits.
    pub fn alloc(&self, size: usize, align: usize) -> Result<usize, HeapError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(HeapError::InvalidArgument);
        }
        let mut list = self.list.lock_critical();
        let Some(addr) = list.allocate(size, align) else {
            warn!("{}: no block for {size} bytes aligned to {align}", self.name);
            return Err(HeapError::OutOfMemory);
        };
        let s = list.stats();
        trace!(
            "{}: alloc {addr:#x}+{size}, allocated {} free {} max {}",
            self.name, s.allocated, s.free, s.max_allocated
        );
        Ok(addr)
    }

    /// [`alloc`](Self::alloc), then zero the payload.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn alloc_zeroed(&self, size: usize, align: usize) -> Result<usize, HeapError> {
        let addr = self.alloc(size, align)?;
        // SAFETY: `addr` starts `size` freshly allocated bytes of this heap.
        unsafe { core::ptr::write_bytes(addr as *mut u8, 0, size) };
        Ok(addr)
    }

    /// Release the allocation whose payload starts at `addr`.
    ///
    /// # Errors
    /// `RegionNotFound` outside this heap, `InvalidArgument` for an address
    /// that cannot be a payload, `DoubleFree` when `addr` is not a live one.
    pub fn free(&self, addr: usize) -> Result<(), HeapError> {
        let mut list = self.list.lock_critical();
        match list.lookup(addr) {
            Lookup::Live { start, size } => {
                // SAFETY: header verified under this lock.
                unsafe { list.release(addr, start, size) };
                Ok(())
            }
            Lookup::NotLive => Err(HeapError::DoubleFree),
            Lookup::Outside if self.owns_locked(&list, addr) => Err(HeapError::InvalidArgument),
            Lookup::Outside => Err(HeapError::RegionNotFound),
        }
    }

    /// Bytes usable from `addr` on, if it is a live payload.
    #[must_use]
    pub fn usable_size(&self, addr: usize) -> Option<usize> {
        self.list.lock_critical().usable_size(addr)
    }

    const fn owns_locked(&self, list: &FreeList, addr: usize) -> bool {
        addr >= list.start() && addr < list.end()
    }

    #[must_use]
    pub fn owns(&self, addr: usize) -> bool {
        let list = self.list.lock_critical();
        self.owns_locked(&list, addr)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.list.lock_critical().stats()
    }

    /// No live allocations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats().allocated == 0
    }
}
