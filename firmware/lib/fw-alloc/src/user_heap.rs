//! User-isolated driver heap.
//!
//! A small system heap over a page-aligned buffer taken from the router's
//! buffer zone, so that a user-mode driver's allocations stay inside memory
//! that can be mapped into its domain.

use crate::error::HeapError;
use crate::router::Router;
use crate::sys_heap::SysHeap;
use crate::zone::{MemCaps, MemFlags, MemZone};
use core::ptr::{self, NonNull};
use fw_platform::memory::{DCACHE_LINE_SIZE, PAGE_SIZE, USER_HEAP_SIZE, checked_align_up};
use fw_platform::{PageDriver, Platform};
use log::{debug, error};

pub struct UserHeap<'r, D: PageDriver + Clone, P: Platform> {
    router: &'r Router<D, P>,
    /// Backing buffer as the router returned it; `None` once released.
    buffer: Option<NonNull<u8>>,
    heap: SysHeap,
}

impl<'r, D: PageDriver + Clone, P: Platform> UserHeap<'r, D, P> {
    pub(crate) fn new(router: &'r Router<D, P>) -> Result<Self, HeapError> {
        let buffer = router.allocate(
            MemZone::Buffer,
            MemFlags::USER | MemFlags::COHERENT,
            MemCaps::RAM,
            USER_HEAP_SIZE,
            PAGE_SIZE,
        )?;
        let base = router.aliasing().to_cached(buffer.as_ptr().addr());
        // SAFETY: the buffer is exclusively ours until released, and writable
        // through its cached address by the router's build contract.
        let heap = unsafe { SysHeap::new("user", base, USER_HEAP_SIZE) };
        debug!("user heap at {base:#x}");
        Ok(Self {
            router,
            buffer: Some(buffer),
            heap,
        })
    }

    /// Allocate under the same cache rules as the router.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero size or a non-power-of-two alignment,
    /// `OutOfMemory` when the heap is exhausted.
    pub fn alloc(&self, flags: MemFlags, size: usize, align: usize) -> Result<NonNull<u8>, HeapError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(HeapError::InvalidArgument);
        }
        let cached_view = self.router.cached_heap() && !flags.contains(MemFlags::COHERENT);
        let align = align.max(DCACHE_LINE_SIZE);
        let size = if cached_view {
            checked_align_up(size, align).ok_or(HeapError::OutOfMemory)?
        } else {
            size
        };
        let addr = self.heap.alloc(size, align)?;
        let addr = if cached_view {
            addr
        } else {
            self.router.aliasing().to_uncached(addr)
        };
        NonNull::new(ptr::with_exposed_provenance_mut(addr)).ok_or(HeapError::OutOfMemory)
    }

    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn alloc_zeroed(&self, flags: MemFlags, size: usize, align: usize) -> Result<NonNull<u8>, HeapError> {
        let p = self.alloc(flags, size, align)?;
        // SAFETY: `p` starts `size` freshly allocated bytes of the buffer.
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size) };
        Ok(p)
    }

    /// Release a block through either of its views.
    ///
    /// # Errors
    /// `RegionNotFound` for a foreign pointer, `DoubleFree` for a block that
    /// is not live.
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let user = ptr.as_ptr().addr();
        let aliasing = self.router.aliasing();
        let addr = aliasing.to_cached(user);
        if !self.heap.owns(addr) {
            return Err(HeapError::RegionNotFound);
        }
        if self.router.cached_heap() && aliasing.is_cached(user) {
            if let Some(size) = self.heap.usable_size(addr) {
                self.router.platform().flush_and_invalidate(addr, size);
            }
        }
        self.heap.free(addr)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Return the backing buffer to the router.
    ///
    /// # Errors
    /// `NotEmpty` while allocations are live.
    pub fn release(&mut self) -> Result<(), HeapError> {
        if !self.heap.is_empty() {
            return Err(HeapError::NotEmpty);
        }
        if let Some(buffer) = self.buffer.take() {
            self.router.free(buffer);
        }
        Ok(())
    }
}

impl<D: PageDriver + Clone, P: Platform> Drop for UserHeap<'_, D, P> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("user heap dropped with live allocations ({e}); leaking its buffer");
        }
    }
}
