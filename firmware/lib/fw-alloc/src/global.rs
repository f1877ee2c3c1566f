//! # Bootstrap Global Allocator
//!
//! The plain system heap behind `alloc`. The firmware image installs it with
//! `#[global_allocator]` and initializes it before any virtual heap exists,
//! since the bundle bitmaps and the registry are `alloc` collections:
//!
//! ```ignore
//! static HEAP_MEM: HeapMemory<{ 64 * 1024 }> = HeapMemory::new();
//!
//! #[global_allocator]
//! static ALLOCATOR: BootstrapAllocator = BootstrapAllocator::new();
//!
//! fn early_init() {
//!     ALLOCATOR.init_from(&HEAP_MEM);
//! }
//! ```

use crate::sys_heap::SysHeap;
use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr::{self, null_mut};
use core::sync::atomic::{AtomicBool, Ordering};
use fw_sync::SyncOnceCell;
use log::error;

/// Statically reserved backing memory for a [`BootstrapAllocator`].
#[repr(C, align(64))]
pub struct HeapMemory<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
    claimed: AtomicBool,
}

// Safety: the bytes are only reached through the single successful `claim`.
unsafe impl<const N: usize> Sync for HeapMemory<N> {}

impl<const N: usize> Default for HeapMemory<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HeapMemory<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
            claimed: AtomicBool::new(false),
        }
    }

    /// `(base, size)` of the memory, handed out once.
    fn claim(&self) -> Option<(usize, usize)> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some((self.bytes.get().cast::<u8>().expose_provenance(), N))
    }
}

pub struct BootstrapAllocator {
    heap: SyncOnceCell<SysHeap>,
}

impl Default for BootstrapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heap: SyncOnceCell::new(),
        }
    }

    /// Manage `[base, base + size)`. Returns `false` if the allocator was
    /// already initialized; the range is then left untouched.
    ///
    /// # Safety
    /// The range must be valid, writable and used by nothing else for the
    /// rest of the program.
    pub unsafe fn init(&self, base: usize, size: usize) -> bool {
        let mut fresh = false;
        self.heap.get_or_init(|| {
            fresh = true;
            // SAFETY: forwarded from the caller.
            unsafe { SysHeap::new("bootstrap", base, size) }
        });
        fresh
    }

    /// Initialize from static memory. Returns `false` if the allocator was
    /// already initialized or the memory already claimed.
    pub fn init_from<const N: usize>(&self, memory: &'static HeapMemory<N>) -> bool {
        if self.heap.get().is_some() {
            return false;
        }
        let Some((base, size)) = memory.claim() else {
            return false;
        };
        // SAFETY: the claim makes the static memory exclusively ours.
        unsafe { self.init(base, size) }
    }

    #[must_use]
    pub fn heap(&self) -> Option<&SysHeap> {
        self.heap.get()
    }
}

unsafe impl GlobalAlloc for BootstrapAllocator {
    /// Null before initialization or when exhausted.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.heap
            .get()
            .and_then(|h| h.alloc(layout.size(), layout.align()).ok())
            .map_or(null_mut(), ptr::with_exposed_provenance_mut)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(heap) = self.heap.get() else {
            error!("bootstrap dealloc of {ptr:p} before init");
            return;
        };
        if let Err(e) = heap.free(ptr.expose_provenance()) {
            error!("bootstrap dealloc of {ptr:p} failed: {e}");
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.heap
            .get()
            .and_then(|h| h.alloc_zeroed(layout.size(), layout.align()).ok())
            .map_or(null_mut(), ptr::with_exposed_provenance_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MEMORY: HeapMemory<8192> = HeapMemory::new();
    static ALLOCATOR: BootstrapAllocator = BootstrapAllocator::new();

    #[test]
    fn serves_after_init_only() {
        let layout = Layout::from_size_align(256, 16).unwrap();
        let early = BootstrapAllocator::new();
        assert!(unsafe { early.alloc(layout) }.is_null());

        assert!(ALLOCATOR.init_from(&MEMORY));
        assert!(!ALLOCATOR.init_from(&MEMORY));

        let p = unsafe { ALLOCATOR.alloc_zeroed(layout) };
        assert!(!p.is_null());
        assert_eq!(p.addr() % 16, 0);
        unsafe {
            assert_eq!(*p.add(255), 0);
            p.write_bytes(0xab, 256);
            ALLOCATOR.dealloc(p, layout);
        }
        assert!(ALLOCATOR.heap().unwrap().is_empty());

        let huge = Layout::from_size_align(16 * 1024, 16).unwrap();
        assert!(unsafe { ALLOCATOR.alloc(huge) }.is_null());
    }
}
