//! # Allocation Router
//!
//! Maps a [`MemZone`] and requested [`MemCaps`] to the first matching
//! backend of an ordered table, then applies the cross-cutting policy:
//!
//! ```text
//! allocate(zone, flags, caps, size, align)
//!   │
//!   ├─ first backend serving `zone`, caps ⊇ requested, available on this core
//!   ├─ cache policy: cache line alignment, cached or uncached view
//!   ├─ backend allocation (cached address)
//!   └─ System zone failure → halt
//! ```
//!
//! Backends always see cached addresses. Pointers handed back to callers are
//! either the cached address or its uncached alias, and [`Router::free`]
//! accepts both.

use crate::backend::{BackendKind, HeapBackend};
use crate::error::HeapError;
use crate::user_heap::UserHeap;
use crate::zone::{MemCaps, MemFlags, MemZone, ZoneSet};
use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use fw_platform::memory::{DCACHE_LINE_SIZE, checked_align_up, is_aligned};
use fw_platform::{CacheAliasing, PageDriver, Platform};
use log::{debug, error, warn};

struct HeapDescriptor<D: PageDriver + Clone> {
    backend: HeapBackend<D>,
    caps: MemCaps,
    zones: ZoneSet,
}

/// Assembles a [`Router`] from an ordered backend table.
pub struct RouterBuilder<D: PageDriver + Clone> {
    heaps: Vec<HeapDescriptor<D>>,
    aliasing: CacheAliasing,
    cached_heap: bool,
}

impl<D: PageDriver + Clone> Default for RouterBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: PageDriver + Clone> RouterBuilder<D> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heaps: Vec::new(),
            aliasing: CacheAliasing::identity(),
            cached_heap: true,
        }
    }

    #[must_use]
    pub const fn cache_aliasing(mut self, aliasing: CacheAliasing) -> Self {
        self.aliasing = aliasing;
        self
    }

    /// Hand out cached views for cached zones (on by default). When off,
    /// every allocation is returned as its uncached alias.
    #[must_use]
    pub const fn cached_heap(mut self, on: bool) -> Self {
        self.cached_heap = on;
        self
    }

    /// Append a backend. Earlier backends win.
    #[must_use]
    pub fn heap(mut self, backend: HeapBackend<D>, caps: MemCaps, zones: ZoneSet) -> Self {
        self.heaps.push(HeapDescriptor {
            backend,
            caps,
            zones,
        });
        self
    }

    /// # Safety
    /// Every address a backend hands out must be writable memory for as long
    /// as it is allocated, through its cached address and through its alias
    /// under the configured [`CacheAliasing`]. The router zeroes and copies
    /// allocations through these addresses.
    #[must_use]
    pub unsafe fn build<P: Platform>(self, platform: P) -> Router<D, P> {
        debug!("allocation router with {} backends", self.heaps.len());
        Router {
            heaps: self.heaps,
            aliasing: self.aliasing,
            cached_heap: self.cached_heap,
            platform,
        }
    }
}

pub struct Router<D: PageDriver + Clone, P: Platform> {
    heaps: Vec<HeapDescriptor<D>>,
    aliasing: CacheAliasing,
    cached_heap: bool,
    platform: P,
}

fn to_ptr(addr: usize) -> Result<NonNull<u8>, HeapError> {
    NonNull::new(ptr::with_exposed_provenance_mut(addr)).ok_or(HeapError::OutOfMemory)
}

impl<D: PageDriver + Clone, P: Platform> Router<D, P> {
    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn aliasing(&self) -> &CacheAliasing {
        &self.aliasing
    }

    /// Whether cached zones get cached views.
    #[must_use]
    pub const fn cached_heap(&self) -> bool {
        self.cached_heap
    }

    fn select(&self, zone: MemZone, caps: MemCaps) -> Option<&HeapDescriptor<D>> {
        let core = self.platform.current_core();
        let primary = self.platform.primary_core();
        self.heaps.iter().find(|h| {
            h.zones.serves(zone) && h.caps.contains(caps) && h.backend.is_available(core, primary)
        })
    }

    fn owner(&self, addr: usize) -> Option<&HeapDescriptor<D>> {
        self.heaps.iter().find(|h| h.backend.owns(addr))
    }

    /// Allocate `size` bytes aligned to at least `align` from `zone`.
    ///
    /// A failure in [`MemZone::System`] halts the core.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero size, a non-power-of-two alignment, or
    /// a request the selected backend cannot honor; `OutOfMemory` when no
    /// backend qualifies or the selected one is exhausted.
    pub fn allocate(
        &self,
        zone: MemZone,
        flags: MemFlags,
        caps: MemCaps,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        match self.try_allocate(zone, flags, caps, size, align) {
            Err(e) if zone == MemZone::System => {
                error!("system allocation of {size} bytes (caps {caps:?}) failed: {e}");
                self.platform
                    .halt(format_args!("system zone allocation failed: {e}"))
            }
            Err(e) => {
                warn!("{zone:?} allocation of {size} bytes (caps {caps:?}) failed: {e}");
                Err(e)
            }
            ok => ok,
        }
    }

    fn try_allocate(
        &self,
        zone: MemZone,
        flags: MemFlags,
        caps: MemCaps,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(HeapError::InvalidArgument);
        }
        let desc = self.select(zone, caps).ok_or(HeapError::OutOfMemory)?;
        let kind = desc.backend.kind();
        if kind == BackendKind::L3 && !zone.is_cached() {
            return Err(HeapError::InvalidArgument);
        }

        let cached_view = self.cached_heap && zone.is_cached() && !flags.contains(MemFlags::COHERENT);
        let align = align.max(DCACHE_LINE_SIZE);
        let size = if cached_view {
            checked_align_up(size, align).ok_or(HeapError::OutOfMemory)?
        } else {
            size
        };

        let core = self.platform.current_core();
        let primary = self.platform.primary_core();
        let addr = desc.backend.alloc(core, primary, size, align)?;

        if kind == BackendKind::Virtual && !is_aligned(addr, align) {
            if let Err(e) = desc.backend.free(core, primary, addr) {
                self.platform
                    .halt(format_args!("releasing misaligned block {addr:#x} failed: {e}"));
            }
            return Err(HeapError::InvalidArgument);
        }

        if cached_view {
            to_ptr(addr)
        } else {
            to_ptr(self.aliasing.to_uncached(addr))
        }
    }

    /// [`allocate`](Self::allocate), then zero `size` bytes.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn allocate_zeroed(
        &self,
        zone: MemZone,
        flags: MemFlags,
        caps: MemCaps,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        let p = self.allocate(zone, flags, caps, size, align)?;
        // SAFETY: builder contract; `p` starts `size` allocated bytes.
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size) };
        Ok(p)
    }

    /// Allocate from [`MemZone::Buffer`].
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn allocate_buffer(
        &self,
        flags: MemFlags,
        caps: MemCaps,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        self.allocate(MemZone::Buffer, flags, caps, size, align)
    }

    /// Move an allocation to a new buffer of `new_size` bytes.
    ///
    /// Without `ptr` this is [`allocate_buffer`](Self::allocate_buffer).
    /// `min(new_size, old_size)` bytes are copied unless
    /// [`MemFlags::NO_COPY`] is set; the old block is freed afterwards.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this router holding at least
    /// `old_size` bytes. On success it is dangling.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero `new_size`, or any allocation error.
    /// The old block is untouched on error.
    pub unsafe fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        flags: MemFlags,
        caps: MemCaps,
        new_size: usize,
        old_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        let Some(old) = ptr else {
            return self.allocate_buffer(flags, caps, new_size, align);
        };
        if new_size == 0 {
            return Err(HeapError::InvalidArgument);
        }
        let new = self.allocate_buffer(flags, caps, new_size, align)?;
        if !flags.contains(MemFlags::NO_COPY) {
            // SAFETY: distinct live blocks of at least the copied length.
            unsafe { ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), new_size.min(old_size)) };
        }
        self.free(old);
        Ok(new)
    }

    /// Release a block through either of its views.
    ///
    /// Cached views are written back and invalidated first. An address no
    /// backend owns, or a backend error, halts the core.
    pub fn free(&self, ptr: NonNull<u8>) {
        let user = ptr.as_ptr().addr();
        let addr = self.aliasing.to_cached(user);
        let Some(desc) = self.owner(addr) else {
            error!("free of unknown pointer {user:#x}");
            self.platform.halt(format_args!("free of unknown pointer {user:#x}"));
        };
        if self.cached_heap && self.aliasing.is_cached(user) {
            if let Some(size) = desc.backend.usable_size(addr) {
                self.platform.flush_and_invalidate(addr, size);
            }
        }
        let core = self.platform.current_core();
        let primary = self.platform.primary_core();
        if let Err(e) = desc.backend.free(core, primary, addr) {
            error!("free of {user:#x} on core {core} failed: {e}");
            self.platform.halt(format_args!("free of {user:#x} failed: {e}"));
        }
    }

    /// Usable bytes of a live block, through either of its views.
    #[must_use]
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = self.aliasing.to_cached(ptr.as_ptr().addr());
        self.owner(addr)?.backend.usable_size(addr)
    }

    /// Carve a user-isolated heap out of the buffer zone.
    ///
    /// # Errors
    /// Any error of allocating its backing buffer.
    pub fn user_heap(&self) -> Result<UserHeap<'_, D, P>, HeapError> {
        UserHeap::new(self)
    }
}
