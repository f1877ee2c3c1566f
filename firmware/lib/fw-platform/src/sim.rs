//! # Host Simulation
//!
//! Test doubles for running the allocators on a development host:
//!
//! * [`SimPageDriver`] keeps a translation table of [`TlbEntry`] values and
//!   a finite pool of physical frames. It is strict: mapping a mapped page
//!   or unmapping an unmapped one is an error, so allocator bookkeeping
//!   bugs surface immediately.
//! * [`SimPlatform`] reports a settable current core and records cache
//!   maintenance requests.
//! * [`Arena`] is page-aligned host memory for heaps that touch their bytes.

use crate::cpu::{CoreId, Platform};
use crate::driver::{DriverError, PageDriver, PagePermissions};
use crate::memory::{PAGE_SIZE, is_page_aligned};
use crate::tlb::{MAX_FRAME, TlbEntry};
use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use fw_sync::SpinLock;

struct SimTlb {
    /// Virtual page address to its translation entry.
    entries: BTreeMap<usize, TlbEntry>,
    free_frames: Vec<u16>,
    /// Pages that may still be mapped before injected failures start.
    map_budget: Option<usize>,
    fail_unmap: bool,
    map_calls: usize,
    unmap_calls: usize,
}

pub struct SimPageDriver {
    tlb: SpinLock<SimTlb>,
}

impl Default for SimPageDriver {
    fn default() -> Self {
        Self::new(usize::from(MAX_FRAME) + 1)
    }
}

impl SimPageDriver {
    /// A driver owning `frames` physical pages (capped at what an entry can address).
    #[must_use]
    pub fn new(frames: usize) -> Self {
        let frames = frames.min(usize::from(MAX_FRAME) + 1);
        // Pop from the end hands out frame 0 first.
        let free_frames = (0..frames).rev().filter_map(|f| u16::try_from(f).ok()).collect();
        Self {
            tlb: SpinLock::new(SimTlb {
                entries: BTreeMap::new(),
                free_frames,
                map_budget: None,
                fail_unmap: false,
                map_calls: 0,
                unmap_calls: 0,
            }),
        }
    }

    /// Allow only `pages` further page mappings; `None` lifts the limit.
    pub fn fail_maps_after(&self, pages: Option<usize>) {
        self.tlb.lock().map_budget = pages;
    }

    /// Make every following unmap request fail.
    pub fn fail_unmaps(&self, fail: bool) {
        self.tlb.lock().fail_unmap = fail;
    }

    #[must_use]
    pub fn is_mapped(&self, addr: usize) -> bool {
        let page = addr & !(PAGE_SIZE - 1);
        self.tlb.lock().entries.contains_key(&page)
    }

    #[must_use]
    pub fn entry(&self, addr: usize) -> Option<TlbEntry> {
        let page = addr & !(PAGE_SIZE - 1);
        self.tlb.lock().entries.get(&page).copied()
    }

    #[must_use]
    pub fn mapped_pages(&self) -> usize {
        self.tlb.lock().entries.len()
    }

    /// Mapped pages inside `[addr, addr + size)`.
    #[must_use]
    pub fn mapped_in(&self, addr: usize, size: usize) -> usize {
        self.tlb.lock().entries.range(addr..addr + size).count()
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.tlb.lock().free_frames.len()
    }

    /// `(map_region, unmap_region)` call counts.
    #[must_use]
    pub fn calls(&self) -> (usize, usize) {
        let tlb = self.tlb.lock();
        (tlb.map_calls, tlb.unmap_calls)
    }

    fn check_range(addr: usize, size: usize) -> Result<(), DriverError> {
        if size == 0
            || !is_page_aligned(addr)
            || !is_page_aligned(size)
            || addr.checked_add(size).is_none()
        {
            return Err(DriverError::InvalidRange { addr, size });
        }
        Ok(())
    }
}

impl PageDriver for SimPageDriver {
    fn map_region(&self, addr: usize, size: usize, perm: PagePermissions) -> Result<(), DriverError> {
        Self::check_range(addr, size)?;
        let mut tlb = self.tlb.lock();
        tlb.map_calls += 1;
        for page in (addr..addr + size).step_by(PAGE_SIZE) {
            if tlb.entries.contains_key(&page) {
                return Err(DriverError::AlreadyMapped(page));
            }
            if let Some(budget) = tlb.map_budget.as_mut() {
                if *budget == 0 {
                    return Err(DriverError::OutOfFrames);
                }
                *budget -= 1;
            }
            let frame = tlb.free_frames.pop().ok_or(DriverError::OutOfFrames)?;
            tlb.entries.insert(page, TlbEntry::mapping(frame, perm));
        }
        Ok(())
    }

    fn unmap_region(&self, addr: usize, size: usize) -> Result<(), DriverError> {
        Self::check_range(addr, size)?;
        let mut tlb = self.tlb.lock();
        tlb.unmap_calls += 1;
        if tlb.fail_unmap {
            return Err(DriverError::NotMapped(addr));
        }
        if let Some(page) = (addr..addr + size)
            .step_by(PAGE_SIZE)
            .find(|p| !tlb.entries.contains_key(p))
        {
            return Err(DriverError::NotMapped(page));
        }
        for page in (addr..addr + size).step_by(PAGE_SIZE) {
            if let Some(entry) = tlb.entries.remove(&page) {
                tlb.free_frames.push(entry.frame());
            }
        }
        Ok(())
    }
}

/// Platform double with a switchable current core.
#[derive(Default)]
pub struct SimPlatform {
    core: AtomicUsize,
    flushes: SpinLock<Vec<(usize, usize)>>,
}

impl SimPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_core(&self, core: CoreId) {
        self.core.store(core.index(), Ordering::SeqCst);
    }

    /// Every `(addr, size)` passed to [`Platform::flush_and_invalidate`].
    #[must_use]
    pub fn flushes(&self) -> Vec<(usize, usize)> {
        self.flushes.lock().clone()
    }
}

impl Platform for SimPlatform {
    fn current_core(&self) -> CoreId {
        CoreId::new(self.core.load(Ordering::SeqCst))
    }

    fn flush_and_invalidate(&self, addr: usize, size: usize) {
        self.flushes.lock().push((addr, size));
    }
}

/// Zeroed, page-aligned host memory.
pub struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: the arena is plain owned memory.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate `size` bytes (rounded up to a page). `None` if the host is out of memory.
    #[must_use]
    pub fn new(size: usize) -> Option<Self> {
        let size = size.max(1).next_multiple_of(PAGE_SIZE);
        let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;
        // SAFETY: layout has non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout })
    }

    #[must_use]
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.len()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
