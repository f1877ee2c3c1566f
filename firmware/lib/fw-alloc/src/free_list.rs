//! Address-ordered, coalescing first-fit free list.
//!
//! Free blocks carry a [`ListNode`] in their first bytes. Allocated blocks
//! carry an [`AllocHeader`] directly in front of the payload, so a block is
//! released from its payload address alone:
//!
//! ```text
//! block_start                      payload                       block_end
//! ├──── padding ────┼ AllocHeader ┼──────── size bytes ────────┼ slack ┤
//!                   start, size, magic
//! ```
//!
//! Every block boundary is a multiple of [`GRANULE`], so any remainder large
//! enough to hold a node can go back to the list.

use core::ptr::{self, null_mut};
use fw_platform::memory::{align_up, checked_align_up};

/// Header stored at the beginning of every free block.
#[repr(C)]
struct ListNode {
    /// Bytes of the free block, node included.
    size: usize,
    next: *mut ListNode,
}

impl ListNode {
    const fn new(size: usize) -> Self {
        Self {
            size,
            next: null_mut(),
        }
    }
}

/// Header in front of every live payload.
#[repr(C)]
struct AllocHeader {
    /// First byte of the block, possibly before this header.
    start: usize,
    /// Bytes of the whole block.
    size: usize,
    magic: usize,
    _reserved: usize,
}

pub const GRANULE: usize = size_of::<ListNode>();
pub const HEADER: usize = size_of::<AllocHeader>();
const MAGIC: usize = 0x5a5a_a5a5;

const _: () = assert!(HEADER.is_multiple_of(GRANULE));

/// Byte counters of one free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes held by live blocks, headers and padding included.
    pub allocated: usize,
    pub free: usize,
    /// High-water mark of `allocated`.
    pub max_allocated: usize,
}

/// Result of decoding the header in front of a payload.
pub enum Lookup {
    Live { start: usize, size: usize },
    NotLive,
    Outside,
}

/// A first-fit, split-and-coalesce free list over `[start, end)`.
///
/// # Invariants
/// - Free blocks are non-overlapping, address ordered and inside the range.
/// - Each free block is at least [`GRANULE`] bytes and granule aligned.
/// - `head` is a sentinel; the first real block is at `head.next`.
pub struct FreeList {
    head: ListNode,
    start: usize,
    end: usize,
    stats: HeapStats,
}

// Safety: the list is only reached through its owner's lock.
unsafe impl Send for FreeList {}

impl FreeList {
    /// An empty list that manages no memory.
    pub const fn empty() -> Self {
        Self {
            head: ListNode::new(0),
            start: 0,
            end: 0,
            stats: HeapStats {
                allocated: 0,
                free: 0,
                max_allocated: 0,
            },
        }
    }

    /// Manage `[base, base + size)`, trimmed to whole granules.
    ///
    /// # Safety
    /// - The range must be valid, writable and exclusive to this list for
    ///   the list's whole lifetime.
    /// - Must be called at most once.
    pub unsafe fn init(&mut self, base: usize, size: usize) {
        let start = align_up(base, GRANULE);
        let end = base.saturating_add(size) & !(GRANULE - 1);
        self.start = start;
        self.end = end.max(start);
        if self.end - self.start >= GRANULE {
            let node = start as *mut ListNode;
            unsafe { ptr::write(node, ListNode::new(self.end - self.start)) };
            self.head.next = node;
            self.stats.free = self.end - self.start;
        }
    }

    pub const fn start(&self) -> usize {
        self.start
    }

    pub const fn end(&self) -> usize {
        self.end
    }

    pub const fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Insert `[addr, addr + size)` in address order and merge it with its neighbors.
    ///
    /// # Safety
    /// The range must be free, inside the list and granule aligned.
    unsafe fn add_free_region(&mut self, addr: usize, size: usize) {
        debug_assert!(size >= GRANULE && addr.is_multiple_of(GRANULE));
        let mut prev = &raw mut self.head;
        let mut current = unsafe { (*prev).next };
        while !current.is_null() && (current as usize) < addr {
            prev = current;
            current = unsafe { (*current).next };
        }
        let new = addr as *mut ListNode;
        unsafe {
            ptr::write(new, ListNode::new(size));
            (*new).next = current;
            (*prev).next = new;
            self.coalesce(prev);
        }
    }

    /// Merge the node after `prev_ptr` with its successor, then with `prev_ptr`.
    ///
    /// # Safety
    /// `prev_ptr` is the sentinel or a node of this list.
    unsafe fn coalesce(&mut self, prev_ptr: *mut ListNode) {
        let curr = unsafe { (*prev_ptr).next };
        if curr.is_null() {
            return;
        }
        let next = unsafe { (*curr).next };
        if !next.is_null() && (curr as usize) + unsafe { (*curr).size } == next as usize {
            unsafe {
                (*curr).size += (*next).size;
                (*curr).next = (*next).next;
            }
        }
        if !ptr::eq(prev_ptr, &raw const self.head)
            && (prev_ptr as usize) + unsafe { (*prev_ptr).size } == curr as usize
        {
            unsafe {
                (*prev_ptr).size += (*curr).size;
                (*prev_ptr).next = (*curr).next;
            }
        }
    }

    /// Carve `size` bytes aligned to `align` out of the first block that fits.
    /// Returns the payload address.
    ///
    /// `align` must be a power of two.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<usize> {
        let align = align.max(GRANULE);
        let mut prev = &raw mut self.head;
        // SAFETY: list invariants hold while `&mut self` is held.
        let mut current = unsafe { (*prev).next };
        while !current.is_null() {
            let region_start = current as usize;
            let region_end = region_start + unsafe { (*current).size };
            let payload = checked_align_up(region_start.checked_add(HEADER)?, align)?;
            let fits = payload
                .checked_add(size)
                .and_then(|end| checked_align_up(end, GRANULE))
                .filter(|&end| end <= region_end);
            if let Some(block_end) = fits {
                unsafe { (*prev).next = (*current).next };

                let mut start = payload - HEADER;
                if start - region_start >= GRANULE {
                    unsafe { self.add_free_region(region_start, start - region_start) };
                } else {
                    start = region_start;
                }
                let mut end = block_end;
                if region_end - end >= GRANULE {
                    unsafe { self.add_free_region(end, region_end - end) };
                } else {
                    end = region_end;
                }

                let header = (payload - HEADER) as *mut AllocHeader;
                unsafe {
                    ptr::write(
                        header,
                        AllocHeader {
                            start,
                            size: end - start,
                            magic: MAGIC,
                            _reserved: 0,
                        },
                    );
                }
                self.stats.allocated += end - start;
                self.stats.free -= end - start;
                self.stats.max_allocated = self.stats.max_allocated.max(self.stats.allocated);
                return Some(payload);
            }
            prev = current;
            current = unsafe { (*current).next };
        }
        None
    }

    /// Decode the header in front of `payload`.
    pub fn lookup(&self, payload: usize) -> Lookup {
        if payload < self.start + HEADER || payload >= self.end || !payload.is_multiple_of(GRANULE) {
            return Lookup::Outside;
        }
        let header = (payload - HEADER) as *const AllocHeader;
        // SAFETY: the header slot lies inside the managed range.
        let h = unsafe { ptr::read(header) };
        let plausible = h.magic == MAGIC
            && h.start >= self.start
            && h.start <= payload - HEADER
            && h.start.checked_add(h.size).is_some_and(|e| e <= self.end && e > payload);
        if plausible {
            Lookup::Live {
                start: h.start,
                size: h.size,
            }
        } else {
            Lookup::NotLive
        }
    }

    /// Bytes from `payload` to the end of its block.
    pub fn usable_size(&self, payload: usize) -> Option<usize> {
        match self.lookup(payload) {
            Lookup::Live { start, size } => Some(start + size - payload),
            _ => None,
        }
    }

    /// Return the block of `payload` to the list.
    ///
    /// # Safety
    /// `lookup(payload)` must have reported `Live { start, size }` under the
    /// same lock.
    pub unsafe fn release(&mut self, payload: usize, start: usize, size: usize) {
        let header = (payload - HEADER) as *mut AllocHeader;
        unsafe {
            (*header).magic = 0;
            self.add_free_region(start, size);
        }
        self.stats.allocated -= size;
        self.stats.free += size;
    }
}
