//! # Memory Layout Constants

/// Granule of the memory management driver.
pub const PAGE_SIZE: usize = 4096;

/// Data cache line; the minimum alignment of every router allocation.
pub const DCACHE_LINE_SIZE: usize = 64;

/// Number of DSP cores, and therefore of per-core heap regions.
pub const MAX_CORES: usize = 3;

/// Upper bound on block bundles in one virtual heap.
pub const MAX_MEMORY_ALLOCATORS_COUNT: usize = 10;

/// Bundles in the configuration derived when a heap is created without one.
pub const DEFAULT_CONFIG_ALLOCATORS_COUNT: usize = 5;

/// Pages backing one user-isolated driver heap.
pub const USER_HEAP_PAGES: usize = 5;

/// Bytes backing one user-isolated driver heap.
pub const USER_HEAP_SIZE: usize = USER_HEAP_PAGES * PAGE_SIZE;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(DCACHE_LINE_SIZE.is_power_of_two());
    assert!(PAGE_SIZE.is_multiple_of(DCACHE_LINE_SIZE));
    assert!(DEFAULT_CONFIG_ALLOCATORS_COUNT <= MAX_MEMORY_ALLOCATORS_COUNT);
    // The largest default bundle still holds whole cache lines.
    assert!((DCACHE_LINE_SIZE << (DEFAULT_CONFIG_ALLOCATORS_COUNT - 1)) <= PAGE_SIZE);
    assert!(MAX_CORES > 0);
};

/// Align `addr` upwards to `align` (must be a power of two).
#[inline]
#[must_use]
pub const fn align_up(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (addr + (align - 1)) & !(align - 1)
}

/// [`align_up`] that reports overflow as `None`.
#[inline]
#[must_use]
pub const fn checked_align_up(addr: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match addr.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align `addr` downwards to `align` (must be a power of two).
#[inline]
#[must_use]
pub const fn align_down(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    addr & !(align - 1)
}

/// Round `value` up to a multiple of `unit`, which need not be a power of two.
#[inline]
#[must_use]
pub const fn round_up(value: usize, unit: usize) -> usize {
    value.div_ceil(unit) * unit
}

#[inline]
#[must_use]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}

#[inline]
#[must_use]
pub const fn is_page_aligned(addr: usize) -> bool {
    is_aligned(addr, PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(1, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up(PAGE_SIZE, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(checked_align_up(65, 64), Some(128));
        assert_eq!(checked_align_up(usize::MAX - 8, 64), None);
        assert_eq!(align_down(PAGE_SIZE + 5, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(round_up(100, 96), 192);
        assert_eq!(round_up(0, 96), 0);
        assert!(is_page_aligned(0x4000_0000));
        assert!(!is_aligned(0x41, DCACHE_LINE_SIZE));
    }
}
