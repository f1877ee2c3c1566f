//! # Cached and Uncached Address Aliases
//!
//! The same physical memory is visible through two virtual windows: a
//! cached one and an uncached one. Heaps manage memory through its cached
//! addresses; callers asking for coherent memory receive the uncached alias.

/// Translation between the cached and the uncached window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAliasing {
    cached_base: usize,
    uncached_base: usize,
    size: usize,
}

impl Default for CacheAliasing {
    fn default() -> Self {
        Self::identity()
    }
}

impl CacheAliasing {
    /// No separate windows; every address is its own alias.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            cached_base: 0,
            uncached_base: 0,
            size: 0,
        }
    }

    /// A `size`-byte window visible at `cached_base` and at `uncached_base`.
    #[must_use]
    pub const fn new(cached_base: usize, uncached_base: usize, size: usize) -> Self {
        Self {
            cached_base,
            uncached_base,
            size,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.size == 0 || self.cached_base == self.uncached_base
    }

    #[inline]
    #[must_use]
    pub const fn is_uncached(&self, addr: usize) -> bool {
        !self.is_identity() && addr >= self.uncached_base && addr - self.uncached_base < self.size
    }

    #[inline]
    #[must_use]
    pub const fn is_cached(&self, addr: usize) -> bool {
        !self.is_uncached(addr)
    }

    #[inline]
    #[must_use]
    pub const fn to_uncached(&self, addr: usize) -> usize {
        if !self.is_identity() && addr >= self.cached_base && addr - self.cached_base < self.size {
            addr - self.cached_base + self.uncached_base
        } else {
            addr
        }
    }

    #[inline]
    #[must_use]
    pub const fn to_cached(&self, addr: usize) -> usize {
        if self.is_uncached(addr) {
            addr - self.uncached_base + self.cached_base
        } else {
            addr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_inside_window_only() {
        let a = CacheAliasing::new(0xa000_0000, 0x4000_0000, 0x10_0000);
        assert_eq!(a.to_uncached(0xa000_1000), 0x4000_1000);
        assert_eq!(a.to_cached(0x4000_1000), 0xa000_1000);
        assert!(a.is_uncached(0x4000_1000));
        assert!(a.is_cached(0xa000_1000));

        // outside both windows
        assert_eq!(a.to_uncached(0xb000_0000), 0xb000_0000);
        assert_eq!(a.to_cached(0x4010_0000), 0x4010_0000);
    }

    #[test]
    fn identity_treats_everything_as_cached() {
        let a = CacheAliasing::identity();
        assert!(a.is_cached(0x1234));
        assert_eq!(a.to_uncached(0x1234), 0x1234);
        assert_eq!(a.to_cached(0x1234), 0x1234);
    }
}
