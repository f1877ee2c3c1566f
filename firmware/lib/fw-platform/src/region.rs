//! # Virtual Memory Regions

use crate::cpu::CoreId;
use crate::memory::{MAX_CORES, is_page_aligned};
use alloc::vec::Vec;

/// What a virtual region is reserved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionAttribute {
    /// Private heap of exactly one core.
    CoreHeap,
    /// Heap shared between all cores.
    SharedHeap,
    /// Memory handed out only when it happens to be available.
    OpportunisticMemory,
}

/// A page-aligned virtual address window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualRegion {
    pub base: usize,
    pub size: usize,
    pub attr: RegionAttribute,
    /// Owning core; set exactly for [`RegionAttribute::CoreHeap`].
    pub core: Option<CoreId>,
}

impl VirtualRegion {
    #[must_use]
    pub const fn core_heap(core: CoreId, base: usize, size: usize) -> Self {
        Self {
            base,
            size,
            attr: RegionAttribute::CoreHeap,
            core: Some(core),
        }
    }

    #[must_use]
    pub const fn new(attr: RegionAttribute, base: usize, size: usize) -> Self {
        Self {
            base,
            size,
            attr,
            core: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("region at {base:#x} is not page aligned")]
    Unaligned { base: usize },
    #[error("region at {base:#x} is empty")]
    Empty { base: usize },
    #[error("regions at {first:#x} and {second:#x} overlap")]
    Overlap { first: usize, second: usize },
    #[error("core {0} heap region declared twice")]
    DuplicateCoreHeap(CoreId),
    #[error("core heap region without a valid core at {base:#x}")]
    InvalidCore { base: usize },
}

/// The read-only list of virtual regions, fixed at boot.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: Vec<VirtualRegion>,
}

impl RegionTable {
    /// Validate and adopt `regions`.
    ///
    /// # Errors
    /// Any region that is not page aligned, empty, overlapping another one,
    /// or a core heap region with a missing, out-of-range or repeated core.
    pub fn new(regions: Vec<VirtualRegion>) -> Result<Self, RegionError> {
        for (i, r) in regions.iter().enumerate() {
            if !is_page_aligned(r.base) || !is_page_aligned(r.size) {
                return Err(RegionError::Unaligned { base: r.base });
            }
            if r.size == 0 {
                return Err(RegionError::Empty { base: r.base });
            }
            match (r.attr, r.core) {
                (RegionAttribute::CoreHeap, Some(core)) if core.index() < MAX_CORES => {}
                (RegionAttribute::CoreHeap, _) | (_, Some(_)) => {
                    return Err(RegionError::InvalidCore { base: r.base });
                }
                _ => {}
            }
            for other in &regions[..i] {
                if r.base < other.end() && other.base < r.end() {
                    return Err(RegionError::Overlap {
                        first: other.base,
                        second: r.base,
                    });
                }
                if r.attr == RegionAttribute::CoreHeap && other.core == r.core {
                    if let Some(core) = r.core {
                        return Err(RegionError::DuplicateCoreHeap(core));
                    }
                }
            }
        }
        Ok(Self { regions })
    }

    /// The conventional layout: `cores` core heaps of `core_heap_size`
    /// bytes starting at `base`, followed by one shared heap region.
    ///
    /// # Errors
    /// See [`RegionTable::new`].
    pub fn per_core_layout(
        base: usize,
        cores: usize,
        core_heap_size: usize,
        shared_size: usize,
    ) -> Result<Self, RegionError> {
        let mut regions: Vec<VirtualRegion> = (0..cores)
            .map(|i| VirtualRegion::core_heap(CoreId::new(i), base + i * core_heap_size, core_heap_size))
            .collect();
        if shared_size > 0 {
            regions.push(VirtualRegion::new(
                RegionAttribute::SharedHeap,
                base + cores * core_heap_size,
                shared_size,
            ));
        }
        Self::new(regions)
    }

    /// Core heaps are matched by core; every other attribute resolves to the
    /// first region carrying it.
    #[must_use]
    pub fn lookup(&self, attr: RegionAttribute, core: CoreId) -> Option<&VirtualRegion> {
        match attr {
            RegionAttribute::CoreHeap => self
                .regions
                .iter()
                .find(|r| r.attr == attr && r.core == Some(core)),
            _ => self.regions.iter().find(|r| r.attr == attr),
        }
    }

    #[must_use]
    pub fn containing(&self, addr: usize) -> Option<&VirtualRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    #[must_use]
    pub fn regions(&self) -> &[VirtualRegion] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_SIZE;

    const BASE: usize = 0x4000_0000;

    #[test]
    fn per_core_layout_lookup() {
        let table = RegionTable::per_core_layout(BASE, 2, 16 * PAGE_SIZE, 8 * PAGE_SIZE).unwrap();
        let core1 = table.lookup(RegionAttribute::CoreHeap, CoreId::new(1)).unwrap();
        assert_eq!(core1.base, BASE + 16 * PAGE_SIZE);
        assert!(table.lookup(RegionAttribute::CoreHeap, CoreId::new(2)).is_none());

        // core id is ignored for non-core attributes
        let shared = table.lookup(RegionAttribute::SharedHeap, CoreId::new(1)).unwrap();
        assert_eq!(shared.base, BASE + 32 * PAGE_SIZE);
        assert!(table.lookup(RegionAttribute::OpportunisticMemory, CoreId::PRIMARY).is_none());

        assert_eq!(table.containing(BASE + 17 * PAGE_SIZE), Some(core1));
        assert!(table.containing(BASE + 40 * PAGE_SIZE).is_none());
    }

    #[test]
    fn rejects_bad_tables() {
        assert_eq!(
            RegionTable::new(vec![VirtualRegion::new(RegionAttribute::SharedHeap, BASE + 1, PAGE_SIZE)])
                .unwrap_err(),
            RegionError::Unaligned { base: BASE + 1 }
        );
        assert_eq!(
            RegionTable::new(vec![
                VirtualRegion::new(RegionAttribute::SharedHeap, BASE, 2 * PAGE_SIZE),
                VirtualRegion::new(RegionAttribute::OpportunisticMemory, BASE + PAGE_SIZE, PAGE_SIZE),
            ])
            .unwrap_err(),
            RegionError::Overlap {
                first: BASE,
                second: BASE + PAGE_SIZE
            }
        );
        assert_eq!(
            RegionTable::new(vec![
                VirtualRegion::core_heap(CoreId::PRIMARY, BASE, PAGE_SIZE),
                VirtualRegion::core_heap(CoreId::PRIMARY, BASE + PAGE_SIZE, PAGE_SIZE),
            ])
            .unwrap_err(),
            RegionError::DuplicateCoreHeap(CoreId::PRIMARY)
        );
        assert_eq!(
            RegionTable::new(vec![VirtualRegion::core_heap(CoreId::new(MAX_CORES), BASE, PAGE_SIZE)])
                .unwrap_err(),
            RegionError::InvalidCore { base: BASE }
        );
    }
}
