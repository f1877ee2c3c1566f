//! Lazy page backing for block bundles.
//!
//! Bundles whose blocks are at least a page large map and unmap whole
//! blocks. Smaller blocks share pages with their neighbors, so only the
//! pages strictly inside an allocation are exclusively its own:
//!
//! ```text
//!        page 0          page 1          page 2
//! ├───────────────┼───────────────┼───────────────┤
//!     [ neighbor ][ ======= allocation ======= ][ free ]
//!  first page: shared, skipped      last page: mapped only if
//!  while the neighbor lives         nothing else lives in it
//! ```
//!
//! A boundary page is mapped by the first allocation that needs it and
//! unmapped by the last one to leave it. Both directions inspect only the
//! blocks outside the allocation, so the bitmap update may happen before
//! or after the mapping call.

use crate::bundle::BlockBundle;
use crate::error::HeapError;
use fw_platform::memory::{PAGE_SIZE, align_down, align_up};
use fw_platform::{PageDriver, PagePermissions};
use log::{error, trace};

pub struct PageMapper<'a, D: PageDriver + ?Sized> {
    driver: &'a D,
    bundle: &'a BlockBundle,
}

impl<'a, D: PageDriver + ?Sized> PageMapper<'a, D> {
    #[must_use]
    pub const fn new(driver: &'a D, bundle: &'a BlockBundle) -> Self {
        Self { driver, bundle }
    }

    /// Pages `[first, last)` this allocation adds or removes, if any.
    fn page_range(&self, addr: usize, span: usize) -> Option<(usize, usize)> {
        let end = addr + span;
        if self.bundle.block_size() >= PAGE_SIZE {
            return Some((align_down(addr, PAGE_SIZE), align_up(end, PAGE_SIZE)));
        }
        let mut first = align_down(addr, PAGE_SIZE);
        let mut last = align_up(end, PAGE_SIZE);
        if first < addr && self.bundle.is_region_used(first, addr - first) {
            first += PAGE_SIZE;
        }
        if end < last && self.bundle.is_region_used(end, last - end) {
            last -= PAGE_SIZE;
        }
        (first < last).then_some((first, last))
    }

    /// Back the allocation `[addr, addr + span)` with physical pages.
    ///
    /// Pages are requested one at a time so that a failure can be rolled
    /// back exactly.
    ///
    /// # Errors
    /// `MappingFailure` after every page mapped by this call was released.
    pub fn map(&self, addr: usize, span: usize) -> Result<(), HeapError> {
        let Some((first, last)) = self.page_range(addr, span) else {
            return Ok(());
        };
        trace!("map {first:#x}..{last:#x} for {addr:#x}+{span:#x}");
        for page in (first..last).step_by(PAGE_SIZE) {
            if let Err(e) = self.driver.map_region(page, PAGE_SIZE, PagePermissions::DATA) {
                if page > first {
                    if let Err(undo) = self.driver.unmap_region(first, page - first) {
                        error!("rollback of {first:#x}..{page:#x} failed: {undo}");
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Release the pages only `[addr, addr + span)` still needed.
    ///
    /// # Errors
    /// `MappingFailure` if the driver refused; the page state is then unknown.
    pub fn unmap(&self, addr: usize, span: usize) -> Result<(), HeapError> {
        let Some((first, last)) = self.page_range(addr, span) else {
            return Ok(());
        };
        trace!("unmap {first:#x}..{last:#x} for {addr:#x}+{span:#x}");
        self.driver.unmap_region(first, last - first)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_platform::sim::SimPageDriver;

    const BASE: usize = 0x4000_0000;

    #[test]
    fn large_blocks_map_whole_span() {
        let d = SimPageDriver::default();
        let b = BlockBundle::new(BASE, 8192, 4);
        let m = PageMapper::new(&d, &b);
        m.map(BASE + 8192, 16384).unwrap();
        assert_eq!(d.mapped_in(BASE, b.size()), 4);
        assert!(!d.is_mapped(BASE));
        m.unmap(BASE + 8192, 16384).unwrap();
        assert_eq!(d.mapped_pages(), 0);
    }

    #[test]
    fn shared_first_page_is_skipped_while_neighbor_lives() {
        let d = SimPageDriver::default();
        let mut b = BlockBundle::new(BASE, 1024, 16);

        // neighbor occupies the first quarter of page 0
        let n = b.alloc(1).unwrap();
        PageMapper::new(&d, &b).map(b.address_of(n), 1024).unwrap();
        assert_eq!(d.mapped_pages(), 1);

        // 3 KiB + 2 KiB: rest of page 0 and half of page 1
        let a = b.alloc(5).unwrap();
        let addr = b.address_of(a);
        PageMapper::new(&d, &b).map(addr, 5 * 1024).unwrap();
        assert_eq!(d.mapped_pages(), 2);

        // page 0 survives the allocation's free, page 1 does not
        b.free_run(a).unwrap();
        PageMapper::new(&d, &b).unmap(addr, 5 * 1024).unwrap();
        assert!(d.is_mapped(BASE));
        assert!(!d.is_mapped(BASE + PAGE_SIZE));

        b.free_run(n).unwrap();
        PageMapper::new(&d, &b).unmap(BASE, 1024).unwrap();
        assert_eq!(d.mapped_pages(), 0);
    }

    #[test]
    fn failed_map_is_rolled_back() {
        let d = SimPageDriver::default();
        let mut b = BlockBundle::new(BASE, 4096, 8);
        let i = b.alloc(4).unwrap();
        d.fail_maps_after(Some(2));
        let err = PageMapper::new(&d, &b).map(b.address_of(i), 4 * 4096);
        assert!(matches!(err, Err(HeapError::MappingFailure(_))));
        assert_eq!(d.mapped_pages(), 0);
    }
}
