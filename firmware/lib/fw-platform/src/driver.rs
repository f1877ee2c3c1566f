//! # Page Driver Interface
//!
//! The memory management driver owns the physical page pool and the
//! translation table. Heaps only ever ask it to back, or stop backing, a
//! page-aligned virtual range.

use alloc::sync::Arc;

bitflags::bitflags! {
    /// Access rights requested for a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagePermissions: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// Accessible from user-mode threads.
        const USER = 1 << 3;
    }
}

impl PagePermissions {
    /// Read/write data pages, the only kind the heaps map.
    pub const DATA: Self = Self::READ.union(Self::WRITE);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("page {0:#x} is already mapped")]
    AlreadyMapped(usize),
    #[error("page {0:#x} is not mapped")]
    NotMapped(usize),
    #[error("no free physical pages")]
    OutOfFrames,
    #[error("range {addr:#x}+{size:#x} is not a page-aligned driver range")]
    InvalidRange { addr: usize, size: usize },
}

/// Maps physical pages behind virtual addresses.
///
/// `addr` and `size` are page aligned. Implementations are internally
/// synchronized: heaps of different cores call in concurrently.
pub trait PageDriver: Send + Sync {
    /// Back `[addr, addr + size)` with fresh physical pages.
    ///
    /// # Errors
    /// A page in the range is already mapped, the range is invalid or the
    /// physical pool is exhausted. Pages mapped before the failure stay mapped.
    fn map_region(&self, addr: usize, size: usize, perm: PagePermissions) -> Result<(), DriverError>;

    /// Release the physical pages behind `[addr, addr + size)`.
    ///
    /// # Errors
    /// A page in the range is not mapped or the range is invalid.
    fn unmap_region(&self, addr: usize, size: usize) -> Result<(), DriverError>;
}

impl<T: PageDriver + ?Sized> PageDriver for &T {
    fn map_region(&self, addr: usize, size: usize, perm: PagePermissions) -> Result<(), DriverError> {
        (**self).map_region(addr, size, perm)
    }

    fn unmap_region(&self, addr: usize, size: usize) -> Result<(), DriverError> {
        (**self).unmap_region(addr, size)
    }
}

impl<T: PageDriver + ?Sized> PageDriver for Arc<T> {
    fn map_region(&self, addr: usize, size: usize, perm: PagePermissions) -> Result<(), DriverError> {
        (**self).map_region(addr, size, perm)
    }

    fn unmap_region(&self, addr: usize, size: usize) -> Result<(), DriverError> {
        (**self).unmap_region(addr, size)
    }
}
