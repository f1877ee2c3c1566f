//! # Translation Table Entries
//!
//! The memory management unit translates one virtual page per 16-bit entry.
//! The entry index is the virtual page number relative to the translated
//! window; the entry holds the physical page number and the access bits.
//!
//! ```text
//!  15   14    13    12   11                       0
//! ┌───┬─────┬─────┬────┬───────────────────────────┐
//! │ - │ WR  │ EX  │ EN │   physical page number    │
//! └───┴─────┴─────┴────┴───────────────────────────┘
//! ```

use crate::driver::PagePermissions;
use bitfield_struct::bitfield;

/// Highest physical page number an entry can address.
pub const MAX_FRAME: u16 = (1 << 12) - 1;

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct TlbEntry {
    /// Physical page number (bits 0..11).
    #[bits(12)]
    pub frame: u16,
    /// Translation enabled (bit 12).
    pub enabled: bool,
    /// Instruction fetch allowed (bit 13).
    pub exec: bool,
    /// Stores allowed (bit 14).
    pub write: bool,
    #[bits(1)]
    __: u8,
}

impl TlbEntry {
    /// An enabled entry for `frame` carrying `perm`.
    #[inline]
    #[must_use]
    pub const fn mapping(frame: u16, perm: PagePermissions) -> Self {
        Self::new()
            .with_frame(frame)
            .with_enabled(true)
            .with_exec(perm.contains(PagePermissions::EXEC))
            .with_write(perm.contains(PagePermissions::WRITE))
    }

    #[inline]
    #[must_use]
    pub const fn permissions(self) -> PagePermissions {
        let mut perm = PagePermissions::READ;
        if self.write() {
            perm = perm.union(PagePermissions::WRITE);
        }
        if self.exec() {
            perm = perm.union(PagePermissions::EXEC);
        }
        perm
    }
}
