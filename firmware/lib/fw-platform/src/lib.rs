//! # DSP Platform Description
//!
//! This crate is the single source of truth for what the heap allocators
//! need to know about the hardware they run on, and the seam through which
//! they talk to it.
//!
//! ## Layout
//!
//! ### Memory constants ([`memory`])
//! Page size, data cache line, core count and the bundle limits of the
//! virtual heaps, checked at compile time.
//!
//! ### Virtual regions ([`region`])
//! The platform's virtual address windows. Every core owns one heap region;
//! shared and opportunistic regions follow:
//!
//! ```text
//! base ┌──────────────────────┐
//!      │   core 0 heap region │  RegionAttribute::CoreHeap, core 0
//!      ├──────────────────────┤
//!      │   core 1 heap region │  RegionAttribute::CoreHeap, core 1
//!      ├──────────────────────┤
//!      │          ...         │
//!      ├──────────────────────┤
//!      │   shared heap region │  RegionAttribute::SharedHeap
//!      ├──────────────────────┤
//!      │   opportunistic      │  RegionAttribute::OpportunisticMemory
//!      └──────────────────────┘
//! ```
//!
//! The table is injected at boot, never compiled in, so host tests can use
//! small synthetic layouts.
//!
//! ### Page driver ([`driver`], [`tlb`])
//! [`PageDriver`](driver::PageDriver) maps and unmaps physical pages behind
//! virtual addresses. [`TlbEntry`](tlb::TlbEntry) is the 16-bit translation
//! entry format the driver programs.
//!
//! ### Cores and caches ([`cpu`], [`cache`])
//! [`Platform`](cpu::Platform) reports the calling core, performs data cache
//! maintenance and halts the core on unrecoverable errors.
//! [`CacheAliasing`](cache::CacheAliasing) translates between the cached and
//! uncached views of the same memory.
//!
//! ## Host simulation
//!
//! With the `sim` feature, [`sim`] provides a TLB-backed page driver with a
//! finite frame pool and failure injection, a platform whose current core
//! can be switched, and page-aligned host memory arenas.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod cache;
pub mod cpu;
pub mod driver;
pub mod memory;
pub mod region;
pub mod tlb;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use cache::CacheAliasing;
pub use cpu::{CoreId, Platform};
pub use driver::{DriverError, PageDriver, PagePermissions};
pub use region::{RegionAttribute, RegionError, RegionTable, VirtualRegion};
