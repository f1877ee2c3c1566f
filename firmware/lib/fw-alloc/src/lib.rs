//! # Tiered Firmware Heap Allocation
//!
//! Heap allocators for a multi-core DSP firmware, from the early plain heap
//! up to the zone router every subsystem allocates through.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Allocation Router                    │
//! │    • zone + caps → first matching backend           │
//! │    • cache line alignment, cached/uncached views    │
//! │    • halts on system zone exhaustion and bad frees  │
//! └──────┬──────────────┬──────────────┬──────────┬─────┘
//!        │              │              │          │
//! ┌──────▼─────┐ ┌──────▼─────┐ ┌──────▼────┐ ┌───▼──────────────┐
//! │  Default   │ │ Predefined │ │    L3     │ │ Virtual buffers  │
//! │  SysHeap   │ │  bundles   │ │  SysHeap  │ │ per-core VmHeaps │
//! └────────────┘ └────────────┘ └───────────┘ └───┬──────────────┘
//!                                                 │
//!                               ┌─────────────────▼───────────────┐
//!                               │  VmHeap: block bundles over a   │
//!                               │  virtual region, pages mapped   │
//!                               │  on demand by the page mapper   │
//!                               └─────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Block bundles ([`bundle`], [`bitset`])
//! Equally sized blocks tracked by an allocation bitmap and a run-length
//! bitmap. Multi-block allocations are decoded on free from the run-length
//! bitmap alone; no per-allocation record exists.
//!
//! ### Virtual heaps ([`vm_heap`], [`page_mapper`], [`registry`], [`config`])
//! A [`VmHeap`](vm_heap::VmHeap) lays bundles out over a virtual region and
//! maps physical pages only while a live block needs them. Heaps are created
//! and looked up through a [`VmHeapRegistry`](registry::VmHeapRegistry),
//! keyed by region attribute and core.
//!
//! ### Plain heaps ([`sys_heap`], [`predef_heap`], [`global`])
//! A first-fit coalescing free list, a heap of predefined non-power-of-two
//! bundles, and the bootstrap `GlobalAlloc` that serves every `alloc`
//! collection in the firmware, the bundle bitmaps included.
//!
//! ### Routing ([`router`], [`backend`], [`zone`], [`user_heap`])
//! The [`Router`](router::Router) owns the backend table and is the only
//! allocator most code sees. User-mode drivers get a
//! [`UserHeap`](user_heap::UserHeap) carved out of the buffer zone.
//!
//! ## Locking
//!
//! Every heap keeps its state behind a [`fw_sync::SpinLock`] taken with
//! `lock_critical`, so bitmap updates and page driver calls of one heap
//! never interleave. The registry lock is always taken before a heap lock.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod backend;
pub mod bitset;
pub mod bundle;
pub mod config;
mod error;
mod free_list;
pub mod global;
pub mod page_mapper;
pub mod predef_heap;
pub mod registry;
pub mod router;
pub mod sys_heap;
pub mod user_heap;
pub mod vm_heap;
pub mod zone;

pub use backend::{BackendKind, HeapBackend, VirtualBuffers};
pub use config::{BundleConfig, ConfigError, VmHeapConfig};
pub use error::HeapError;
pub use global::{BootstrapAllocator, HeapMemory};
pub use registry::{VmHeapHandle, VmHeapRegistry};
pub use router::{Router, RouterBuilder};
pub use sys_heap::{HeapStats, SysHeap};
pub use user_heap::UserHeap;
pub use vm_heap::VmHeap;
pub use zone::{MemCaps, MemFlags, MemZone, ZoneSet};
