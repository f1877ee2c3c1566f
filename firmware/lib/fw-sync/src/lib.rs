//! # Firmware synchronization primitives
//!
//! Small, allocation-free building blocks shared by the heap allocators and
//! the trace sink:
//!
//! * [`SpinLock`]: a test-and-test-and-set spin lock with RAII guards.
//! * [`SpinLock::lock_critical`]: the lock combined with a [`PreemptGuard`],
//!   the form every heap uses for its bookkeeping.
//! * [`SyncOnceCell`]: one-shot initialization for boot-time singletons.
//!
//! Preemption deferral is delegated to the RTOS through [`install_hooks`].
//! Until hooks are installed (always the case on the host), the guard is a
//! no-op and only the spin lock provides exclusion.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod preempt;
mod spin_lock;
mod sync_once_cell;

pub use preempt::{CriticalGuard, PreemptGuard, PreemptHooks, install_hooks};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
