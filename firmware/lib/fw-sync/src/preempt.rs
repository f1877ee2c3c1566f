//! Preemption deferral around short critical sections.
//!
//! The RTOS installs a pair of hooks once during boot. A [`PreemptGuard`]
//! calls `disable` on creation and hands the returned key back to `restore`
//! on drop, so guards nest the same way the scheduler's own lock keys do.
//!
//! ```
//! use fw_sync::SpinLock;
//!
//! static COUNTER: SpinLock<u32> = SpinLock::new(0);
//!
//! {
//!     let mut c = COUNTER.lock_critical();
//!     *c += 1;
//! }
//! // lock released first, then preemption restored
//! ```

use crate::{SpinLock, SpinLockGuard, SyncOnceCell};
use core::ops::{Deref, DerefMut};

/// Scheduler entry points used to defer preemption.
#[derive(Debug, Clone, Copy)]
pub struct PreemptHooks {
    /// Defers preemption on the calling core and returns a restore key.
    pub disable: fn() -> usize,
    /// Undoes the matching `disable` call.
    pub restore: fn(usize),
}

static HOOKS: SyncOnceCell<PreemptHooks> = SyncOnceCell::new();

/// Install the scheduler hooks. Returns `false` if hooks were already set.
pub fn install_hooks(hooks: PreemptHooks) -> bool {
    HOOKS.set(hooks).is_ok()
}

/// RAII guard that keeps the current core from being preempted.
#[must_use]
pub struct PreemptGuard {
    key: Option<usize>,
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PreemptGuard {
    #[inline]
    pub fn new() -> Self {
        Self {
            key: HOOKS.get().map(|h| (h.disable)()),
        }
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        if let (Some(key), Some(hooks)) = (self.key, HOOKS.get()) {
            (hooks.restore)(key);
        }
    }
}

/// A spin lock guard that also defers preemption while held.
///
/// Fields drop in declaration order: the lock is released before the
/// preemption state is restored.
pub struct CriticalGuard<'a, T> {
    guard: SpinLockGuard<'a, T>,
    _preempt: PreemptGuard,
}

impl<T> SpinLock<T> {
    /// Defer preemption, then acquire the lock.
    #[inline]
    pub fn lock_critical(&self) -> CriticalGuard<'_, T> {
        let preempt = PreemptGuard::new();
        let guard = self.lock();
        CriticalGuard {
            guard,
            _preempt: preempt,
        }
    }

    /// Closure form of [`lock_critical`](Self::lock_critical).
    #[inline]
    pub fn with_critical<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock_critical();
        f(&mut g)
    }
}

impl<T> Deref for CriticalGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CriticalGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
