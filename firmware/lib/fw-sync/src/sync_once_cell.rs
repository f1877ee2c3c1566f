use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const UNINIT: u8 = 0;
const INITING: u8 = 1;
const READY: u8 = 2;

/// A write-once cell usable from `static` items.
///
/// Used for values that are decided once during boot, such as the
/// preemption hooks or the installed trace logger.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns `Some(&T)` if already initialized.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY guarantees the write is done
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Store `value` if the cell is still empty.
    ///
    /// # Errors
    /// Hands `value` back if the cell was already initialized (or is being
    /// initialized concurrently).
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self
            .state
            .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        Ok(self.publish(value))
    }

    /// Initialize at most once and return `&T`.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }

        if self
            .state
            .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return self.publish(init());
        }

        // Someone else is initializing; wait until READY
        while self.state.load(Ordering::Acquire) != READY {
            spin_loop();
        }
        // SAFETY: READY
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Write the value and flip to READY. Caller must own the INITING state.
    fn publish(&self, value: T) -> &T {
        // SAFETY: only the thread that moved UNINIT -> INITING gets here.
        let v = unsafe { (*self.value.get()).write(value) };
        self.state.store(READY, Ordering::Release);
        v
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means the value was written and never dropped.
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

// Safety: shared after READY; initialization is single-writer.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
