//! # Cores and Platform Services

use core::fmt;

/// Index of a DSP core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CoreId(usize);

impl CoreId {
    /// The core that boots the firmware and owns L3 memory.
    pub const PRIMARY: Self = Self(0);

    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Services the allocators need from the running core.
pub trait Platform: Send + Sync {
    /// Core executing the caller.
    fn current_core(&self) -> CoreId;

    #[inline]
    fn primary_core(&self) -> CoreId {
        CoreId::PRIMARY
    }

    #[inline]
    fn is_primary_core(&self) -> bool {
        self.current_core() == self.primary_core()
    }

    /// Write back and invalidate data cache lines covering `[addr, addr + size)`.
    fn flush_and_invalidate(&self, addr: usize, size: usize);

    /// Stop the core after an unrecoverable allocator error.
    ///
    /// # Panics
    /// The default implementation panics with `reason`.
    fn halt(&self, reason: fmt::Arguments<'_>) -> ! {
        panic!("core halted: {reason}")
    }
}

impl<P: Platform + ?Sized> Platform for &P {
    fn current_core(&self) -> CoreId {
        (**self).current_core()
    }

    fn primary_core(&self) -> CoreId {
        (**self).primary_core()
    }

    fn flush_and_invalidate(&self, addr: usize, size: usize) {
        (**self).flush_and_invalidate(addr, size);
    }

    fn halt(&self, reason: fmt::Arguments<'_>) -> ! {
        (**self).halt(reason)
    }
}

impl<P: Platform + ?Sized> Platform for alloc::sync::Arc<P> {
    fn current_core(&self) -> CoreId {
        (**self).current_core()
    }

    fn primary_core(&self) -> CoreId {
        (**self).primary_core()
    }

    fn flush_and_invalidate(&self, addr: usize, size: usize) {
        (**self).flush_and_invalidate(addr, size);
    }

    fn halt(&self, reason: fmt::Arguments<'_>) -> ! {
        (**self).halt(reason)
    }
}
