//! # Firmware Trace Output
//!
//! The DSP has no console. Diagnostics go into a memory window that the
//! host driver reads out over the debug interface. This crate provides the
//! window and two ways of writing into it.
//!
//! ```text
//! log::info!(..)          fw_trace!(..)
//!       ↓                      │
//! TraceLogger (log::Log)       │
//!       ↓                      ↓
//! trace_fmt::trace_write(format_args!)
//!       ↓
//! WindowSink (fmt::Write)
//!       ↓
//! TraceWindow ring buffer  →  read by the host
//! ```
//!
//! ## Components
//!
//! * [`TraceLogger`]: a `log::Log` implementation with a level threshold,
//!   writing `[LEVEL] target: message` lines.
//! * [`fw_trace!`]: formatted output that bypasses the `log` facade.
//! * [`TraceWindow`]: the fixed-size ring; the oldest bytes are overwritten
//!   once it is full. [`WINDOW`] is the instance the host reads.
//!
//! ## Features
//!
//! With `enabled` (default) output lands in [`WINDOW`]. Without it the
//! macro and the logger compile to nothing.
//!
//! ```rust,no_run
//! use fw_trace::TraceLogger;
//! use log::{LevelFilter, info};
//!
//! TraceLogger::new(LevelFilter::Debug).init().ok();
//! info!("heap subsystem up");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;
mod window;

pub use logger::TraceLogger;
pub use window::{TRACE_WINDOW_SIZE, TraceWindow, WINDOW};

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod trace_fmt {
    use crate::WINDOW;
    use core::fmt::{self, Write};

    /// `fmt::Write` adapter over the global trace window.
    pub struct WindowSink;

    impl Write for WindowSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            WINDOW.write_bytes(s.as_bytes());
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn trace_write(args: fmt::Arguments) {
        // Best effort; a full window just wraps.
        let _ = WindowSink.write_fmt(args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod trace_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub const fn trace_write(_: fmt::Arguments) {}
}

/// Write formatted text straight into the trace window.
#[macro_export]
macro_rules! fw_trace {
    ($($arg:tt)*) => {{
        $crate::trace_fmt::trace_write(core::format_args!($($arg)*));
    }};
}
