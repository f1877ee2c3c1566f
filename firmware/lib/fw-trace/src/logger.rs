use crate::fw_trace;
use fw_sync::SyncOnceCell;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: SyncOnceCell<TraceLogger> = SyncOnceCell::new();

pub struct TraceLogger {
    max_level: LevelFilter,
}

impl TraceLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install as the global `log` backend. Call once during early boot.
    ///
    /// # Errors
    /// Another logger was already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        let logger = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for TraceLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // "[LEVEL] target: message\n", formatted straight into the window
        fw_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // the window is read asynchronously by the host
    }
}
