use crate::error::{Error, Result};
use crate::level::Level;
use crate::logger::LogWriter;
use crate::registry;

/// Routes the `log` crate's macros into the registered [`crate::Logger`].
///
/// `log::Level` maps onto [`Level`] via `From`; the record's module path
/// stands in for the function name, which `log` does not capture.
#[derive(Debug, Default)]
pub struct LogBridge;

impl LogBridge {
    /// Installs the bridge as the `log` crate's global logger, limiting the
    /// facade to `max_level` so filtered records cost a single comparison.
    pub fn install(max_level: Level) -> Result<()> {
        log::set_boxed_logger(Box::new(LogBridge)).map_err(|_| Error::AlreadyInstalled)?;
        log::set_max_level(max_level.to_level_filter());
        Ok(())
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        registry::logger()
            .map(|logger| logger.enabled(metadata.level().into()))
            .unwrap_or(false)
    }

    fn log(&self, record: &log::Record<'_>) {
        let Some(logger) = registry::logger() else {
            return;
        };
        logger.write(
            record.level().into(),
            record.file().unwrap_or("<unknown>"),
            record.module_path().unwrap_or(record.target()),
            record.line().unwrap_or(0),
            *record.args(),
        );
    }

    fn flush(&self) {
        registry::flush();
    }
}
