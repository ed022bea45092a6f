use std::fmt;

use crate::clock;
use crate::config::LoggerConfig;
use crate::crash_handler::catch_contained;
use crate::error::{Error, Result};
use crate::formatter::{file_name, DefaultFormatter, RecordFormatter, RecordMeta, SourceLocation};
use crate::level::Level;
use crate::sink::LogSink;

/// State guarded by the logger's spin lock.
struct Shared {
    buffer: Box<[u8]>,
    sinks: Vec<Box<dyn LogSink>>,
}

/// Level-filtered logger that fans each record out to a set of sinks.
///
/// All records are formatted into one buffer, sized at construction, and
/// handed to the sinks while the same spin lock is held. Concurrent callers
/// are therefore totally ordered: every sink sees whole records, in the order
/// the callers won the lock, and never two records' bytes interleaved.
///
/// The record layout comes from the formatter `F`; [`DefaultFormatter`]
/// produces a header line followed by the message line.
///
/// # Examples
///
/// ```
/// # use fault_logger::{Level, Logger, LogSink, MemorySink};
/// let sink = MemorySink::new();
/// let logger = Logger::new(Level::Warning, 1024, vec![Box::new(sink.clone()) as Box<dyn LogSink>]).unwrap();
///
/// logger.write(Level::Error, file!(), "main", line!(), format_args!("disk={}", 7));
/// logger.write(Level::InfoLow, file!(), "main", line!(), format_args!("disk={}", 7));
///
/// assert_eq!(sink.write_count(), 1);
/// assert!(sink.contents_lossy().ends_with("\ndisk=7\n"));
/// ```
pub struct Logger<F: RecordFormatter = DefaultFormatter> {
    max_level: Level,
    pid: u32,
    formatter: F,
    shared: crate::SpinLock<Shared>,
}

impl Logger {
    /// Creates a logger with the default record layout.
    ///
    /// Takes ownership of `sinks`; their order is the fan-out order.
    pub fn new(max_level: Level, buffer_capacity: usize, sinks: Vec<Box<dyn LogSink>>) -> Result<Self> {
        Self::with_formatter(max_level, buffer_capacity, sinks, DefaultFormatter)
    }

    pub fn create(config: &LoggerConfig, sinks: Vec<Box<dyn LogSink>>) -> Result<Self> {
        Self::new(config.max_level, config.buffer_capacity, sinks)
    }
}

impl<F: RecordFormatter> Logger<F> {
    /// Creates a logger that lays records out with `formatter`.
    ///
    /// Fails if `buffer_capacity` cannot hold a terminated line or the buffer
    /// cannot be allocated.
    pub fn with_formatter(
        max_level: Level,
        buffer_capacity: usize,
        sinks: Vec<Box<dyn LogSink>>,
        formatter: F,
    ) -> Result<Self> {
        if buffer_capacity <= 1 {
            return Err(Error::InvalidCapacity(buffer_capacity));
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(buffer_capacity)
            .map_err(|_| Error::Allocation(buffer_capacity))?;
        buffer.resize(buffer_capacity, 0);

        Ok(Self {
            max_level,
            pid: clock::process_id(),
            formatter,
            shared: crate::SpinLock::new(Shared {
                buffer: buffer.into_boxed_slice(),
                sinks,
            }),
        })
    }

    pub fn max_level(&self) -> Level {
        self.max_level
    }

    /// Process id captured at construction.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn buffer_capacity(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn sink_count(&self) -> usize {
        self.shared.lock().sinks.len()
    }

    /// Whether a record at `level` would reach the sinks.
    #[inline(always)]
    pub fn enabled(&self, level: Level) -> bool {
        self.max_level.admits(level)
    }

    /// Formats one record and delivers it to every sink.
    ///
    /// Records more verbose than the threshold return before any formatting.
    /// `file` may be a full path; only its final component is printed.
    pub fn write(&self, level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let mut shared = self.shared.lock();
        self.emit(&mut shared, level, SourceLocation::new(file, function, line), message);
    }

    /// Like [`Logger::write`], but gives up instead of spinning if the lock is
    /// held, e.g. by the very thread that is now crashing.
    ///
    /// Returns `false` only when the lock was unavailable.
    pub fn try_write(&self, level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>) -> bool {
        if !self.enabled(level) {
            return true;
        }
        let Some(mut shared) = self.shared.try_lock() else {
            return false;
        };
        self.emit(&mut shared, level, SourceLocation::new(file, function, line), message);
        true
    }

    /// Flushes every sink, in attachment order.
    pub fn flush(&self) {
        let mut shared = self.shared.lock();
        flush_all(&mut shared.sinks);
    }

    /// Non-blocking [`Logger::flush`]; returns `false` if the lock was held.
    pub fn try_flush(&self) -> bool {
        let Some(mut shared) = self.shared.try_lock() else {
            return false;
        };
        flush_all(&mut shared.sinks);
        true
    }

    /// Flushes, then detaches and drops every sink. Later writes still format
    /// but reach nobody.
    pub fn destroy(&self) {
        let mut shared = self.shared.lock();
        flush_all(&mut shared.sinks);
        shared.sinks.clear();
    }

    fn emit(&self, shared: &mut Shared, level: Level, location: SourceLocation<'_>, message: fmt::Arguments<'_>) {
        let meta = RecordMeta {
            timestamp_ns: clock::now_ns(),
            level,
            pid: self.pid,
            thread: clock::thread_hash(),
            location: SourceLocation {
                file: file_name(location.file),
                ..location
            },
        };

        let Shared { buffer, sinks } = shared;
        let len = self.formatter.format(buffer, &meta, message).min(buffer.len());
        let record = &buffer[..len];
        for sink in sinks.iter_mut() {
            // A misbehaving sink must not cost the remaining sinks their record.
            let _ = catch_contained(|| sink.write(record));
        }
    }
}

/// A [`Logger`] with its formatter erased, as held by the process-wide
/// registry and used by the crash path.
pub trait LogWriter: Send + Sync {
    fn enabled(&self, level: Level) -> bool;

    fn write(&self, level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>);

    /// Returns `false` if the record was dropped because the logger was busy.
    fn try_write(&self, level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>) -> bool;

    fn flush(&self);

    fn try_flush(&self) -> bool;
}

impl<F: RecordFormatter> LogWriter for Logger<F> {
    fn enabled(&self, level: Level) -> bool {
        Logger::enabled(self, level)
    }

    fn write(&self, level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>) {
        Logger::write(self, level, file, function, line, message)
    }

    fn try_write(&self, level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>) -> bool {
        Logger::try_write(self, level, file, function, line, message)
    }

    fn flush(&self) {
        Logger::flush(self)
    }

    fn try_flush(&self) -> bool {
        Logger::try_flush(self)
    }
}

fn flush_all(sinks: &mut [Box<dyn LogSink>]) {
    for sink in sinks.iter_mut() {
        let _ = catch_contained(|| sink.flush());
    }
}

impl<F: RecordFormatter> Drop for Logger<F> {
    fn drop(&mut self) {
        flush_all(&mut self.shared.get_mut().sinks);
    }
}

impl<F: RecordFormatter> fmt::Debug for Logger<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("max_level", &self.max_level)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Writes to an explicit logger, capturing the call site.
///
/// ```
/// # use fault_logger::{log_to, Level, Logger};
/// let logger = Logger::new(Level::Debug, 256, Vec::new()).unwrap();
/// log_to!(logger, Level::InfoLow, "started {} workers", 4);
/// ```
#[macro_export]
macro_rules! log_to {
    ($logger:expr, $level:expr, $($arg:tt)+) => {
        $logger.write(
            $level,
            ::core::file!(),
            $crate::function_name!(),
            ::core::line!(),
            ::core::format_args!($($arg)+),
        )
    };
}

/// Name of the enclosing function, without its module path.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        $crate::logger::trim_function_name(__type_name_of(__here))
    }};
}

#[doc(hidden)]
pub fn trim_function_name(raw: &'static str) -> &'static str {
    let name = raw.strip_suffix("::__here").unwrap_or(raw);
    // Closures show up as `outer::{{closure}}`.
    let name = name.trim_end_matches("::{{closure}}");
    match name.rfind("::") {
        Some(pos) => &name[pos + 2..],
        None => name,
    }
}
