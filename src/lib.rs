//! # Fault Logger
//!
//! An in-process diagnostic library for native services:
//!
//! * **Bounded logging**: every record is formatted into one preallocated
//!   buffer; long messages are truncated, never reallocated
//! * **Multi-sink fan-out**: each record reaches every attached sink whole,
//!   in the same order, even under heavy contention
//! * **Crash capture**: fatal faults, aborts and panics are logged, a
//!   one-shot snapshot is written and the application's shutdown callback runs
//!
//! ## Main Components
//!
//! * `Logger`: level-filtered logger owning the line buffer and its sinks
//! * `LogSink`: destination trait, with `FileSink`, `ConsoleSink` and `MemorySink`
//! * `LineBuilder`: bounded, newline-terminated line formatting
//! * `SpinLock`: the busy-wait lock serialising the logger
//! * `CrashHandler`: fault, abort and panic hooks plus the snapshot writer
//! * `registry`: the process-wide logger slot behind the `fl_*!` macros
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use fault_logger::{fl_info, fl_warn, registry, Level, LogSink, Logger, MemorySink};
//!
//! let memory = MemorySink::new();
//! let sinks: Vec<Box<dyn LogSink>> = vec![Box::new(memory.clone())];
//! let logger = Logger::new(Level::InfoLow, 4096, sinks).unwrap();
//! registry::set_logger(Arc::new(logger));
//!
//! fl_info!("listening on port {}", 8080);
//! fl_warn!("cache at {}% capacity", 93);
//!
//! assert_eq!(memory.write_count(), 2);
//! ```

pub mod clock;
pub mod config;
pub mod crash_handler;
pub mod error;
pub mod formatter;
pub mod level;
pub mod line_builder;
pub mod log_bridge;
pub mod logger;
pub mod registry;
pub mod sink;
pub mod snapshot;
pub mod spin_lock;

pub use config::{CrashConfig, LoggerConfig};
pub use crash_handler::{CrashContext, CrashHandler, CrashKind, CrashReport, CrashState, SnapshotOutcome};
pub use error::{Error, Result};
pub use formatter::{DefaultFormatter, RecordFormatter, RecordMeta, SourceLocation};
pub use level::Level;
pub use line_builder::LineBuilder;
pub use log_bridge::LogBridge;
pub use logger::{LogWriter, Logger};
pub use sink::{ConsoleSink, FileSink, LogSink, MemorySink};
pub use snapshot::{ProcfsSnapshotWriter, SnapshotFlags, SnapshotSize, SnapshotWriter};
pub use spin_lock::{SpinLock, SpinLockGuard};
