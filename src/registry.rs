use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::level::Level;
use crate::logger::LogWriter;

/// A process-wide slot holding one shared instance.
///
/// The slot never creates anything; it starts empty and holds whatever was
/// last [`set`](StaticSlot::set). Reading an empty slot yields `None`, which
/// callers treat as "disabled" rather than an error.
///
/// ```
/// # use std::sync::Arc;
/// # use fault_logger::registry::StaticSlot;
/// static COUNTER: StaticSlot<u32> = StaticSlot::new();
///
/// assert!(COUNTER.get().is_none());
/// COUNTER.set(Arc::new(7));
/// assert_eq!(COUNTER.get().as_deref(), Some(&7));
/// ```
pub struct StaticSlot<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> StaticSlot<T> {
    pub const fn new() -> Self {
        Self {
            inner: parking_lot::const_rwlock(None),
        }
    }

    /// Stores `value`, returning the previous occupant.
    pub fn set(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.inner.write().replace(value)
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    /// Like [`StaticSlot::get`], but returns `None` instead of waiting if a
    /// writer currently holds the slot.
    pub fn try_get(&self) -> Option<Arc<T>> {
        self.inner.try_read().and_then(|slot| slot.clone())
    }

    pub fn take(&self) -> Option<Arc<T>> {
        self.inner.write().take()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<T: ?Sized> Default for StaticSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for StaticSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSlot")
            .field("set", &self.inner.try_read().map(|slot| slot.is_some()))
            .finish()
    }
}

static LOGGER: StaticSlot<dyn LogWriter> = StaticSlot::new();

/// Registers the logger used by the `fl_*!` macros and the crash handler.
/// Any formatter will do; an `Arc<Logger<F>>` coerces at the call site.
/// Returns the previously registered logger, if any.
pub fn set_logger(logger: Arc<dyn LogWriter>) -> Option<Arc<dyn LogWriter>> {
    LOGGER.set(logger)
}

pub fn logger() -> Option<Arc<dyn LogWriter>> {
    LOGGER.get()
}

/// Like [`logger`], but never blocks. Safe to call from crash hooks.
pub fn try_logger() -> Option<Arc<dyn LogWriter>> {
    LOGGER.try_get()
}

/// Unregisters the logger. The returned handle still owns the sinks, which
/// are flushed when the last handle drops.
pub fn take_logger() -> Option<Arc<dyn LogWriter>> {
    LOGGER.take()
}

/// Writes through the registered logger; a no-op when none is registered.
#[doc(hidden)]
pub fn write(level: Level, file: &str, function: &str, line: u32, message: fmt::Arguments<'_>) {
    if let Some(logger) = LOGGER.get() {
        logger.write(level, file, function, line, message);
    }
}

/// Flushes the registered logger, if any.
pub fn flush() {
    if let Some(logger) = LOGGER.get() {
        logger.flush();
    }
}

/// Logs through the registered logger at an explicit level.
#[macro_export]
macro_rules! fl_log {
    ($level:expr, $($arg:tt)+) => {
        $crate::registry::write(
            $level,
            ::core::file!(),
            $crate::function_name!(),
            ::core::line!(),
            ::core::format_args!($($arg)+),
        )
    };
}

#[macro_export]
macro_rules! fl_error {
    ($($arg:tt)+) => { $crate::fl_log!($crate::Level::Error, $($arg)+) };
}

#[macro_export]
macro_rules! fl_warn {
    ($($arg:tt)+) => { $crate::fl_log!($crate::Level::Warning, $($arg)+) };
}

#[macro_export]
macro_rules! fl_info {
    ($($arg:tt)+) => { $crate::fl_log!($crate::Level::InfoLow, $($arg)+) };
}

#[macro_export]
macro_rules! fl_verbose {
    ($($arg:tt)+) => { $crate::fl_log!($crate::Level::InfoHigh, $($arg)+) };
}

#[cfg(feature = "debug-log")]
#[macro_export]
macro_rules! fl_debug {
    ($($arg:tt)+) => { $crate::fl_log!($crate::Level::Debug, $($arg)+) };
}

#[cfg(not(feature = "debug-log"))]
#[macro_export]
macro_rules! fl_debug {
    ($($arg:tt)*) => {};
}
