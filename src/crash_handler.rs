//! Last-resort handling of fatal process failures.
//!
//! [`init`] arms a process-wide [`CrashHandler`] and hooks it to fatal faults
//! (`SIGSEGV`, `SIGBUS`, `SIGILL`, `SIGFPE`), to `SIGABRT`, and optionally to
//! panics. When a hook fires the handler logs the crash, writes at most one
//! snapshot per process, and runs the application's shutdown callback; the
//! signal is then re-raised with its default disposition so the process dies
//! the way it would have without the handler.
//!
//! Panics count as crashes only when they end the process: any panic under
//! `panic = "abort"`, otherwise a panic on the main thread that nothing in
//! this crate is about to catch. A panic on another thread can be recovered
//! by joining it, so it is left to the panic machinery.
//!
//! Every step after hook entry is best-effort. Logging uses the registered
//! logger's non-blocking path and is skipped if its lock is held, so a crash
//! inside the logger cannot deadlock the handler. Snapshot failures are
//! logged and otherwise ignored. The shutdown callback always runs.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::thread;

use parking_lot::Mutex;

use crate::clock;
use crate::config::CrashConfig;
use crate::error::{Error, Result};
use crate::level::Level;
use crate::logger::LogWriter;
use crate::registry;
use crate::snapshot::{ProcfsSnapshotWriter, SnapshotWriter};

/// Which hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashKind {
    /// A fatal hardware or memory fault, reported by `signal`.
    Fault { signal: i32 },
    /// `abort()` was called or `SIGABRT` was delivered.
    Abort,
    /// An unrecoverable runtime error (an uncaught panic).
    Terminate,
}

impl CrashKind {
    fn description(self) -> &'static str {
        match self {
            CrashKind::Fault { .. } => "Unhandled fault was raised",
            CrashKind::Abort => "Abort called",
            CrashKind::Terminate => "Unrecoverable runtime error",
        }
    }
}

impl fmt::Display for CrashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashKind::Fault { signal } => write!(f, "fault (signal {})", signal),
            CrashKind::Abort => f.write_str("abort"),
            CrashKind::Terminate => f.write_str("terminate"),
        }
    }
}

/// Facts captured at the moment a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashContext {
    pub kind: CrashKind,
    pub pid: u32,
    pub thread: u64,
    pub timestamp_ns: u64,
    /// Faulting address, when the platform reports one.
    pub fault_address: Option<usize>,
}

impl CrashContext {
    pub fn capture(kind: CrashKind, fault_address: Option<usize>) -> Self {
        Self {
            kind,
            pid: clock::process_id(),
            thread: clock::thread_hash(),
            timestamp_ns: clock::now_ns(),
            fault_address,
        }
    }
}

/// Lifecycle of the process-wide handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashState {
    Uninitialized,
    Armed,
    Triggered,
}

/// What happened to the snapshot during one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No path configured, or the size class is `None`.
    Disabled,
    Written,
    /// An earlier trigger already wrote this process's snapshot.
    AlreadyWritten,
    /// Another trigger is writing it right now.
    InProgress,
    Failed,
}

/// Summary of one trigger, mostly of interest to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashReport {
    /// Whether the crash record reached the logger.
    pub logged: bool,
    pub snapshot: SnapshotOutcome,
}

const NOT_WRITTEN: u8 = 0;
const WRITING: u8 = 1;
const WRITTEN: u8 = 2;

/// Runs the crash path: log, snapshot once, shut down.
///
/// Usually armed once through [`init`]; a standalone handler can be driven
/// with [`CrashHandler::trigger`] to simulate a crash.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// # use fault_logger::{CrashConfig, CrashHandler, CrashKind, SnapshotOutcome};
/// let shutdowns = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&shutdowns);
/// let handler = CrashHandler::new(CrashConfig::default(), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let report = handler.trigger(CrashKind::Abort);
/// assert_eq!(report.snapshot, SnapshotOutcome::Disabled);
/// assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
/// ```
pub struct CrashHandler {
    config: CrashConfig,
    on_shutdown: Box<dyn Fn() + Send + Sync>,
    writer: Box<dyn SnapshotWriter>,
    snapshot: AtomicU8,
    triggers: AtomicUsize,
}

/// Logs without ever waiting on the logger's lock.
macro_rules! crash_log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {
        match $logger {
            Some(logger) => logger.try_write(
                $level,
                ::core::file!(),
                $crate::function_name!(),
                ::core::line!(),
                ::core::format_args!($($arg)+),
            ),
            None => false,
        }
    };
}

impl CrashHandler {
    /// Creates an armed handler that writes snapshots with the platform's
    /// default [`SnapshotWriter`].
    ///
    /// A panic from `on_shutdown` is contained, except when the handler runs
    /// from the panic hook: a panic there aborts the process.
    pub fn new(config: CrashConfig, on_shutdown: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            config,
            on_shutdown: Box::new(on_shutdown),
            writer: Box::new(ProcfsSnapshotWriter),
            snapshot: AtomicU8::new(NOT_WRITTEN),
            triggers: AtomicUsize::new(0),
        }
    }

    pub fn with_writer(mut self, writer: impl SnapshotWriter + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    pub fn config(&self) -> &CrashConfig {
        &self.config
    }

    pub fn state(&self) -> CrashState {
        if self.trigger_count() == 0 {
            CrashState::Armed
        } else {
            CrashState::Triggered
        }
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn snapshot_written(&self) -> bool {
        self.snapshot.load(Ordering::Acquire) == WRITTEN
    }

    /// Runs the crash path as if the `kind` hook had fired on this thread.
    pub fn trigger(&self, kind: CrashKind) -> CrashReport {
        self.handle(&CrashContext::capture(kind, None))
    }

    /// Runs the crash path for an already captured context.
    pub fn handle(&self, context: &CrashContext) -> CrashReport {
        self.triggers.fetch_add(1, Ordering::SeqCst);

        let logger = registry::try_logger();
        let logger = logger.as_deref();
        let logged = match context.kind {
            CrashKind::Fault { signal } => crash_log!(
                logger,
                Level::Error,
                "{} (signal {}). Terminating program.",
                context.kind.description(),
                signal
            ),
            kind => crash_log!(logger, Level::Error, "{}. Terminating program.", kind.description()),
        };

        let snapshot = self.write_snapshot_once(context, logger);

        if catch_contained(|| (self.on_shutdown)()).is_err() {
            crash_log!(logger, Level::Error, "Shutdown callback panicked");
        }

        CrashReport { logged, snapshot }
    }

    fn write_snapshot_once(&self, context: &CrashContext, logger: Option<&dyn LogWriter>) -> SnapshotOutcome {
        if !self.config.snapshots_enabled() {
            return SnapshotOutcome::Disabled;
        }
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return SnapshotOutcome::Disabled;
        };

        match self
            .snapshot
            .compare_exchange(NOT_WRITTEN, WRITING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(WRITTEN) => return SnapshotOutcome::AlreadyWritten,
            Err(_) => return SnapshotOutcome::InProgress,
        }

        crash_log!(logger, Level::InfoLow, "Attempting to generate a snapshot at {}", path.display());

        let flags = self.config.snapshot_size.flags();
        let result = catch_contained(|| self.writer.write_snapshot(path, flags, context));
        match result {
            Ok(Ok(())) => {
                self.snapshot.store(WRITTEN, Ordering::Release);
                crash_log!(logger, Level::InfoLow, "Snapshot generated successfully");
                SnapshotOutcome::Written
            }
            Ok(Err(err)) => {
                self.snapshot.store(NOT_WRITTEN, Ordering::Release);
                crash_log!(logger, Level::Error, "Failed to write snapshot to {}: {}", path.display(), err);
                SnapshotOutcome::Failed
            }
            Err(_) => {
                self.snapshot.store(NOT_WRITTEN, Ordering::Release);
                crash_log!(logger, Level::Error, "Snapshot writer panicked");
                SnapshotOutcome::Failed
            }
        }
    }
}

impl fmt::Debug for CrashHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashHandler")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("snapshot_written", &self.snapshot_written())
            .finish_non_exhaustive()
    }
}

static INSTALLED: OnceLock<CrashHandler> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Arms the process-wide handler and installs its hooks.
///
/// Can succeed once per process; later calls return
/// [`Error::AlreadyInstalled`].
pub fn init(config: CrashConfig, on_shutdown: impl Fn() + Send + Sync + 'static) -> Result<&'static CrashHandler> {
    install(CrashHandler::new(config, on_shutdown))
}

/// [`init`] for a handler built by the caller, e.g. with a custom writer.
///
/// The handler is published only after every signal hook is in place. If
/// installing a hook fails, the hooks installed before it find no handler
/// and fall through to the default action, and a later call may retry.
pub fn install(handler: CrashHandler) -> Result<&'static CrashHandler> {
    install_with(handler, hooks::install)
}

fn install_with(handler: CrashHandler, install_hooks: impl FnOnce() -> Result<()>) -> Result<&'static CrashHandler> {
    let _guard = INSTALL_LOCK.lock();
    if INSTALLED.get().is_some() {
        return Err(Error::AlreadyInstalled);
    }
    install_hooks()?;
    let capture_panics = handler.config.capture_panics;
    INSTALLED.set(handler).map_err(|_| Error::AlreadyInstalled)?;
    let handler = INSTALLED.get().ok_or(Error::AlreadyInstalled)?;
    if capture_panics {
        install_panic_hook();
    }
    Ok(handler)
}

pub fn installed() -> Option<&'static CrashHandler> {
    INSTALLED.get()
}

pub fn state() -> CrashState {
    match INSTALLED.get() {
        Some(handler) => handler.state(),
        None => CrashState::Uninitialized,
    }
}

thread_local! {
    static CONTAINED: Cell<u32> = const { Cell::new(0) };
}

/// `catch_unwind` for panics the crate recovers from itself. The panic hook
/// sees them as non-fatal.
pub(crate) fn catch_contained<R>(f: impl FnOnce() -> R) -> thread::Result<R> {
    let _ = CONTAINED.try_with(|depth| depth.set(depth.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    let _ = CONTAINED.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    result
}

/// Whether a panic raised now, on a thread called `thread_name`, will take
/// the process down.
fn panic_is_fatal(thread_name: Option<&str>) -> bool {
    if cfg!(panic = "abort") {
        return true;
    }
    let contained = CONTAINED.try_with(Cell::get).unwrap_or(0) > 0;
    !contained && thread_name == Some("main")
}

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        previous(info);
        let Some(handler) = INSTALLED.get() else {
            return;
        };
        if !panic_is_fatal(thread::current().name()) {
            return;
        }
        if let Some(logger) = registry::try_logger() {
            let (file, line) = info
                .location()
                .map(|location| (location.file(), location.line()))
                .unwrap_or(("<unknown>", 0));
            let payload = info.payload();
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("Box<dyn Any>");
            logger.try_write(Level::Error, file, "panic", line, format_args!("panicked: {}", message));
        }
        handler.handle(&CrashContext::capture(CrashKind::Terminate, None));
    }));
}

#[cfg(unix)]
mod hooks {
    use std::io;
    use std::ptr;

    use libc::{c_int, c_void, siginfo_t};

    use super::{CrashContext, CrashKind, INSTALLED};
    use crate::error::{Error, Result};

    const FAULT_SIGNALS: [c_int; 4] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE];
    const ALT_STACK_SIZE: usize = 64 * 1024;

    pub(super) fn install() -> Result<()> {
        install_alt_stack();
        for signal in FAULT_SIGNALS {
            install_signal(signal)?;
        }
        install_signal(libc::SIGABRT)
    }

    /// Gives the installing thread a separate stack for handlers, so a stack
    /// overflow can still be reported.
    fn install_alt_stack() {
        let stack: &'static mut [u8] = Box::leak(vec![0u8; ALT_STACK_SIZE.max(libc::SIGSTKSZ)].into_boxed_slice());
        let alt = libc::stack_t {
            ss_sp: stack.as_mut_ptr() as *mut c_void,
            ss_flags: 0,
            ss_size: stack.len(),
        };
        // SAFETY: `alt` describes a leaked allocation that outlives the thread.
        unsafe {
            libc::sigaltstack(&alt, ptr::null_mut());
        }
    }

    pub(super) fn install_signal(signal: c_int) -> Result<()> {
        // SAFETY: `action` is fully initialised before use and `on_signal`
        // has the signature SA_SIGINFO requires.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESETHAND;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
                return Err(Error::SignalInstall {
                    signal,
                    source: io::Error::last_os_error(),
                });
            }
        }
        Ok(())
    }

    extern "C" fn on_signal(signal: c_int, info: *mut siginfo_t, _context: *mut c_void) {
        let kind = if signal == libc::SIGABRT {
            CrashKind::Abort
        } else {
            CrashKind::Fault { signal }
        };
        let fault_address = match kind {
            CrashKind::Fault { .. } => fault_address(info),
            _ => None,
        };
        if let Some(handler) = INSTALLED.get() {
            handler.handle(&CrashContext::capture(kind, fault_address));
        }
        // SA_RESETHAND restored the default action; re-raise so that a signal
        // sent with kill() terminates the process too.
        // SAFETY: raise has no preconditions.
        unsafe {
            libc::raise(signal);
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn fault_address(info: *mut siginfo_t) -> Option<usize> {
        if info.is_null() {
            return None;
        }
        // SAFETY: the kernel passes a valid siginfo_t to SA_SIGINFO handlers.
        Some(unsafe { (*info).si_addr() } as usize)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn fault_address(info: *mut siginfo_t) -> Option<usize> {
        if info.is_null() {
            return None;
        }
        // SAFETY: as above.
        Some(unsafe { (*info).si_addr } as usize)
    }
}

#[cfg(not(unix))]
mod hooks {
    use crate::error::Result;

    // Only the panic hook is available here.
    pub(super) fn install() -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(CrashKind::Fault { signal: 11 }.to_string(), "fault (signal 11)");
        assert_eq!(CrashKind::Abort.to_string(), "abort");
        assert_eq!(CrashKind::Terminate.to_string(), "terminate");
    }

    #[test]
    fn test_state_transitions() {
        let handler = CrashHandler::new(CrashConfig::default(), || {});
        assert_eq!(handler.state(), CrashState::Armed);
        handler.trigger(CrashKind::Terminate);
        assert_eq!(handler.state(), CrashState::Triggered);
        assert_eq!(handler.trigger_count(), 1);
    }

    #[test]
    fn test_panicking_shutdown_callback_is_contained() {
        let handler = CrashHandler::new(CrashConfig::default(), || panic!("shutdown failed"));
        let report = handler.trigger(CrashKind::Abort);
        assert_eq!(report.snapshot, SnapshotOutcome::Disabled);
    }

    #[cfg(panic = "unwind")]
    #[test]
    fn test_only_uncontained_main_thread_panics_are_fatal() {
        assert!(panic_is_fatal(Some("main")));
        assert!(!panic_is_fatal(Some("worker")));
        assert!(!panic_is_fatal(None));

        assert_eq!(catch_contained(|| panic_is_fatal(Some("main"))).ok(), Some(false));
        let nested = catch_contained(|| catch_contained(|| ()).map(|()| panic_is_fatal(Some("main"))));
        assert_eq!(nested.ok().and_then(std::result::Result::ok), Some(false));
        assert!(panic_is_fatal(Some("main")), "containment depth leaked");

        assert!(catch_contained(|| panic!("sink failed")).is_err());
        assert!(panic_is_fatal(Some("main")), "containment depth leaked after a panic");
    }

    // The only test in this binary that touches the global handler.
    #[test]
    fn test_handler_published_only_after_hooks_install() {
        let config = CrashConfig::default().with_capture_panics(false);
        let failed = install_with(CrashHandler::new(config.clone(), || {}), || {
            Err(Error::SignalInstall {
                signal: 11,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "sigaction refused"),
            })
        });
        assert!(matches!(failed, Err(Error::SignalInstall { signal: 11, .. })));
        assert_eq!(state(), CrashState::Uninitialized);
        assert!(installed().is_none());

        let mut hooked = false;
        let handler = install_with(CrashHandler::new(config.clone(), || {}), || {
            hooked = true;
            Ok(())
        })
        .unwrap();
        assert!(hooked);
        assert_eq!(handler.config(), &config);
        assert_eq!(state(), CrashState::Armed);

        let again = install_with(CrashHandler::new(config, || {}), || panic!("hooks installed twice"));
        assert!(matches!(again, Err(Error::AlreadyInstalled)));
    }

    #[cfg(unix)]
    #[test]
    fn test_uncatchable_signal_reports_install_error() {
        let err = hooks::install_signal(libc::SIGKILL).unwrap_err();
        assert!(matches!(err, Error::SignalInstall { signal, .. } if signal == libc::SIGKILL));
    }
}
