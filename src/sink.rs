use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

/// A destination for formatted records.
///
/// The logger calls `write` once per record with the complete record bytes,
/// and `flush` on explicit flush and teardown. Both run while the logger's
/// lock is held, so they must be fast and must not block indefinitely.
/// Failures are the sink's own business: neither method reports them.
///
/// # Usage
///
/// ```
/// # use fault_logger::LogSink;
/// struct Discard;
///
/// impl LogSink for Discard {
///     fn write(&mut self, _record: &[u8]) {}
///     fn flush(&mut self) {}
/// }
/// ```
pub trait LogSink: Send {
    /// Appends one record.
    fn write(&mut self, record: &[u8]);

    /// Forces buffered bytes to their destination.
    fn flush(&mut self);
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write(&mut self, record: &[u8]) {
        (**self).write(record)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Appends records to a file, truncating it on creation.
///
/// `buffer_size == 0` writes straight through; any other value interposes a
/// write buffer of that many bytes. I/O errors are swallowed.
pub struct FileSink {
    out: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>, buffer_size: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            out: BufWriter::with_capacity(buffer_size, file),
        })
    }
}

impl LogSink for FileSink {
    fn write(&mut self, record: &[u8]) {
        let _ = self.out.write_all(record);
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Writes records to the process's standard output or standard error.
#[derive(Debug)]
pub struct ConsoleSink {
    stream: Stream,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self { stream: Stream::Stdout }
    }

    pub fn stderr() -> Self {
        Self { stream: Stream::Stderr }
    }
}

impl LogSink for ConsoleSink {
    fn write(&mut self, record: &[u8]) {
        let _ = match self.stream {
            Stream::Stdout => io::stdout().lock().write_all(record),
            Stream::Stderr => io::stderr().lock().write_all(record),
        };
    }

    fn flush(&mut self) {
        let _ = match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        };
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    bytes: Vec<u8>,
    records: Vec<Vec<u8>>,
    writes: usize,
    flushes: usize,
}

/// Keeps every record in memory.
///
/// Clones share the same storage, so a clone kept by the caller observes
/// everything written through the clone handed to the logger.
///
/// ```
/// # use fault_logger::{LogSink, MemorySink};
/// let sink = MemorySink::new();
/// let mut attached = sink.clone();
/// attached.write(b"hello\n");
/// assert_eq!(sink.contents(), b"hello\n");
/// assert_eq!(sink.write_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All bytes written so far, concatenated.
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().bytes.clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().bytes).into_owned()
    }

    /// Each `write` call's bytes, in arrival order.
    pub fn records(&self) -> Vec<Vec<u8>> {
        self.state.lock().records.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.bytes.clear();
        state.records.clear();
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, record: &[u8]) {
        let mut state = self.state.lock();
        state.writes += 1;
        state.bytes.extend_from_slice(record);
        state.records.push(record.to_vec());
    }

    fn flush(&mut self) {
        self.state.lock().flushes += 1;
    }
}
