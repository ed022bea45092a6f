use std::fmt;
use std::path::MAIN_SEPARATOR;

use crate::level::Level;
use crate::line_builder::LineBuilder;

/// Where a record was emitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    pub file: &'a str,
    pub function: &'a str,
    pub line: u32,
}

impl<'a> SourceLocation<'a> {
    pub const fn new(file: &'a str, function: &'a str, line: u32) -> Self {
        Self { file, function, line }
    }
}

/// Everything the logger knows about a record besides its message.
#[derive(Debug, Clone, Copy)]
pub struct RecordMeta<'a> {
    pub timestamp_ns: u64,
    pub level: Level,
    pub pid: u32,
    pub thread: u64,
    /// `file` already reduced to its final path component.
    pub location: SourceLocation<'a>,
}

/// Lays out one record into the logger's shared buffer.
///
/// Implementations must stay within `buffer` and return the number of bytes
/// that make up the record; those bytes are what every sink receives.
pub trait RecordFormatter: Send + Sync {
    fn format(&self, buffer: &mut [u8], meta: &RecordMeta<'_>, message: fmt::Arguments<'_>) -> usize;
}

/// Two-line layout:
///
/// ```text
/// [<timestamp_ns>][<Level>][pid=<pid>][tid=<thread>][<file> | <function>() | <line>]
/// <message>
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFormatter;

impl RecordFormatter for DefaultFormatter {
    fn format(&self, buffer: &mut [u8], meta: &RecordMeta<'_>, message: fmt::Arguments<'_>) -> usize {
        let Ok(mut builder) = LineBuilder::new(buffer) else {
            return 0;
        };
        builder.write_line(format_args!(
            "[{}][{}][pid={}][tid={}][{} | {}() | {}]",
            meta.timestamp_ns,
            meta.level,
            meta.pid,
            meta.thread,
            meta.location.file,
            meta.location.function,
            meta.location.line,
        ));
        builder.write_line(message);
        builder.size_written()
    }
}

/// Final component of `path`, or `path` itself when it has no separator.
///
/// ```
/// # use fault_logger::formatter::file_name;
/// assert_eq!(file_name("src/net/socket.rs"), "socket.rs");
/// assert_eq!(file_name("main.rs"), "main.rs");
/// ```
pub fn file_name(path: &str) -> &str {
    match path.rfind(MAIN_SEPARATOR) {
        Some(pos) => &path[pos + MAIN_SEPARATOR.len_utf8()..],
        None => path,
    }
}
