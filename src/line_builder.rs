use std::fmt;

use crate::error::{Error, Result};

/// Builds text records into a caller-supplied fixed buffer.
///
/// Every write is clipped to the space that remains, so the builder never
/// touches bytes outside `[0, capacity)` and never fails on overflow;
/// truncation is silent and deterministic. When a forced line end finds the
/// buffer exhausted, the final byte is overwritten with `\n`, so a truncated
/// record still ends in a newline and is exactly `capacity` bytes long.
///
/// # Examples
///
/// ```
/// # use fault_logger::LineBuilder;
/// let mut buf = [0u8; 10];
/// let mut builder = LineBuilder::new(&mut buf).unwrap();
/// builder.write_line(format_args!("abcdefghij"));
/// assert_eq!(builder.size_written(), 10);
/// assert_eq!(builder.as_bytes(), b"abcdefghi\n");
/// ```
pub struct LineBuilder<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> LineBuilder<'a> {
    /// Wraps `buffer`; fails if it cannot hold at least two bytes.
    pub fn new(buffer: &'a mut [u8]) -> Result<Self> {
        if buffer.len() <= 1 {
            return Err(Error::InvalidCapacity(buffer.len()));
        }
        Ok(Self { buffer, offset: 0 })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Number of bytes committed so far. Never exceeds the capacity.
    #[inline]
    pub fn size_written(&self) -> usize {
        self.offset
    }

    pub fn is_full(&self) -> bool {
        self.offset == self.buffer.len()
    }

    /// The committed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.offset]
    }

    /// Appends a formatted fragment, clipped to the remaining space.
    pub fn write(&mut self, args: fmt::Arguments<'_>) {
        // Err only means the buffer filled up and formatting stopped early.
        let _ = fmt::Write::write_fmt(self, args);
    }

    /// Appends raw bytes, clipped to the remaining space. Returns the number
    /// of bytes actually copied.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.buffer[self.offset..self.offset + n].copy_from_slice(&bytes[..n]);
        self.offset += n;
        n
    }

    /// `write` followed by a forced line end.
    pub fn write_line(&mut self, args: fmt::Arguments<'_>) {
        self.write(args);
        self.end_line(true);
    }

    /// Appends `\n`. If the buffer is already exhausted, a forced line end
    /// overwrites the last byte instead; an unforced one is dropped.
    pub fn end_line(&mut self, force: bool) {
        if self.remaining() > 0 {
            self.buffer[self.offset] = b'\n';
            self.offset += 1;
        } else if force {
            let last = self.buffer.len() - 1;
            self.buffer[last] = b'\n';
        }
    }

    /// Discards everything written so far.
    pub fn clear(&mut self) {
        self.offset = 0;
    }
}

impl fmt::Write for LineBuilder<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.write_bytes(s.as_bytes()) < s.len() {
            return Err(fmt::Error);
        }
        Ok(())
    }
}

impl fmt::Debug for LineBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuilder")
            .field("capacity", &self.capacity())
            .field("written", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_tiny_buffers() {
        let mut empty: [u8; 0] = [];
        assert!(matches!(LineBuilder::new(&mut empty), Err(Error::InvalidCapacity(0))));
        let mut one = [0u8; 1];
        assert!(matches!(LineBuilder::new(&mut one), Err(Error::InvalidCapacity(1))));
        let mut two = [0u8; 2];
        assert!(LineBuilder::new(&mut two).is_ok());
    }

    #[test]
    fn test_unforced_end_line_on_full_buffer_is_dropped() {
        let mut buf = [0u8; 4];
        let mut builder = LineBuilder::new(&mut buf).unwrap();
        builder.write(format_args!("abcdef"));
        assert!(builder.is_full());
        builder.end_line(false);
        assert_eq!(builder.as_bytes(), b"abcd");
    }

    #[test]
    fn test_writes_after_full_are_ignored() {
        let mut buf = [0u8; 6];
        let mut builder = LineBuilder::new(&mut buf).unwrap();
        builder.write_line(format_args!("0123456789"));
        builder.write(format_args!("more"));
        assert_eq!(builder.write_bytes(b"x"), 0);
        assert_eq!(builder.as_bytes(), b"01234\n");
    }

    #[test]
    fn test_multibyte_is_clipped_bytewise() {
        let mut buf = [0u8; 4];
        let mut builder = LineBuilder::new(&mut buf).unwrap();
        builder.write(format_args!("{}", "héllo"));
        assert_eq!(builder.size_written(), 4);
    }
}
