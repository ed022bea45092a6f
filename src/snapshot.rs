//! Memory snapshots taken when the process crashes.
//!
//! A [`SnapshotSize`] class selects a set of [`SnapshotFlags`]; a
//! [`SnapshotWriter`] turns the flags into a file. Flag values follow the
//! platform dump flags they are named after, so a writer backed by a native
//! dump facility can pass them straight through.
//!
//! The bundled [`ProcfsSnapshotWriter`] targets Linux, which has no in-process
//! dump facility, and assembles the snapshot from `/proc/self`:
//!
//! | flag                                   | captured                                  |
//! |----------------------------------------|-------------------------------------------|
//! | always                                 | crash header, `status`, `stat`            |
//! | `SCAN_MEMORY`, `WITH_INDIRECTLY_REFERENCED_MEMORY` | mapping containing the fault address |
//! | `WITH_FULL_MEMORY_INFO`                | full `maps`                               |
//! | `WITH_UNLOADED_MODULES`                | mapped object files                       |
//! | `WITH_THREAD_INFO`                     | per-thread `stat` and `comm`              |
//! | `WITH_HANDLE_DATA`                     | open descriptors and their targets        |
//! | `WITH_PRIVATE_READ_WRITE_MEMORY`       | summary of private writable regions       |
//! | `WITH_DATA_SEGS`                       | contents of file-backed writable regions  |
//! | `WITH_PROCESS_THREAD_DATA`             | `cmdline`, `environ`, `limits`            |
//! | `WITH_FULL_MEMORY`                     | contents of every readable region         |
//!
//! Text sections start with `== <name> ==`. A memory section declares the
//! region's length in its header, is followed by exactly that many raw bytes
//! and ends with a `== end memory: <n> bytes read ==` line. Memory is
//! streamed through one fixed chunk, so snapshot size does not drive heap
//! use.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

use crate::crash_handler::CrashContext;

/// How much process state a crash snapshot captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotSize {
    /// No snapshot, even if a path is configured.
    None,
    /// Only memory referenced from the crash site.
    #[default]
    Small,
    /// Adds data segments, thread and handle data, full region metadata and
    /// the module list.
    Medium,
    /// Adds full memory contents and process/thread context.
    Large,
}

impl SnapshotSize {
    pub fn flags(self) -> SnapshotFlags {
        use SnapshotFlags as F;
        let medium = F::WITH_DATA_SEGS
            | F::WITH_PRIVATE_READ_WRITE_MEMORY
            | F::WITH_HANDLE_DATA
            | F::WITH_FULL_MEMORY_INFO
            | F::WITH_THREAD_INFO
            | F::WITH_UNLOADED_MODULES;
        match self {
            SnapshotSize::None => F::NORMAL,
            SnapshotSize::Small => F::NORMAL | F::WITH_INDIRECTLY_REFERENCED_MEMORY | F::SCAN_MEMORY,
            SnapshotSize::Medium => F::NORMAL | medium,
            SnapshotSize::Large => F::NORMAL | medium | F::WITH_FULL_MEMORY | F::WITH_PROCESS_THREAD_DATA,
        }
    }
}

/// Bitmask of capture flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SnapshotFlags(u32);

impl SnapshotFlags {
    pub const NORMAL: Self = Self(0x0000_0000);
    pub const WITH_DATA_SEGS: Self = Self(0x0000_0001);
    pub const WITH_FULL_MEMORY: Self = Self(0x0000_0002);
    pub const WITH_HANDLE_DATA: Self = Self(0x0000_0004);
    pub const SCAN_MEMORY: Self = Self(0x0000_0010);
    pub const WITH_UNLOADED_MODULES: Self = Self(0x0000_0020);
    pub const WITH_INDIRECTLY_REFERENCED_MEMORY: Self = Self(0x0000_0040);
    pub const WITH_PROCESS_THREAD_DATA: Self = Self(0x0000_0100);
    pub const WITH_PRIVATE_READ_WRITE_MEMORY: Self = Self(0x0000_0200);
    pub const WITH_FULL_MEMORY_INFO: Self = Self(0x0000_0800);
    pub const WITH_THREAD_INFO: Self = Self(0x0000_1000);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::WITH_DATA_SEGS, "WITH_DATA_SEGS"),
        (Self::WITH_FULL_MEMORY, "WITH_FULL_MEMORY"),
        (Self::WITH_HANDLE_DATA, "WITH_HANDLE_DATA"),
        (Self::SCAN_MEMORY, "SCAN_MEMORY"),
        (Self::WITH_UNLOADED_MODULES, "WITH_UNLOADED_MODULES"),
        (Self::WITH_INDIRECTLY_REFERENCED_MEMORY, "WITH_INDIRECTLY_REFERENCED_MEMORY"),
        (Self::WITH_PROCESS_THREAD_DATA, "WITH_PROCESS_THREAD_DATA"),
        (Self::WITH_PRIVATE_READ_WRITE_MEMORY, "WITH_PRIVATE_READ_WRITE_MEMORY"),
        (Self::WITH_FULL_MEMORY_INFO, "WITH_FULL_MEMORY_INFO"),
        (Self::WITH_THREAD_INFO, "WITH_THREAD_INFO"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for SnapshotFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SnapshotFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SnapshotFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("NORMAL");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Produces the snapshot file.
///
/// Called at most once per process, from the crash path, after the crash has
/// already been logged. Implementations should avoid locks that normal code
/// may hold and report every failure through the returned error.
pub trait SnapshotWriter: Send + Sync {
    fn write_snapshot(&self, path: &Path, flags: SnapshotFlags, context: &CrashContext) -> io::Result<()>;
}

/// Builds snapshots from `/proc/self`. See the module docs for the layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsSnapshotWriter;

const PROC_SELF: &str = "/proc/self";
const MEMORY_CHUNK: usize = 64 * 1024;

impl SnapshotWriter for ProcfsSnapshotWriter {
    fn write_snapshot(&self, path: &Path, flags: SnapshotFlags, context: &CrashContext) -> io::Result<()> {
        if !cfg!(target_os = "linux") || !Path::new(PROC_SELF).is_dir() {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "procfs is not available"));
        }

        let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        let mut out = BufWriter::new(file);

        writeln!(out, "== crash ==")?;
        writeln!(out, "kind: {}", context.kind)?;
        writeln!(out, "pid: {}", context.pid)?;
        writeln!(out, "tid: {}", context.thread)?;
        writeln!(out, "timestamp_ns: {}", context.timestamp_ns)?;
        if let Some(address) = context.fault_address {
            writeln!(out, "fault_address: {:#x}", address)?;
        }
        writeln!(out, "flags: {:?}", flags)?;

        copy_section(&mut out, "status", "/proc/self/status")?;
        copy_section(&mut out, "stat", "/proc/self/stat")?;

        let maps = fs::read_to_string("/proc/self/maps").unwrap_or_default();
        let regions: Vec<Region<'_>> = maps.lines().filter_map(Region::parse).collect();

        if flags.intersects(SnapshotFlags::SCAN_MEMORY | SnapshotFlags::WITH_INDIRECTLY_REFERENCED_MEMORY) {
            writeln!(out, "== referenced ==")?;
            match context.fault_address {
                Some(address) => match regions.iter().find(|region| region.contains(address)) {
                    Some(region) => writeln!(out, "{}", region.line)?,
                    None => writeln!(out, "{:#x} is not mapped", address)?,
                },
                None => writeln!(out, "no fault address")?,
            }
        }
        if flags.contains(SnapshotFlags::WITH_FULL_MEMORY_INFO) {
            writeln!(out, "== maps ==")?;
            out.write_all(maps.as_bytes())?;
        }
        if flags.contains(SnapshotFlags::WITH_UNLOADED_MODULES) {
            writeln!(out, "== modules ==")?;
            let mut modules: Vec<&str> = regions.iter().filter_map(|region| region.object_file()).collect();
            modules.dedup();
            for module in modules {
                writeln!(out, "{}", module)?;
            }
        }
        if flags.contains(SnapshotFlags::WITH_THREAD_INFO) {
            write_threads(&mut out)?;
        }
        if flags.contains(SnapshotFlags::WITH_HANDLE_DATA) {
            write_handles(&mut out)?;
        }
        if flags.contains(SnapshotFlags::WITH_PRIVATE_READ_WRITE_MEMORY) {
            writeln!(out, "== private ==")?;
            for region in regions.iter().filter(|region| region.is_private_writable()) {
                writeln!(out, "{:#x}-{:#x} {} bytes {}", region.start, region.end, region.len(), region.name)?;
            }
        }
        if flags.contains(SnapshotFlags::WITH_PROCESS_THREAD_DATA) {
            copy_section(&mut out, "cmdline", "/proc/self/cmdline")?;
            copy_section(&mut out, "environ", "/proc/self/environ")?;
            copy_section(&mut out, "limits", "/proc/self/limits")?;
        }

        if flags.intersects(SnapshotFlags::WITH_DATA_SEGS | SnapshotFlags::WITH_FULL_MEMORY) {
            let full = flags.contains(SnapshotFlags::WITH_FULL_MEMORY);
            let mem = File::open("/proc/self/mem")?;
            let mut chunk = vec![0u8; MEMORY_CHUNK];
            for region in &regions {
                let wanted = if full {
                    region.is_dumpable()
                } else {
                    region.is_data_segment()
                };
                if wanted {
                    write_memory(&mut out, &mem, region, &mut chunk)?;
                }
            }
        }

        out.flush()
    }
}

fn copy_section(out: &mut impl Write, name: &str, source: &str) -> io::Result<()> {
    writeln!(out, "== {} ==", name)?;
    match fs::read(source) {
        Ok(mut bytes) => {
            // cmdline and environ are NUL separated.
            for byte in bytes.iter_mut() {
                if *byte == 0 {
                    *byte = b'\n';
                }
            }
            out.write_all(&bytes)?;
            if bytes.last() != Some(&b'\n') {
                out.write_all(b"\n")?;
            }
        }
        Err(err) => writeln!(out, "unavailable: {}", err)?,
    }
    Ok(())
}

fn write_threads(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "== threads ==")?;
    let tasks = match fs::read_dir("/proc/self/task") {
        Ok(tasks) => tasks,
        Err(err) => return writeln!(out, "unavailable: {}", err),
    };
    for task in tasks.flatten() {
        let dir = task.path();
        let comm = fs::read_to_string(dir.join("comm")).unwrap_or_default();
        let stat = fs::read_to_string(dir.join("stat")).unwrap_or_default();
        writeln!(out, "{} {}", comm.trim_end(), stat.trim_end())?;
    }
    Ok(())
}

fn write_handles(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "== handles ==")?;
    let fds = match fs::read_dir("/proc/self/fd") {
        Ok(fds) => fds,
        Err(err) => return writeln!(out, "unavailable: {}", err),
    };
    for fd in fds.flatten() {
        let target = fs::read_link(fd.path())
            .map(|target| target.display().to_string())
            .unwrap_or_else(|err| format!("? ({})", err));
        writeln!(out, "{} -> {}", fd.file_name().to_string_lossy(), target)?;
    }
    Ok(())
}

/// Streams one region as `== memory <range> <perms> <len> bytes <name> ==`,
/// exactly `len` bytes, then `== end memory: <n> bytes read ==`. Pages that
/// cannot be read are written as zeros so the declared length always holds.
#[cfg(unix)]
fn write_memory(out: &mut impl Write, mem: &File, region: &Region<'_>, chunk: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;

    writeln!(
        out,
        "== memory {:#x}-{:#x} {} {} bytes {} ==",
        region.start,
        region.end,
        region.perms,
        region.len(),
        region.name
    )?;

    let mut address = region.start;
    let mut read = 0;
    while address < region.end {
        let want = (region.end - address).min(chunk.len());
        match mem.read_at(&mut chunk[..want], address as u64) {
            Ok(n) if n > 0 => {
                out.write_all(&chunk[..n])?;
                address += n;
                read += n;
            }
            _ => break,
        }
    }

    chunk.fill(0);
    while address < region.end {
        let n = (region.end - address).min(chunk.len());
        out.write_all(&chunk[..n])?;
        address += n;
    }
    write!(out, "\n== end memory: {} bytes read ==\n", read)
}

#[cfg(not(unix))]
fn write_memory(_out: &mut impl Write, _mem: &File, _region: &Region<'_>, _chunk: &mut [u8]) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "memory capture is not supported"))
}

/// One line of `/proc/self/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Region<'a> {
    start: usize,
    end: usize,
    perms: &'a str,
    name: &'a str,
    line: &'a str,
}

impl<'a> Region<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let perms = fields.next()?;
        // offset, dev, inode
        let name = fields.nth(3).unwrap_or("");
        let (start, end) = range.split_once('-')?;
        Some(Self {
            start: usize::from_str_radix(start, 16).ok()?,
            end: usize::from_str_radix(end, 16).ok()?,
            perms,
            name,
            line,
        })
    }

    fn len(&self) -> usize {
        self.end - self.start
    }

    fn contains(&self, address: usize) -> bool {
        (self.start..self.end).contains(&address)
    }

    fn readable(&self) -> bool {
        self.perms.starts_with('r')
    }

    fn is_private_writable(&self) -> bool {
        self.perms.starts_with("rw") && self.perms.ends_with('p')
    }

    fn object_file(&self) -> Option<&'a str> {
        self.name.starts_with('/').then_some(self.name)
    }

    fn is_data_segment(&self) -> bool {
        self.is_private_writable() && self.object_file().is_some()
    }

    fn is_dumpable(&self) -> bool {
        self.readable() && !matches!(self.name, "[vvar]" | "[vvar_vclock]" | "[vsyscall]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_masks() {
        let small = SnapshotSize::Small.flags();
        assert!(small.contains(SnapshotFlags::SCAN_MEMORY | SnapshotFlags::WITH_INDIRECTLY_REFERENCED_MEMORY));
        assert!(!small.contains(SnapshotFlags::WITH_FULL_MEMORY_INFO));

        let medium = SnapshotSize::Medium.flags();
        assert!(medium.contains(SnapshotFlags::WITH_THREAD_INFO | SnapshotFlags::WITH_HANDLE_DATA));
        assert!(!medium.contains(SnapshotFlags::WITH_FULL_MEMORY));

        let large = SnapshotSize::Large.flags();
        assert!(large.contains(medium));
        assert!(large.contains(SnapshotFlags::WITH_FULL_MEMORY | SnapshotFlags::WITH_PROCESS_THREAD_DATA));

        assert_eq!(SnapshotSize::None.flags(), SnapshotFlags::NORMAL);
    }

    #[test]
    fn test_flags_debug_names() {
        let flags = SnapshotFlags::SCAN_MEMORY | SnapshotFlags::WITH_THREAD_INFO;
        assert_eq!(format!("{:?}", flags), "SCAN_MEMORY | WITH_THREAD_INFO");
        assert_eq!(format!("{:?}", SnapshotFlags::NORMAL), "NORMAL");
    }

    #[test]
    fn test_parse_maps_line() {
        let line = "7f2c1a000000-7f2c1a021000 rw-p 00000000 00:00 0                          [heap]";
        let region = Region::parse(line).unwrap();
        assert_eq!(region.start, 0x7f2c1a000000);
        assert_eq!(region.len(), 0x21000);
        assert_eq!(region.name, "[heap]");
        assert!(region.is_private_writable());
        assert!(!region.is_data_segment());

        let lib = Region::parse("55d0c0000000-55d0c0001000 rw-p 00003000 08:01 1234 /usr/lib/libc.so.6").unwrap();
        assert_eq!(lib.object_file(), Some("/usr/lib/libc.so.6"));
        assert!(lib.is_data_segment());

        let anon = Region::parse("55d0c0000000-55d0c0001000 r--p 00000000 00:00 0").unwrap();
        assert_eq!(anon.name, "");
        assert!(Region::parse("garbage").is_none());
    }
}
