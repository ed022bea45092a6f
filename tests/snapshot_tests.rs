#![cfg(target_os = "linux")]

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use fault_logger::{CrashContext, CrashKind, ProcfsSnapshotWriter, SnapshotSize, SnapshotWriter};

// Non-zero initialiser keeps it in the executable's writable data segment.
static DATA_MARKER: AtomicU64 = AtomicU64::new(0x5eed_f00d_cafe_b0b0);

/// One `== memory ... ==` section, with its payload located in the file.
#[derive(Debug)]
struct MemorySection {
    header: String,
    start: usize,
    end: usize,
    perms: String,
    name: String,
    data: Range<usize>,
    read: usize,
}

impl MemorySection {
    fn contains(&self, address: usize) -> bool {
        (self.start..self.end).contains(&address)
    }

    fn bytes_at<'a>(&self, snapshot: &'a [u8], address: usize, len: usize) -> &'a [u8] {
        let offset = self.data.start + (address - self.start);
        &snapshot[offset..offset + len]
    }
}

fn capture(size: SnapshotSize, fault_address: Option<usize>) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crash.dmp");
    let context = CrashContext {
        kind: CrashKind::Fault { signal: 11 },
        pid: std::process::id(),
        thread: 7,
        timestamp_ns: 1,
        fault_address,
    };
    ProcfsSnapshotWriter.write_snapshot(&path, size.flags(), &context).unwrap();
    std::fs::read(&path).unwrap()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Splits a snapshot into its leading text and its trailing memory sections,
/// walking the sections by their declared lengths.
fn split_snapshot(snapshot: &[u8]) -> (String, Vec<MemorySection>) {
    let first = find(snapshot, b"== memory ").unwrap_or(snapshot.len());
    let text = String::from_utf8_lossy(&snapshot[..first]).into_owned();

    let mut sections = Vec::new();
    let mut pos = first;
    while pos < snapshot.len() {
        let eol = pos + snapshot[pos..].iter().position(|&b| b == b'\n').unwrap();
        let header = std::str::from_utf8(&snapshot[pos..eol]).unwrap().to_string();
        let fields: Vec<&str> = header.split_whitespace().collect();
        assert_eq!(fields[..2], ["==", "memory"], "not a memory header: {}", header);
        assert_eq!(fields[5], "bytes", "malformed header: {}", header);

        let (start, end) = fields[2].split_once('-').unwrap();
        let start = usize::from_str_radix(start.trim_start_matches("0x"), 16).unwrap();
        let end = usize::from_str_radix(end.trim_start_matches("0x"), 16).unwrap();
        let declared: usize = fields[4].parse().unwrap();
        assert_eq!(declared, end - start, "declared length disagrees with range: {}", header);

        let data = eol + 1..eol + 1 + declared;
        assert!(data.end <= snapshot.len(), "section truncated: {}", header);

        let trailer = &snapshot[data.end..];
        assert!(
            trailer.starts_with(b"\n== end memory: "),
            "section does not end where its header says: {}",
            header
        );
        let trailer_eol = data.end + 1 + trailer[1..].iter().position(|&b| b == b'\n').unwrap();
        let summary = std::str::from_utf8(&snapshot[data.end + 1..trailer_eol]).unwrap();
        let read: usize = summary.split_whitespace().nth(3).unwrap().parse().unwrap();
        assert!(summary.ends_with(" bytes read =="), "malformed trailer: {}", summary);
        assert!(read <= declared);

        sections.push(MemorySection {
            perms: fields[3].to_string(),
            name: fields.get(6).filter(|name| **name != "==").unwrap_or(&"").to_string(),
            header,
            start,
            end,
            data,
            read,
        });
        pos = trailer_eol + 1;
    }
    (text, sections)
}

#[test]
fn test_small_snapshot_names_the_faulting_region() {
    let local = 0u64;
    let address = &local as *const u64 as usize;
    let snapshot = capture(SnapshotSize::Small, Some(address));
    let (text, sections) = split_snapshot(&snapshot);

    assert!(text.contains(&format!("fault_address: {:#x}", address)));
    let referenced = text.split("== referenced ==\n").nth(1).unwrap().lines().next().unwrap();
    let range = referenced.split_whitespace().next().unwrap();
    let (start, end) = range.split_once('-').unwrap();
    let start = usize::from_str_radix(start, 16).unwrap();
    let end = usize::from_str_radix(end, 16).unwrap();
    assert!((start..end).contains(&address), "{} does not cover {:#x}", referenced, address);
    assert!(referenced.split_whitespace().nth(1).unwrap().starts_with("rw"));

    // Small stays small: no region listing, no memory contents.
    assert!(sections.is_empty());
    for absent in ["== maps ==", "== threads ==", "== handles ==", "== cmdline =="] {
        assert!(!text.contains(absent), "unexpected {}", absent);
    }
}

#[test]
fn test_small_snapshot_without_usable_address() {
    let text = String::from_utf8(capture(SnapshotSize::Small, None)).unwrap();
    assert!(text.contains("== referenced ==\nno fault address\n"));
    assert!(!text.contains("fault_address:"));

    // The zero page is never mapped.
    let text = String::from_utf8(capture(SnapshotSize::Small, Some(0x8))).unwrap();
    assert!(text.contains("fault_address: 0x8\n"));
    assert!(text.contains("== referenced ==\n0x8 is not mapped\n"));
}

#[test]
fn test_medium_snapshot_dumps_data_segments() {
    let value = 0x0123_4567_89ab_cdef ^ u64::from(std::process::id());
    DATA_MARKER.store(value, Ordering::SeqCst);
    let address = &DATA_MARKER as *const AtomicU64 as usize;

    let snapshot = capture(SnapshotSize::Medium, None);
    let (text, sections) = split_snapshot(&snapshot);

    for present in ["== maps ==", "== modules ==", "== threads ==", "== handles ==", "== private =="] {
        assert!(text.contains(present), "missing {}", present);
    }
    assert!(!text.contains("== cmdline =="));

    assert!(!sections.is_empty());
    for section in &sections {
        assert!(section.perms.starts_with("rw") && section.perms.ends_with('p'), "{}", section.header);
        assert!(section.name.starts_with('/'), "not file backed: {}", section.header);
    }

    let data = sections.iter().find(|section| section.contains(address)).unwrap();
    assert_eq!(data.bytes_at(&snapshot, address, 8), value.to_ne_bytes());
    assert!(data.read > 0);
}

#[test]
fn test_large_snapshot_adds_process_data_and_full_memory() {
    let pattern: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37) ^ 0xa5).collect();
    let address = pattern.as_ptr() as usize;

    let snapshot = capture(SnapshotSize::Large, None);
    let (text, sections) = split_snapshot(&snapshot);

    for present in ["== cmdline ==", "== environ ==", "== limits ==", "== maps ==", "== threads =="] {
        assert!(text.contains(present), "missing {}", present);
    }
    assert!(text.contains("Max open files"));
    let program = std::env::args().next().unwrap();
    let cmdline = text.split("== cmdline ==\n").nth(1).unwrap();
    assert_eq!(cmdline.lines().next(), Some(program.as_str()));

    // Anonymous memory is captured too, not just data segments.
    assert!(sections.iter().any(|section| !section.name.starts_with('/')));
    assert!(sections.iter().all(|section| section.perms.starts_with('r')));
    assert!(sections.iter().all(|section| section.name != "[vvar]"));

    let heap = sections.iter().find(|section| section.contains(address)).unwrap();
    assert_eq!(heap.bytes_at(&snapshot, address, pattern.len()), &pattern[..]);
}
