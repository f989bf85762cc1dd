//! Tests for WalEntryReader
//!
//! These tests verify:
//! - Streaming entries across several segments in order
//! - Snappy-compressed segments
//! - Torn final entry tolerated only in the last segment, only when enabled
//! - Bad or short headers are always fatal
//! - has_next / current_segment_index behaviour

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use atlasdb::wal::{
    encode_segment, segment_header, segment_path, LocalSegmentSource, WalEntry, WalEntryReader,
};
use atlasdb::AtlasError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn entry(id: u64) -> WalEntry {
    let mut e = WalEntry::new(format!("table{}", id % 3), None, vec![]);
    e.id = id;
    e
}

fn frames(ids: std::ops::RangeInclusive<u64>) -> Vec<u8> {
    let mut body = Vec::new();
    for id in ids {
        body.extend_from_slice(&entry(id).serialize().unwrap());
    }
    body
}

/// Write a plain segment holding `body`
fn write_segment(dir: &Path, index: u64, body: &[u8]) {
    let mut file = File::create(segment_path(dir, index)).unwrap();
    file.write_all(&segment_header(false)).unwrap();
    file.write_all(body).unwrap();
    file.sync_all().unwrap();
}

fn reader(dir: &Path, indices: Vec<u64>, tolerant: bool) -> WalEntryReader<LocalSegmentSource> {
    WalEntryReader::new(LocalSegmentSource::new(dir, 4096), indices, tolerant)
}

fn ids(reader: WalEntryReader<LocalSegmentSource>) -> atlasdb::Result<Vec<u64>> {
    reader.map(|e| e.map(|e| e.id)).collect()
}

// =============================================================================
// Clean Read Tests
// =============================================================================

#[test]
fn test_read_across_segments() {
    let dir = setup_temp_dir();
    write_segment(dir.path(), 0, &frames(1..=3));
    write_segment(dir.path(), 1, &frames(4..=4));
    write_segment(dir.path(), 2, &frames(5..=7));

    let got = ids(reader(dir.path(), vec![0, 1, 2], false)).unwrap();
    assert_eq!(got, vec![1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn test_read_empty_segment_list() {
    let dir = setup_temp_dir();
    let mut r = reader(dir.path(), vec![], true);
    assert!(!r.has_next());
    assert!(r.next().is_none());
}

#[test]
fn test_read_header_only_segment() {
    let dir = setup_temp_dir();
    write_segment(dir.path(), 0, &[]);
    write_segment(dir.path(), 1, &frames(1..=2));

    let got = ids(reader(dir.path(), vec![0, 1], false)).unwrap();
    assert_eq!(got, vec![1, 2]);
}

#[test]
fn test_read_compressed_segment() {
    let dir = setup_temp_dir();
    let image = encode_segment(&frames(1..=40), true).unwrap();
    fs::write(segment_path(dir.path(), 3), &image).unwrap();

    let got = ids(reader(dir.path(), vec![3], false)).unwrap();
    assert_eq!(got, (1..=40).collect::<Vec<_>>());
}

#[test]
fn test_has_next_and_current_segment() {
    let dir = setup_temp_dir();
    write_segment(dir.path(), 5, &frames(1..=1));
    write_segment(dir.path(), 6, &frames(2..=2));

    let mut r = reader(dir.path(), vec![5, 6], false);
    assert_eq!(r.current_segment_index(), Some(5));
    assert!(r.has_next());
    assert!(r.has_next());
    assert_eq!(r.next().unwrap().unwrap().id, 1);

    assert_eq!(r.next().unwrap().unwrap().id, 2);
    assert_eq!(r.current_segment_index(), Some(6));
    assert!(!r.has_next());
}

// =============================================================================
// Corrupted Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_tolerated_when_enabled() {
    let dir = setup_temp_dir();
    let mut body = frames(1..=3);
    let good_len = body.len();
    let extra = entry(4).serialize().unwrap();
    body.extend_from_slice(&extra[..extra.len() / 2]);
    write_segment(dir.path(), 0, &frames(10..=10));
    write_segment(dir.path(), 1, &body);

    let mut r = reader(dir.path(), vec![0, 1], true);
    let got: Vec<u64> = r.by_ref().map(|e| e.unwrap().id).collect();

    assert_eq!(got, vec![10, 1, 2, 3]);
    let tail = r.torn_tail().unwrap();
    assert_eq!(tail.segment, 1);
    assert_eq!(tail.valid_len, (good_len + 5) as u64);
}

#[test]
fn test_torn_tail_fails_when_disabled() {
    let dir = setup_temp_dir();
    let mut body = frames(1..=3);
    body.extend_from_slice(&[9, 0, 0]);
    write_segment(dir.path(), 0, &body);

    let mut r = reader(dir.path(), vec![0], false);
    for expected in 1..=3 {
        assert_eq!(r.next().unwrap().unwrap().id, expected);
    }
    assert!(matches!(r.next(), Some(Err(AtlasError::WalCorruption(_)))));
    assert!(r.next().is_none());
}

#[test]
fn test_crc_corruption_in_last_entry_tolerated() {
    let dir = setup_temp_dir();
    let mut body = frames(1..=2);
    let last = body.len() - 1;
    body[last] ^= 0xFF;
    write_segment(dir.path(), 0, &body);

    let got = ids(reader(dir.path(), vec![0], true)).unwrap();
    assert_eq!(got, vec![1]);
}

#[test]
fn test_corruption_in_non_last_segment_always_fails() {
    let dir = setup_temp_dir();
    let mut body = frames(1..=2);
    body.extend_from_slice(&[1, 2, 3, 4, 5]);
    write_segment(dir.path(), 0, &body);
    write_segment(dir.path(), 1, &frames(3..=4));

    let result = ids(reader(dir.path(), vec![0, 1], true));
    assert!(matches!(result, Err(AtlasError::WalCorruption(_))));
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_bad_magic_is_fatal_even_when_tolerant() {
    let dir = setup_temp_dir();
    let mut data = b"JUNK\0".to_vec();
    data.extend_from_slice(&frames(1..=1));
    fs::write(segment_path(dir.path(), 0), &data).unwrap();

    let result = ids(reader(dir.path(), vec![0], true));
    assert!(matches!(result, Err(AtlasError::WalCorruption(_))));
}

#[test]
fn test_short_header_is_fatal_even_when_tolerant() {
    let dir = setup_temp_dir();
    fs::write(segment_path(dir.path(), 0), b"AW").unwrap();

    let result = ids(reader(dir.path(), vec![0], true));
    assert!(matches!(result, Err(AtlasError::WalCorruption(_))));
}

#[test]
fn test_missing_segment_is_io_error() {
    let dir = setup_temp_dir();
    let result = ids(reader(dir.path(), vec![0], true));
    assert!(matches!(result, Err(AtlasError::Io(_))));
}
