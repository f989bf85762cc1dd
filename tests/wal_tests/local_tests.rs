//! Tests for WalLocalFileManager
//!
//! These tests verify:
//! - Segment creation, header and append
//! - Size-based rotation and the pre/post-rotation counts
//! - Resuming the newest segment on reopen
//! - Torn-tail truncation on open
//! - Removal never touches the current segment
//! - A failed write (sync included) leaves the cache as it was

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use atlasdb::config::WalSyncStrategy;
use atlasdb::wal::{segment_path, WalEntry, WalLocalFileManager, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC};
use atlasdb::AtlasError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn open(dir: &Path, max_segment_size: u64) -> WalLocalFileManager {
    open_at(dir, max_segment_size, 0)
}

fn open_at(dir: &Path, max_segment_size: u64, first_index: u64) -> WalLocalFileManager {
    let (manager, _) = WalLocalFileManager::open(
        dir,
        max_segment_size,
        WalSyncStrategy::EveryWrite,
        4096,
        true,
        first_index,
    )
    .unwrap();
    manager
}

fn frame(id: u64) -> Vec<u8> {
    let mut e = WalEntry::new("t", None, vec![]);
    e.id = id;
    e.serialize().unwrap()
}

fn read_ids(manager: &WalLocalFileManager) -> Vec<u64> {
    let indices = manager.segment_indices().unwrap();
    manager
        .reader(indices, false)
        .map(|e| e.unwrap().id)
        .collect()
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_first_write_creates_segment_with_header() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 1 << 20);
    assert!(manager.segment_indices().unwrap().is_empty());

    let f = frame(1);
    let outcome = manager.write(&[f.clone()]).unwrap();

    assert_eq!(outcome.segment, 0);
    assert_eq!(outcome.written_before_rotation, 1);
    assert_eq!(outcome.written_after_rotation, 0);
    assert!(outcome.sealed.is_empty());
    assert_eq!(outcome.segment_size, (SEGMENT_HEADER_SIZE + f.len()) as u64);

    let data = fs::read(segment_path(dir.path(), 0)).unwrap();
    assert_eq!(&data[..4], SEGMENT_MAGIC);
    assert_eq!(data.len() as u64, outcome.segment_size);
}

#[test]
fn test_empty_write_is_a_no_op() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 1 << 20);

    let outcome = manager.write(&[]).unwrap();

    assert_eq!(outcome.segment_size, 0);
    assert!(manager.segment_indices().unwrap().is_empty());
}

#[test]
fn test_entries_read_back_in_order() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 1 << 20);
    for id in 1..=5 {
        manager.write(&[frame(id)]).unwrap();
    }
    assert_eq!(read_ids(&manager), vec![1, 2, 3, 4, 5]);
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotation_when_segment_would_overflow() {
    let dir = setup_temp_dir();
    let one = (SEGMENT_HEADER_SIZE + frame(1).len()) as u64;
    // room for exactly two frames per segment
    let mut manager = open(dir.path(), one + frame(2).len() as u64);

    let outcome = manager.write(&[frame(1), frame(2), frame(3)]).unwrap();

    assert_eq!(outcome.written_before_rotation, 2);
    assert_eq!(outcome.written_after_rotation, 1);
    assert_eq!(outcome.sealed.len(), 1);
    assert_eq!(outcome.sealed[0].0, 0);
    assert_eq!(outcome.segment, 1);
    assert_eq!(manager.segment_indices().unwrap(), vec![0, 1]);
    assert_eq!(read_ids(&manager), vec![1, 2, 3]);
}

#[test]
fn test_oversized_frame_gets_its_own_segment() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 8);

    manager.write(&[frame(1)]).unwrap();
    let outcome = manager.write(&[frame(2)]).unwrap();

    assert_eq!(outcome.sealed.len(), 1);
    assert_eq!(outcome.written_after_rotation, 1);
    assert_eq!(manager.segment_indices().unwrap(), vec![0, 1]);
}

#[test]
fn test_sealed_size_matches_file() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 64);

    let mut sealed = Vec::new();
    for id in 1..=10 {
        sealed.extend(manager.write(&[frame(id)]).unwrap().sealed);
    }

    assert!(!sealed.is_empty());
    for (index, size) in sealed {
        assert_eq!(manager.segment_size(index).unwrap(), size);
    }
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_resumes_newest_segment() {
    let dir = setup_temp_dir();
    {
        let mut manager = open(dir.path(), 1 << 20);
        manager.write(&[frame(1), frame(2)]).unwrap();
    }

    let (mut manager, recovery) =
        WalLocalFileManager::open(dir.path(), 1 << 20, WalSyncStrategy::EveryWrite, 4096, true, 0)
            .unwrap();
    assert_eq!(recovery.last_id, Some(2));
    assert_eq!(recovery.truncated_bytes, 0);
    assert_eq!(manager.current_index(), 0);

    manager.write(&[frame(3)]).unwrap();
    assert_eq!(manager.segment_indices().unwrap(), vec![0]);
    assert_eq!(read_ids(&manager), vec![1, 2, 3]);
}

#[test]
fn test_first_index_above_local_segments_starts_new_segment() {
    let dir = setup_temp_dir();
    {
        let mut manager = open(dir.path(), 1 << 20);
        manager.write(&[frame(1)]).unwrap();
    }

    let mut manager = open_at(dir.path(), 1 << 20, 4);
    assert_eq!(manager.current_index(), 4);
    manager.write(&[frame(2)]).unwrap();
    assert_eq!(manager.segment_indices().unwrap(), vec![0, 4]);
}

#[test]
fn test_reopen_truncates_torn_tail() {
    let dir = setup_temp_dir();
    let clean_len = {
        let mut manager = open(dir.path(), 1 << 20);
        manager.write(&[frame(1), frame(2)]).unwrap().segment_size
    };
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(segment_path(dir.path(), 0))
            .unwrap();
        file.write_all(&frame(3)[..6]).unwrap();
    }

    let (mut manager, recovery) =
        WalLocalFileManager::open(dir.path(), 1 << 20, WalSyncStrategy::EveryWrite, 4096, true, 0)
            .unwrap();

    assert_eq!(recovery.last_id, Some(2));
    assert_eq!(recovery.truncated_bytes, 6);
    assert_eq!(manager.current_size(), clean_len);
    assert_eq!(fs::metadata(segment_path(dir.path(), 0)).unwrap().len(), clean_len);

    manager.write(&[frame(3)]).unwrap();
    assert_eq!(read_ids(&manager), vec![1, 2, 3]);
}

#[test]
fn test_reopen_with_torn_tail_fails_when_not_tolerant() {
    let dir = setup_temp_dir();
    {
        let mut manager = open(dir.path(), 1 << 20);
        manager.write(&[frame(1)]).unwrap();
    }
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(segment_path(dir.path(), 0))
            .unwrap();
        file.write_all(&[0xAB; 3]).unwrap();
    }

    let result =
        WalLocalFileManager::open(dir.path(), 1 << 20, WalSyncStrategy::EveryWrite, 4096, false, 0);
    assert!(result.is_err());
}

// =============================================================================
// Removal Tests
// =============================================================================

#[test]
fn test_remove_never_deletes_current_segment() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 48);
    for id in 1..=8 {
        manager.write(&[frame(id)]).unwrap();
    }
    let before = manager.segment_indices().unwrap();
    let current = manager.current_index();
    assert!(before.len() > 2);

    let removed = manager.remove_wal_log_files(u64::MAX).unwrap();

    assert!(!removed.contains(&current));
    assert_eq!(manager.segment_indices().unwrap(), vec![current]);
}

#[test]
fn test_remove_up_to_bound() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 48);
    for id in 1..=8 {
        manager.write(&[frame(id)]).unwrap();
    }
    assert!(manager.current_index() >= 2);

    let removed = manager.remove_wal_log_files(0).unwrap();

    assert_eq!(removed, vec![0]);
    assert!(!manager.segment_indices().unwrap().contains(&0));
    assert!(manager.segment_indices().unwrap().contains(&1));
}

// =============================================================================
// Failed Write Tests
// =============================================================================

#[test]
fn test_failed_sync_rolls_back_write() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 1 << 20);
    let first = manager.write(&[frame(1)]).unwrap();

    manager.fail_next_syncs(1);
    let result = manager.write(&[frame(2)]);

    assert!(matches!(result, Err(AtlasError::WalWrite(_))));
    assert_eq!(manager.current_size(), first.segment_size);
    assert_eq!(manager.segment_size(0).unwrap(), first.segment_size);
    assert_eq!(read_ids(&manager), vec![1]);

    // the retry lands exactly once
    manager.write(&[frame(2)]).unwrap();
    assert_eq!(read_ids(&manager), vec![1, 2]);
}

#[test]
fn test_failed_first_write_leaves_no_segment() {
    let dir = setup_temp_dir();
    let mut manager = open(dir.path(), 1 << 20);

    manager.fail_next_syncs(1);
    assert!(manager.write(&[frame(1)]).is_err());

    assert!(manager.segment_indices().unwrap().is_empty());
    assert_eq!(manager.current_size(), 0);

    manager.write(&[frame(1)]).unwrap();
    assert_eq!(read_ids(&manager), vec![1]);
}

#[test]
fn test_failed_sync_after_rotation_restores_previous_segment() {
    let dir = setup_temp_dir();
    let f = frame(1).len() as u64;
    let mut manager = open(dir.path(), SEGMENT_HEADER_SIZE as u64 + f + f / 2);
    let first = manager.write(&[frame(1)]).unwrap();

    manager.fail_next_syncs(1);
    assert!(manager.write(&[frame(2)]).is_err());

    assert_eq!(manager.segment_indices().unwrap(), vec![0]);
    assert_eq!(manager.current_index(), 0);
    assert_eq!(manager.current_size(), first.segment_size);

    let outcome = manager.write(&[frame(2)]).unwrap();
    assert_eq!(outcome.sealed, vec![(0, first.segment_size)]);
    assert_eq!(outcome.segment, 1);
    assert_eq!(read_ids(&manager), vec![1, 2]);
}

#[test]
fn test_list_segments_without_opening() {
    let dir = setup_temp_dir();
    let missing = dir.path().join("missing");
    assert!(WalLocalFileManager::list_segments(&missing).unwrap().is_empty());
    assert!(!missing.exists());

    let mut manager = open(dir.path(), 1 << 20);
    manager.write(&[frame(1)]).unwrap();
    assert_eq!(WalLocalFileManager::list_segments(dir.path()).unwrap(), vec![0]);
}
