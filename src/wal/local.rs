//! WAL Local File Manager
//!
//! Owns the on-disk segment cache. Segments are plain (uncompressed) so the
//! current one can keep growing; compression happens on push.
//!
//! The recorded `current_size` is the single source of truth for how much
//! of the current segment is valid. A failed write (sync included) rolls
//! the cache back to where the call began, so the next attempt retries from
//! a clean boundary and no entry id is left behind on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{AtlasError, Result};

use super::reader::{LocalSegmentSource, WalEntryReader};
use super::{parse_segment_index, segment_header, segment_path, SEGMENT_HEADER_SIZE};

/// What a `write` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Entries appended to the segment that was current when the call began
    pub written_before_rotation: usize,
    /// Entries that landed in segments opened by rotation
    pub written_after_rotation: usize,
    /// Segments sealed (rotated away from) by this call as (index, size),
    /// oldest first
    pub sealed: Vec<(u64, u64)>,
    /// Current segment after the write
    pub segment: u64,
    /// Valid size of the current segment after the write
    pub segment_size: u64,
}

/// State recovered from the cache directory on open
#[derive(Debug, Clone, Default)]
pub struct LocalRecovery {
    /// Highest entry id found in the newest local segment
    pub last_id: Option<u64>,
    /// Bytes cut off a torn tail, if any
    pub truncated_bytes: u64,
}

/// Manages the local segment cache directory
pub struct WalLocalFileManager {
    dir: PathBuf,
    max_segment_size: u64,
    sync_strategy: WalSyncStrategy,
    read_buffer_size: usize,
    /// Index of the current segment (its file may not exist yet)
    current_index: u64,
    /// Valid bytes in the current segment, 0 if not created yet
    current_size: u64,
    file: Option<File>,
    unsynced_entries: usize,
    /// A rollback could not be completed; refuse further writes
    poisoned: bool,
    /// Upcoming syncs to fail (fault injection)
    failing_syncs: usize,
}

impl WalLocalFileManager {
    /// Open the cache directory.
    ///
    /// Resumes the newest local segment after repairing a torn tail, or
    /// starts at `first_index` when the cache is empty.
    pub fn open(
        dir: &Path,
        max_segment_size: u64,
        sync_strategy: WalSyncStrategy,
        read_buffer_size: usize,
        ignore_last_corrupted_entry: bool,
        first_index: u64,
    ) -> Result<(Self, LocalRecovery)> {
        fs::create_dir_all(dir)?;

        let mut manager = Self {
            dir: dir.to_path_buf(),
            max_segment_size,
            sync_strategy,
            read_buffer_size,
            current_index: first_index,
            current_size: 0,
            file: None,
            unsynced_entries: 0,
            poisoned: false,
            failing_syncs: 0,
        };

        let indices = manager.segment_indices()?;
        let mut recovery = LocalRecovery::default();

        if let Some(&last) = indices.last() {
            let source = LocalSegmentSource::new(dir, read_buffer_size);
            let mut reader = WalEntryReader::new(source, vec![last], ignore_last_corrupted_entry);
            for entry in reader.by_ref() {
                recovery.last_id = Some(entry?.id);
            }

            let path = segment_path(dir, last);
            let file_len = fs::metadata(&path)?.len();
            let valid_len = match reader.torn_tail() {
                Some(tail) => {
                    tracing::warn!(
                        segment = last,
                        valid_len = tail.valid_len,
                        file_len,
                        "truncating torn tail of local segment"
                    );
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(tail.valid_len)?;
                    file.sync_all()?;
                    recovery.truncated_bytes = file_len - tail.valid_len;
                    tail.valid_len
                }
                None => file_len,
            };

            manager.current_index = last.max(first_index);
            if manager.current_index == last {
                manager.current_size = valid_len;
            }
        }

        tracing::info!(
            dir = %dir.display(),
            segments = indices.len(),
            current = manager.current_index,
            "opened local WAL cache"
        );
        Ok((manager, recovery))
    }

    /// Append serialized frames, rotating when the next frame would push
    /// the current segment past the size limit.
    ///
    /// All or nothing: on any failure the cache is rolled back to the
    /// segment and size it had when the call began.
    pub fn write(&mut self, frames: &[Vec<u8>]) -> Result<WriteOutcome> {
        if self.poisoned {
            return Err(AtlasError::WalWrite(format!(
                "segment {} has an unrepaired tail; reopen the WAL",
                self.current_index
            )));
        }

        let start = (self.current_index, self.current_size, self.unsynced_entries);
        match self.write_frames(frames) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.rollback(start.0, start.1);
                self.unsynced_entries = start.2;
                Err(e)
            }
        }
    }

    /// Make the next `n` syncs fail (fault injection for tests)
    pub fn fail_next_syncs(&mut self, n: usize) {
        self.failing_syncs = n;
    }

    /// Force sync of the current segment to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.failing_syncs > 0 {
            self.failing_syncs -= 1;
            return Err(AtlasError::WalWrite(format!(
                "injected sync failure on segment {}",
                self.current_index
            )));
        }
        if let Some(file) = self.file.as_mut() {
            file.sync_data()?;
        }
        self.unsynced_entries = 0;
        Ok(())
    }

    /// Existing segment indices, ascending
    pub fn segment_indices(&self) -> Result<Vec<u64>> {
        Self::list_segments(&self.dir)
    }

    /// Segment indices in a cache directory, without opening it (a missing
    /// directory has none)
    pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut indices = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                if let Some(index) = parse_segment_index(&entry.file_name().to_string_lossy()) {
                    indices.push(index);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Delete local segments up to `before_index_inclusive`, never touching
    /// the current segment. Returns the deleted indices.
    pub fn remove_wal_log_files(&mut self, before_index_inclusive: u64) -> Result<Vec<u64>> {
        let mut removed = Vec::new();
        for index in self.segment_indices()? {
            if index > before_index_inclusive || index >= self.current_index {
                continue;
            }
            fs::remove_file(segment_path(&self.dir, index))?;
            removed.push(index);
        }
        if !removed.is_empty() {
            tracing::info!(?removed, "removed local WAL segments");
        }
        Ok(removed)
    }

    /// Reader over local segments
    pub fn reader(
        &self,
        indices: Vec<u64>,
        ignore_last_corrupted_entry: bool,
    ) -> WalEntryReader<LocalSegmentSource> {
        let source = LocalSegmentSource::new(&self.dir, self.read_buffer_size);
        WalEntryReader::new(source, indices, ignore_last_corrupted_entry)
    }

    /// Size on disk of a local segment
    pub fn segment_size(&self, index: u64) -> Result<u64> {
        Ok(fs::metadata(segment_path(&self.dir, index))?.len())
    }

    pub fn current_index(&self) -> u64 {
        self.current_index
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the first `len` bytes of a segment (what has been confirmed
    /// written). Segments are append-only, so no lock is needed.
    pub fn read_segment_prefix(dir: &Path, index: u64, len: u64) -> Result<Vec<u8>> {
        let file = File::open(segment_path(dir, index))?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf)?;
        if (buf.len() as u64) < len {
            return Err(AtlasError::WalWrite(format!(
                "segment {} holds {} bytes, expected at least {}",
                index,
                buf.len(),
                len
            )));
        }
        Ok(buf)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn projected_size(&self, pending: usize) -> u64 {
        let header = if self.current_size == 0 && pending == 0 {
            SEGMENT_HEADER_SIZE as u64
        } else {
            0
        };
        self.current_size + pending as u64 + header
    }

    fn count(&self, outcome: &mut WriteOutcome, entries: usize, rotated: bool) {
        if rotated {
            outcome.written_after_rotation += entries;
        } else {
            outcome.written_before_rotation += entries;
        }
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        self.unsynced_entries = 0;
        self.current_index += 1;
        self.current_size = 0;
        tracing::info!(segment = self.current_index, "rotated to new WAL segment");
        Ok(())
    }

    fn write_frames(&mut self, frames: &[Vec<u8>]) -> Result<WriteOutcome> {
        let mut outcome = WriteOutcome::default();
        let mut batch: Vec<u8> = Vec::new();
        let mut batch_entries = 0usize;
        let mut rotated = false;

        for frame in frames {
            let projected = self.projected_size(batch.len()) + frame.len() as u64;
            let segment_started = self.current_size > 0 || !batch.is_empty();
            if segment_started && projected > self.max_segment_size {
                self.append_batch(&batch)?;
                self.count(&mut outcome, batch_entries, rotated);
                batch.clear();
                batch_entries = 0;

                outcome.sealed.push((self.current_index, self.current_size));
                self.rotate()?;
                rotated = true;
            }
            if self.current_size == 0 && batch.is_empty() {
                batch.extend_from_slice(&segment_header(false));
            }
            batch.extend_from_slice(frame);
            batch_entries += 1;
        }

        self.append_batch(&batch)?;
        self.count(&mut outcome, batch_entries, rotated);
        self.maybe_sync(frames.len())?;

        outcome.segment = self.current_index;
        outcome.segment_size = self.current_size;
        Ok(outcome)
    }

    fn append_batch(&mut self, batch: &[u8]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let path = segment_path(&self.dir, self.current_index);

        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| AtlasError::WalWrite(format!("cannot open {}: {}", path.display(), e)))?;
            self.file = Some(file);
        }

        let index = self.current_index;
        if let Some(file) = self.file.as_mut() {
            file.write_all(batch).map_err(|e| {
                AtlasError::WalWrite(format!("append to segment {} failed: {}", index, e))
            })?;
        }

        self.current_size += batch.len() as u64;
        Ok(())
    }

    /// Undo a failed write: drop segments it created and cut `index` back
    /// to `size` (removing it when empty)
    fn rollback(&mut self, index: u64, size: u64) {
        self.file = None;
        let mut clean = true;

        for created in (index + 1)..=self.current_index {
            let path = segment_path(&self.dir, created);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), "cannot remove segment after failed write: {}", e);
                    clean = false;
                }
            }
        }

        let path = segment_path(&self.dir, index);
        let result = if size == 0 {
            match fs::remove_file(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        } else {
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_len(size).and_then(|_| file.sync_all()))
        };
        if let Err(e) = result {
            tracing::error!(path = %path.display(), size, "cannot roll back segment after failed write: {}", e);
            clean = false;
        }

        self.current_index = index;
        self.current_size = size;
        if !clean {
            self.poisoned = true;
        }
        tracing::warn!(segment = index, size, "rolled back failed WAL write");
    }

    fn maybe_sync(&mut self, entries: usize) -> Result<()> {
        self.unsynced_entries += entries;
        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced_entries >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }
}
