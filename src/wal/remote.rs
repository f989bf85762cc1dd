//! WAL Remote File Manager
//!
//! Mirrors local segments into an object store under a fixed prefix and
//! reads them back for replay.
//!
//! ## Responsibilities
//! - Push the confirmed prefix of a local segment, retrying with
//!   exponential backoff until it lands or the caller gives up
//! - Track which segment bytes are durable remotely (gates local GC)
//! - Stream remote entries through `WalEntryReader`
//! - Garbage-collect old remote segments, keeping a recovery floor

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use futures::executor::block_on;
use object_store::path::Path;
use object_store::ObjectStore;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{AtlasError, Result};

use super::reader::{SegmentSource, WalEntryReader};
use super::{
    encode_segment, parse_segment_index, segment_file_name, WalLocalFileManager,
    SEGMENT_HEADER_SIZE,
};

/// A local segment (or its confirmed prefix) to mirror remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSegmentInfo {
    pub dir: PathBuf,
    pub index: u64,
    /// Confirmed bytes to push, header included
    pub size: u64,
    /// True once the local writer has rotated past this segment
    pub sealed: bool,
}

/// Reads remote segments, retrying failed gets
pub struct RemoteSegmentSource {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    attempts: u32,
    retry_delay: Duration,
}

impl SegmentSource for RemoteSegmentSource {
    fn open_segment(&self, index: u64) -> Result<Box<dyn Read + Send>> {
        let key = segment_key(&self.prefix, index);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match get_object(self.store.as_ref(), &key) {
                Ok(Some(data)) => return Ok(Box::new(Cursor::new(data))),
                Ok(None) => {
                    return Err(AtlasError::corruption(format!(
                        "remote segment {} is missing",
                        key
                    )))
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(key = %key, attempt, "remote segment read failed, retrying: {}", e);
                    thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Manages the remote copy of the WAL
pub struct WalRemoteFileManager {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    prefix_path: Path,
    compression: bool,
    read_attempts: u32,
    retry_initial: Duration,
    retry_max: Duration,
    ignore_last_corrupted_entry: bool,
    /// Bytes of each segment confirmed durable remotely
    pushed: Mutex<BTreeMap<u64, u64>>,
    max_index: Mutex<Option<u64>>,
}

impl WalRemoteFileManager {
    /// Connect to the store and discover existing remote segments
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        compression: bool,
        read_attempts: u32,
        retry_initial: Duration,
        retry_max: Duration,
        ignore_last_corrupted_entry: bool,
    ) -> Result<Self> {
        let prefix = prefix.into();
        let manager = Self {
            store,
            prefix_path: Path::from(prefix.as_str()),
            prefix,
            compression,
            read_attempts: read_attempts.max(1),
            retry_initial,
            retry_max: retry_max.max(retry_initial),
            ignore_last_corrupted_entry,
            pushed: Mutex::new(BTreeMap::new()),
            max_index: Mutex::new(None),
        };
        let indices = manager.segment_indices()?;
        *manager.max_index.lock() = indices.last().copied();
        tracing::info!(
            prefix = %manager.prefix,
            segments = indices.len(),
            "opened remote WAL store"
        );
        Ok(manager)
    }

    /// Connect with the WAL settings of `config`
    pub fn open_with_config(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        Self::open(
            store,
            config.wal_remote_prefix.clone(),
            config.wal_compression,
            config.wal_remote_read_attempts,
            Duration::from_millis(config.wal_push_retry_initial_ms),
            Duration::from_millis(config.wal_push_retry_max_ms),
            config.wal_ignore_last_corrupted_entry,
        )
    }

    /// Push a segment, retrying failures.
    ///
    /// Between attempts `wait(delay)` is called; it returns `false` to stop
    /// retrying (termination), which yields `AtlasError::Terminated`.
    pub fn push<W>(&self, segment: &LocalSegmentInfo, mut wait: W) -> Result<()>
    where
        W: FnMut(Duration) -> bool,
    {
        if self.pushed_size(segment.index) >= Some(segment.size) {
            return Ok(());
        }
        if (segment.size as usize) < SEGMENT_HEADER_SIZE {
            return Err(AtlasError::WalWrite(format!(
                "segment {} has no header yet ({} bytes)",
                segment.index, segment.size
            )));
        }
        let body = WalLocalFileManager::read_segment_prefix(&segment.dir, segment.index, segment.size)?;
        let image = Bytes::from(encode_segment(&body[SEGMENT_HEADER_SIZE..], self.compression)?);

        let mut attempt: u32 = 0;
        loop {
            match self.push_once(segment.index, image.clone()) {
                Ok(()) => {
                    self.record_pushed(segment.index, segment.size);
                    tracing::debug!(
                        segment = segment.index,
                        size = segment.size,
                        stored = image.len(),
                        "pushed WAL segment"
                    );
                    return Ok(());
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        segment = segment.index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "push failed: {}",
                        e
                    );
                    if !wait(delay) {
                        return Err(AtlasError::Terminated);
                    }
                }
            }
        }
    }

    /// Upload one segment image without retrying
    pub fn push_once(&self, index: u64, image: Bytes) -> Result<()> {
        block_on(self.store.put(&self.key(index), image.into()))?;
        Ok(())
    }

    /// Lazily stream every remote entry from `from_index` on
    pub fn read_all(&self, from_index: u64) -> Result<WalEntryReader<RemoteSegmentSource>> {
        let indices: Vec<u64> = self
            .segment_indices()?
            .into_iter()
            .filter(|&i| i >= from_index)
            .collect();
        Ok(self.reader(indices, self.ignore_last_corrupted_entry))
    }

    /// Reader over an explicit list of remote segments
    pub fn reader(
        &self,
        indices: Vec<u64>,
        ignore_last_corrupted_entry: bool,
    ) -> WalEntryReader<RemoteSegmentSource> {
        let source = RemoteSegmentSource {
            store: Arc::clone(&self.store),
            prefix: self.prefix_path.clone(),
            attempts: self.read_attempts,
            retry_delay: self.retry_initial,
        };
        WalEntryReader::new(source, indices, ignore_last_corrupted_entry)
    }

    /// Remote segment indices, ascending
    pub fn segment_indices(&self) -> Result<Vec<u64>> {
        let prefix = Some(&self.prefix_path).filter(|p| p.parts().next().is_some());
        let listing = block_on(self.store.list_with_delimiter(prefix))?;
        let mut indices: Vec<u64> = listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename())
            .filter_map(parse_segment_index)
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    /// Delete remote segments strictly older than the newest segment at or
    /// below `before_index_inclusive`; that one stays as the recovery floor
    pub fn remove_wal_log_files(&self, before_index_inclusive: u64) -> Result<Vec<u64>> {
        let qualifying: Vec<u64> = self
            .segment_indices()?
            .into_iter()
            .filter(|&i| i <= before_index_inclusive)
            .collect();
        let floor = match qualifying.last() {
            Some(&floor) => floor,
            None => return Ok(Vec::new()),
        };

        let mut removed = Vec::new();
        for index in qualifying.into_iter().filter(|&i| i < floor) {
            delete_object(self.store.as_ref(), &self.key(index))?;
            self.pushed.lock().remove(&index);
            removed.push(index);
        }
        if !removed.is_empty() {
            tracing::info!(?removed, floor, "removed remote WAL segments");
        }
        Ok(removed)
    }

    /// Highest segment index known to exist remotely
    pub fn max_index(&self) -> Option<u64> {
        *self.max_index.lock()
    }

    /// Bytes of `index` confirmed pushed by this process
    pub fn pushed_size(&self, index: u64) -> Option<u64> {
        self.pushed.lock().get(&index).copied()
    }

    /// Is the first `size` bytes of `index` durable remotely?
    pub fn is_durable(&self, index: u64, size: u64) -> bool {
        self.pushed_size(index).map_or(false, |pushed| pushed >= size)
    }

    /// Configured torn-tail tolerance
    pub fn ignore_last_corrupted_entry(&self) -> bool {
        self.ignore_last_corrupted_entry
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn key(&self, index: u64) -> Path {
        segment_key(&self.prefix_path, index)
    }

    fn record_pushed(&self, index: u64, size: u64) {
        let mut pushed = self.pushed.lock();
        let entry = pushed.entry(index).or_insert(0);
        *entry = (*entry).max(size);
        drop(pushed);

        let mut max_index = self.max_index.lock();
        *max_index = Some(max_index.map_or(index, |m| m.max(index)));
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.retry_initial
            .checked_mul(factor)
            .unwrap_or(self.retry_max)
            .min(self.retry_max)
    }
}

/// `<prefix>/wal.log.<index>`
fn segment_key(prefix: &Path, index: u64) -> Path {
    prefix.child(segment_file_name(index))
}

fn get_object(store: &dyn ObjectStore, key: &Path) -> Result<Option<Bytes>> {
    let result = match block_on(store.get(key)) {
        Ok(result) => result,
        Err(object_store::Error::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(block_on(result.bytes())?))
}

fn delete_object(store: &dyn ObjectStore, key: &Path) -> Result<()> {
    match block_on(store.delete(key)) {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
