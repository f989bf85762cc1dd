//! WAL Recovery
//!
//! Stitches remote and local segments into one replay stream.
//!
//! Remote segments older than the oldest local segment come first, then the
//! local cache. Entries already seen (a segment present in both places) are
//! skipped; a hole in the id sequence aborts the replay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{AtlasError, Result};

use super::reader::{LocalSegmentSource, WalEntryReader};
use super::remote::RemoteSegmentSource;
use super::WalEntry;

/// Result of a replay, filled in as the stream is consumed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries handed out
    pub entries_recovered: u64,

    /// Entries dropped because their id was already replayed
    pub entries_skipped: u64,

    /// Last id handed out
    pub last_id: Option<u64>,

    /// Segments read from the object store
    pub remote_segments: usize,

    /// Segments read from the local cache
    pub local_segments: usize,

    /// Whether a torn tail was tolerated
    pub was_truncated: bool,
}

/// Keeps local segments from being evicted while a replay is reading them
pub(crate) struct ReplayPin(Arc<AtomicUsize>);

impl ReplayPin {
    pub(crate) fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ReplayPin {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One logical, gap-free, increasing-id entry stream
pub struct WalReplay {
    remote: Option<WalEntryReader<RemoteSegmentSource>>,
    local: Option<WalEntryReader<LocalSegmentSource>>,
    result: RecoveryResult,
    failed: bool,
    pin: Option<ReplayPin>,
}

impl WalReplay {
    pub fn new(
        remote: WalEntryReader<RemoteSegmentSource>,
        remote_segments: usize,
        local: WalEntryReader<LocalSegmentSource>,
        local_segments: usize,
    ) -> Self {
        Self {
            remote: Some(remote),
            local: Some(local),
            result: RecoveryResult {
                remote_segments,
                local_segments,
                ..RecoveryResult::default()
            },
            failed: false,
            pin: None,
        }
    }

    pub(crate) fn pinned(mut self, pin: ReplayPin) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Replay statistics so far (complete once the stream is exhausted)
    pub fn result(&self) -> &RecoveryResult {
        &self.result
    }

    fn next_raw(&mut self) -> Option<Result<WalEntry>> {
        if let Some(remote) = self.remote.as_mut() {
            match remote.next() {
                Some(item) => return Some(item),
                None => {
                    self.result.was_truncated |= remote.torn_tail().is_some();
                    self.remote = None;
                }
            }
        }
        if let Some(local) = self.local.as_mut() {
            match local.next() {
                Some(item) => return Some(item),
                None => {
                    self.result.was_truncated |= local.torn_tail().is_some();
                    self.local = None;
                    self.pin = None;
                }
            }
        }
        None
    }
}

impl Iterator for WalReplay {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let entry = match self.next_raw()? {
                Ok(entry) => entry,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            if let Some(last) = self.result.last_id {
                if entry.id <= last {
                    self.result.entries_skipped += 1;
                    continue;
                }
                if entry.id != last + 1 {
                    self.failed = true;
                    return Some(Err(AtlasError::corruption(format!(
                        "WAL id gap: entry {} follows {}",
                        entry.id, last
                    ))));
                }
            }

            self.result.last_id = Some(entry.id);
            self.result.entries_recovered += 1;
            return Some(Ok(entry));
        }
    }
}
