//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging, with a local
//! segment cache mirrored to a remote object store.
//!
//! ## Responsibilities
//! - Append entries before any in-memory mutation
//! - Global, gap-free entry ids
//! - Size-based segment rotation, snappy compression on push
//! - CRC32 checksums for corruption detection
//! - Replay (remote segments, then local) with torn-tail tolerance
//!
//! ## Segment Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header: Magic "AWAL" (4) | Compressed (1)    │
//! ├──────────────────────────────────────────────┤
//! │ Body (plain, or one snappy raw block)        │
//! │ ┌─────────┬─────────┬──────────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ bincode(WalEntry)    │ │
//! │ └─────────┴─────────┴──────────────────────┘ │
//! │ ... repeated for each entry ...              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Local files are `wal.log.<index>`; remote objects are
//! `<prefix>/wal.log.<index>` with the same layout.

mod entry;
mod local;
mod manager;
mod reader;
mod recovery;
mod remote;
mod store;

use std::path::{Path, PathBuf};

pub use crate::types::WireValue;
pub use entry::{
    compute_crc, decompress_body, encode_segment, parse_segment_header, segment_header,
    WalEntry, WireColumn, WireRecord, FLAG_PLAIN, FLAG_SNAPPY, HEADER_SIZE, SEGMENT_HEADER_SIZE,
    SEGMENT_MAGIC,
};
pub use local::{LocalRecovery, WalLocalFileManager, WriteOutcome};
pub use manager::WalManager;
pub use object_store::ObjectStore;
pub use reader::{LocalSegmentSource, SegmentSource, TornTail, WalEntryReader};
pub use recovery::{RecoveryResult, WalReplay};
pub use remote::{LocalSegmentInfo, RemoteSegmentSource, WalRemoteFileManager};
pub use store::{local_object_store, MemoryObjectStore};

/// File name prefix shared by local files and remote keys
pub const SEGMENT_FILE_PREFIX: &str = "wal.log.";

/// `wal.log.<index>`
pub fn segment_file_name(index: u64) -> String {
    format!("{}{}", SEGMENT_FILE_PREFIX, index)
}

/// Path of segment `index` inside a cache directory
pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(segment_file_name(index))
}

/// Parse the index out of a segment file name
/// "wal.log.42" → Some(42)
pub fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_FILE_PREFIX)?.parse().ok()
}
