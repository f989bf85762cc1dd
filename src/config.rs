//! Configuration for AtlasDB
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{AtlasError, Result};

/// Main configuration for an AtlasDB instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all local data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── wal_cache/       (local WAL segments: wal.log.<index>)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the current segment
    pub wal_sync_strategy: WalSyncStrategy,

    /// Segment size (bytes) past which the local writer rotates
    pub wal_max_segment_size: u64,

    /// Hard cap on a single serialized entry (bytes)
    pub wal_max_entry_size: usize,

    /// Snappy-compress segment bodies before pushing them remotely
    pub wal_compression: bool,

    /// Object-store key prefix for remote segments
    pub wal_remote_prefix: String,

    /// Buffer size for reading local segments
    pub wal_read_buffer_size: usize,

    /// Tolerate a torn entry at the tail of the last segment during replay
    pub wal_ignore_last_corrupted_entry: bool,

    /// First backoff delay after a failed push (milliseconds)
    pub wal_push_retry_initial_ms: u64,

    /// Upper bound on the push backoff delay (milliseconds)
    pub wal_push_retry_max_ms: u64,

    /// Attempts per remote segment read before replay fails
    pub wal_remote_read_attempts: u32,

    /// Interval of the background worker's periodic push pass (milliseconds)
    pub wal_flush_interval_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./atlasdb_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            wal_max_segment_size: 8 * 1024 * 1024, // 8 MB
            wal_max_entry_size: 64 * 1024 * 1024,  // 64 MB
            wal_compression: true,
            wal_remote_prefix: "wal/".to_string(),
            wal_read_buffer_size: 64 * 1024, // 64 KB
            wal_ignore_last_corrupted_entry: true,
            wal_push_retry_initial_ms: 100,
            wal_push_retry_max_ms: 10_000,
            wal_remote_read_attempts: 3,
            wal_flush_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding the local WAL segment cache
    pub fn wal_cache_dir(&self) -> PathBuf {
        self.data_dir.join("wal_cache")
    }

    /// Check the settings that would otherwise fail late
    pub fn validate(&self) -> Result<()> {
        if self.wal_max_segment_size == 0 {
            return Err(AtlasError::Config(
                "wal_max_segment_size must be positive".to_string(),
            ));
        }
        if (self.wal_max_entry_size as u64) < self.wal_max_segment_size {
            return Err(AtlasError::Config(format!(
                "wal_max_entry_size ({}) must not be below wal_max_segment_size ({})",
                self.wal_max_entry_size, self.wal_max_segment_size
            )));
        }
        if self.wal_remote_read_attempts == 0 {
            return Err(AtlasError::Config(
                "wal_remote_read_attempts must be at least 1".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(AtlasError::Config(
                "EveryNEntries sync count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all local storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn wal_max_segment_size(mut self, size: u64) -> Self {
        self.config.wal_max_segment_size = size;
        self
    }

    /// Set the per-entry size cap (in bytes)
    pub fn wal_max_entry_size(mut self, size: usize) -> Self {
        self.config.wal_max_entry_size = size;
        self
    }

    /// Enable or disable snappy compression of pushed segments
    pub fn wal_compression(mut self, enabled: bool) -> Self {
        self.config.wal_compression = enabled;
        self
    }

    /// Set the object-store key prefix
    pub fn wal_remote_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.wal_remote_prefix = prefix.into();
        self
    }

    /// Set the local segment read buffer size
    pub fn wal_read_buffer_size(mut self, size: usize) -> Self {
        self.config.wal_read_buffer_size = size;
        self
    }

    /// Tolerate (or not) a torn final entry during replay
    pub fn wal_ignore_last_corrupted_entry(mut self, ignore: bool) -> Self {
        self.config.wal_ignore_last_corrupted_entry = ignore;
        self
    }

    /// Set the push retry backoff bounds (in milliseconds)
    pub fn wal_push_retry_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.wal_push_retry_initial_ms = initial;
        self.config.wal_push_retry_max_ms = max;
        self
    }

    /// Set the number of attempts per remote segment read
    pub fn wal_remote_read_attempts(mut self, attempts: u32) -> Self {
        self.config.wal_remote_read_attempts = attempts;
        self
    }

    /// Set the background worker tick (in milliseconds)
    pub fn wal_flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.wal_flush_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
