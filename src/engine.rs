//! Engine Module
//!
//! The datastore façade that coordinates the WAL and the tables.
//!
//! ## Responsibilities
//! - Own the single WAL shared by every table
//! - Create tables on first reference
//! - Replay the WAL on startup, regrouping entries by table
//! - Route update/query/scan calls

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::memtable::{MemoryTable, QueryRequest, RecordResult, ScanRequest};
use crate::schema::TableSchemaDesc;
use crate::wal::{local_object_store, ObjectStore, RecoveryResult, WalManager};

/// The main datastore
///
/// ## Concurrency Model
///
/// - **Tables**: each `MemoryTable` serializes its own mutations and lets
///   queries run in parallel. Different tables never block each other
///   except on the WAL append lock.
/// - **WAL**: one instance, one global id sequence. Appends are local-disk
///   only; remote pushes run on the WAL's worker thread.
pub struct DataStore {
    config: Config,

    /// Write-ahead log shared by all tables
    wal: Arc<WalManager>,

    /// Table registry (created on first reference)
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,

    /// Statistics of the startup replay
    recovery: RecoveryResult,
}

impl DataStore {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const REMOTE_DIR: &'static str = "remote";

    /// Open a datastore over `store`
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Open the WAL (repairs the local cache, starts the push worker)
    /// 3. Replay every entry into its table
    /// 4. Ready to serve requests
    pub fn open(config: Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let wal = Arc::new(WalManager::open(&config, store)?);

        let mut tables: HashMap<String, Arc<MemoryTable>> = HashMap::new();
        let mut replay = wal.read_all()?;
        for entry in replay.by_ref() {
            let entry = entry?;
            let name = entry.table_name.clone();
            let table = tables
                .entry(name.clone())
                .or_insert_with(|| Arc::new(MemoryTable::new(name, Arc::clone(&wal))));
            table.apply_replayed(entry)?;
        }
        let recovery = replay.result().clone();
        drop(replay);

        tracing::info!(
            tables = tables.len(),
            entries = recovery.entries_recovered,
            skipped = recovery.entries_skipped,
            last_id = ?recovery.last_id,
            truncated = recovery.was_truncated,
            "datastore recovered"
        );

        Ok(Self {
            config,
            wal,
            tables: RwLock::new(tables),
            recovery,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory, mirroring
    /// segments into `{path}/remote`
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        let store = Arc::new(local_object_store(&path.join(Self::REMOTE_DIR))?);
        Self::open(config, store)
    }

    /// Table by name, created empty on first reference
    pub fn table(&self, name: &str) -> Result<Arc<MemoryTable>> {
        if name.is_empty() {
            return Err(AtlasError::validation("table name must not be empty"));
        }
        if let Some(table) = self.tables.read().get(name) {
            return Ok(Arc::clone(table));
        }
        let mut tables = self.tables.write();
        let table = tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryTable::new(name, Arc::clone(&self.wal))));
        Ok(Arc::clone(table))
    }

    /// Existing table, without creating one
    pub fn get_table(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables.read().get(name).cloned()
    }

    /// Apply an update to `table`; returns the WAL id if anything changed
    pub fn update(
        &self,
        table: &str,
        schema: Option<&TableSchemaDesc>,
        records: &[JsonMap<String, JsonValue>],
    ) -> Result<Option<u64>> {
        self.table(table)?.update(schema, records)
    }

    /// Query `table`; an unknown table has no rows
    pub fn query(&self, table: &str, request: &QueryRequest) -> Result<Vec<RecordResult>> {
        match self.get_table(table) {
            Some(t) => t.query(request),
            None => Ok(Vec::new()),
        }
    }

    /// Scan `table`; an unknown table has no rows
    pub fn scan(&self, table: &str, request: &ScanRequest) -> Result<Vec<RecordResult>> {
        match self.get_table(table) {
            Some(t) => t.scan(request),
            None => Ok(Vec::new()),
        }
    }

    /// Block until every update so far is mirrored remotely
    pub fn flush(&self) -> Result<()> {
        self.wal.flush()
    }

    /// Stop background work; must be called on shutdown
    pub fn terminate(&self) -> Result<()> {
        self.wal.terminate()
    }

    /// Table names, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    /// Statistics of the replay performed by `open`
    pub fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }
}
