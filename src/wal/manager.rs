//! WAL Manager
//!
//! Orchestrates the local cache, the remote store and the reader.
//!
//! ## Concurrency Model
//!
//! - **append**: runs on the caller's thread. Id assignment and the local
//!   write happen under one mutex, so ids are gap-free and land in the log
//!   in order. It never touches the network.
//! - **push worker**: one background thread owning all remote I/O. It
//!   receives `Push`, `Flush` and `Terminate` messages over a channel,
//!   coalesces pushes per segment, and retries failures with backoff.
//! - **terminate**: the only cancellation primitive. It stops retries,
//!   makes one last attempt per pending segment, and releases every thread
//!   blocked in `flush`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::config::{Config, WalSyncStrategy};
use crate::error::{AtlasError, Result};

use super::reader::{LocalSegmentSource, WalEntryReader};
use super::recovery::{ReplayPin, WalReplay};
use super::remote::LocalSegmentInfo;
use super::{ObjectStore, WalEntry, WalLocalFileManager, WalRemoteFileManager};

/// Messages understood by the push worker
enum WorkerMessage {
    /// Mirror (at least) this much of a segment
    Push(LocalSegmentInfo),
    /// Reply once everything queued before this message is pushed
    Flush(Sender<Result<()>>),
    Terminate,
}

/// Append-side state, guarded by one mutex
struct AppendState {
    local: WalLocalFileManager,
    next_id: u64,
}

/// Write-ahead log shared by every table of a process
pub struct WalManager {
    state: Arc<Mutex<AppendState>>,
    remote: Arc<WalRemoteFileManager>,
    worker_tx: Sender<WorkerMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    terminated: AtomicBool,
    max_entry_size: usize,
    ignore_last_corrupted_entry: bool,
    /// Replays currently reading the local cache
    active_replays: Arc<AtomicUsize>,
    /// GC bound requested while a replay was open
    deferred_gc: Arc<Mutex<Option<u64>>>,
}

impl WalManager {
    /// Open the WAL: discover remote segments, repair and resume the local
    /// cache, and start the push worker.
    pub fn open(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;

        let remote = Arc::new(WalRemoteFileManager::open_with_config(config, store)?);

        let first_index = remote.max_index().map_or(0, |m| m + 1);
        let (local, recovery) = WalLocalFileManager::open(
            &config.wal_cache_dir(),
            config.wal_max_segment_size,
            config.wal_sync_strategy,
            config.wal_read_buffer_size,
            config.wal_ignore_last_corrupted_entry,
            first_index,
        )?;

        let last_id = match recovery.last_id {
            Some(id) => Some(id),
            None => find_last_id(&local, &remote)?,
        };
        let next_id = last_id.map_or(1, |id| id + 1);

        // every local segment still in the cache may be missing remotely
        let mut startup_pushes = Vec::new();
        for index in local.segment_indices()? {
            let size = if index == local.current_index() {
                local.current_size()
            } else {
                local.segment_size(index)?
            };
            if size > 0 {
                startup_pushes.push(LocalSegmentInfo {
                    dir: local.dir().to_path_buf(),
                    index,
                    size,
                    sealed: index < local.current_index(),
                });
            }
        }

        tracing::info!(
            next_id,
            current_segment = local.current_index(),
            remote_max = ?remote.max_index(),
            truncated_bytes = recovery.truncated_bytes,
            "opened WAL"
        );

        let state = Arc::new(Mutex::new(AppendState { local, next_id }));
        let (worker_tx, worker_rx) = channel::unbounded();
        let active_replays = Arc::new(AtomicUsize::new(0));
        let deferred_gc = Arc::new(Mutex::new(None));

        let worker = PushWorker {
            rx: worker_rx,
            remote: Arc::clone(&remote),
            state: Arc::clone(&state),
            active_replays: Arc::clone(&active_replays),
            deferred_gc: Arc::clone(&deferred_gc),
            pending: BTreeMap::new(),
            waiters: Vec::new(),
            in_flight: false,
            terminating: false,
            interval: Duration::from_millis(config.wal_flush_interval_ms.max(1)),
            periodic_sync: matches!(config.wal_sync_strategy, WalSyncStrategy::EveryNEntries { .. }),
        };
        let handle = thread::Builder::new()
            .name("atlasdb-wal-push".to_string())
            .spawn(move || worker.run())?;

        for info in startup_pushes {
            let _ = worker_tx.send(WorkerMessage::Push(info));
        }

        Ok(Self {
            state,
            remote,
            worker_tx,
            worker: Mutex::new(Some(handle)),
            terminated: AtomicBool::new(false),
            max_entry_size: config.wal_max_entry_size,
            ignore_last_corrupted_entry: config.wal_ignore_last_corrupted_entry,
            active_replays,
            deferred_gc,
        })
    }

    /// Append an entry and return its id.
    ///
    /// Returns once the entry is written to the local segment (synced per
    /// the sync strategy). The remote push happens in the background.
    pub fn append(&self, mut entry: WalEntry) -> Result<u64> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(AtlasError::Terminated);
        }

        let mut state = self.state.lock();
        let id = state.next_id;
        entry.id = id;

        let frame = entry.serialize()?;
        if frame.len() > self.max_entry_size {
            return Err(AtlasError::validation(format!(
                "WAL entry for table {} is {} bytes, above the {} byte limit",
                entry.table_name,
                frame.len(),
                self.max_entry_size
            )));
        }

        // a failed write leaves nothing on disk, so the id is not consumed
        let outcome = state.local.write(&[frame])?;
        state.next_id += 1;
        let dir = state.local.dir().to_path_buf();
        drop(state);

        tracing::debug!(
            id,
            table = %entry.table_name,
            records = entry.records.len(),
            segment = outcome.segment,
            "appended WAL entry"
        );

        for (index, size) in outcome.sealed {
            self.schedule(LocalSegmentInfo {
                dir: dir.clone(),
                index,
                size,
                sealed: true,
            });
        }
        self.schedule(LocalSegmentInfo {
            dir,
            index: outcome.segment,
            size: outcome.segment_size,
            sealed: false,
        });
        Ok(id)
    }

    /// Block until every entry appended so far has been pushed remotely
    pub fn flush(&self) -> Result<()> {
        self.state.lock().local.sync()?;

        let (tx, rx) = channel::bounded(1);
        self.worker_tx
            .send(WorkerMessage::Flush(tx))
            .map_err(|_| AtlasError::Terminated)?;
        rx.recv().map_err(|_| AtlasError::Terminated)?
    }

    /// Replay the whole WAL: remote segments older than the local cache,
    /// then the local cache
    pub fn read_all(&self) -> Result<WalReplay> {
        let state = self.state.lock();
        let pin = ReplayPin::new(&self.active_replays);
        let local_indices = state.local.segment_indices()?;
        let local_reader = state
            .local
            .reader(local_indices.clone(), self.ignore_last_corrupted_entry);
        let replay = stitch_replay(
            &self.remote,
            &local_indices,
            local_reader,
            self.ignore_last_corrupted_entry,
        )?;
        Ok(replay.pinned(pin))
    }

    /// Replay the WAL under `config` without opening it: no worker starts,
    /// torn tails are read past rather than truncated, and nothing is
    /// pushed or evicted
    pub fn read_only_replay(config: &Config, store: Arc<dyn ObjectStore>) -> Result<WalReplay> {
        let remote = WalRemoteFileManager::open_with_config(config, store)?;
        let dir = config.wal_cache_dir();
        let local_indices = WalLocalFileManager::list_segments(&dir)?;
        let local_reader = WalEntryReader::new(
            LocalSegmentSource::new(&dir, config.wal_read_buffer_size),
            local_indices.clone(),
            config.wal_ignore_last_corrupted_entry,
        );
        stitch_replay(
            &remote,
            &local_indices,
            local_reader,
            config.wal_ignore_last_corrupted_entry,
        )
    }

    /// Garbage-collect segments up to `before_index_inclusive`.
    ///
    /// Local segments go only once their remote copy is durable; the remote
    /// side keeps its newest qualifying segment as the recovery floor.
    /// While a replay is open nothing is deleted: the request is remembered
    /// and carried out by the push worker once the last replay is dropped.
    pub fn remove_wal_log_files(&self, before_index_inclusive: u64) -> Result<()> {
        let mut state = self.state.lock();
        if self.active_replays.load(Ordering::SeqCst) > 0 {
            let mut deferred = self.deferred_gc.lock();
            let bound = deferred.map_or(before_index_inclusive, |b| b.max(before_index_inclusive));
            *deferred = Some(bound);
            tracing::debug!(bound, "replay in progress, deferring WAL garbage collection");
            return Ok(());
        }
        collect_garbage(&mut state, &self.remote, before_index_inclusive)
    }

    /// Stop the push worker. Safe to call more than once.
    pub fn terminate(&self) -> Result<()> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.worker_tx.send(WorkerMessage::Terminate);

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("WAL push worker panicked");
            }
        }
        self.state.lock().local.sync()?;
        tracing::info!("WAL terminated");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and tooling)
    // =========================================================================

    /// Id of the last appended (or replayed) entry
    pub fn last_id(&self) -> Option<u64> {
        let next = self.state.lock().next_id;
        next.checked_sub(1).filter(|&id| id > 0)
    }

    /// Index of the segment appends currently go to
    pub fn current_segment(&self) -> u64 {
        self.state.lock().local.current_index()
    }

    /// Local segment indices, ascending
    pub fn local_segments(&self) -> Result<Vec<u64>> {
        self.state.lock().local.segment_indices()
    }

    pub fn remote(&self) -> &WalRemoteFileManager {
        &self.remote
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Make the next `n` local syncs fail (fault injection for tests)
    pub fn fail_next_local_syncs(&self, n: usize) {
        self.state.lock().local.fail_next_syncs(n);
    }

    fn schedule(&self, info: LocalSegmentInfo) {
        if self.worker_tx.send(WorkerMessage::Push(info)).is_err() {
            tracing::warn!("WAL push worker is gone; segment stays local only");
        }
    }
}

impl Drop for WalManager {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::error!("WAL terminate on drop failed: {}", e);
        }
    }
}

/// Remote segments older than the oldest local one, then the local cache.
/// A torn remote tail is only tolerated when there is no local cache.
fn stitch_replay(
    remote: &WalRemoteFileManager,
    local_indices: &[u64],
    local_reader: WalEntryReader<LocalSegmentSource>,
    ignore_last_corrupted_entry: bool,
) -> Result<WalReplay> {
    let remote_indices: Vec<u64> = remote
        .segment_indices()?
        .into_iter()
        .filter(|&i| local_indices.first().map_or(true, |&first| i < first))
        .collect();

    let remote_is_tail = local_indices.is_empty();
    let remote_count = remote_indices.len();
    let local_count = local_indices.len();
    let remote_reader = remote.reader(remote_indices, remote_is_tail && ignore_last_corrupted_entry);

    tracing::info!(
        remote_segments = remote_count,
        local_segments = local_count,
        "replaying WAL"
    );
    Ok(WalReplay::new(remote_reader, remote_count, local_reader, local_count))
}

/// Drop local segments already durable remotely, then remote segments below
/// the recovery floor. Callers hold the append lock and no replay is open.
fn collect_garbage(
    state: &mut AppendState,
    remote: &WalRemoteFileManager,
    before_index_inclusive: u64,
) -> Result<()> {
    if let Some(bound) = durable_local_bound(&state.local, remote)? {
        state.local.remove_wal_log_files(bound.min(before_index_inclusive))?;
    }
    remote.remove_wal_log_files(before_index_inclusive)?;
    Ok(())
}

/// Highest local index such that it and every sealed segment below it are
/// durable remotely
fn durable_local_bound(
    local: &WalLocalFileManager,
    remote: &WalRemoteFileManager,
) -> Result<Option<u64>> {
    let mut bound = None;
    for index in local.segment_indices()? {
        if index >= local.current_index() {
            break;
        }
        if !remote.is_durable(index, local.segment_size(index)?) {
            break;
        }
        bound = Some(index);
    }
    Ok(bound)
}

/// Newest entry id in the log, searching local then remote segments from
/// the newest down
fn find_last_id(local: &WalLocalFileManager, remote: &WalRemoteFileManager) -> Result<Option<u64>> {
    for index in local.segment_indices()?.into_iter().rev() {
        let mut last = None;
        for entry in local.reader(vec![index], true) {
            last = Some(entry?.id);
        }
        if last.is_some() {
            return Ok(last);
        }
    }
    for index in remote.segment_indices()?.into_iter().rev() {
        let mut last = None;
        for entry in remote.reader(vec![index], remote.ignore_last_corrupted_entry()) {
            last = Some(entry?.id);
        }
        if last.is_some() {
            return Ok(last);
        }
    }
    Ok(None)
}

// =============================================================================
// Push Worker
// =============================================================================

struct PushWorker {
    rx: Receiver<WorkerMessage>,
    remote: Arc<WalRemoteFileManager>,
    state: Arc<Mutex<AppendState>>,
    active_replays: Arc<AtomicUsize>,
    deferred_gc: Arc<Mutex<Option<u64>>>,
    /// Latest known extent of each segment waiting to be pushed
    pending: BTreeMap<u64, LocalSegmentInfo>,
    waiters: Vec<Sender<Result<()>>>,
    /// A push is running (its segment is out of `pending`)
    in_flight: bool,
    terminating: bool,
    interval: Duration,
    periodic_sync: bool,
}

impl PushWorker {
    fn run(mut self) {
        loop {
            if self.pending.is_empty() && !self.terminating {
                match self.rx.recv_timeout(self.interval) {
                    Ok(msg) => self.handle(msg),
                    Err(RecvTimeoutError::Timeout) => self.tick(),
                    Err(RecvTimeoutError::Disconnected) => self.terminating = true,
                }
            }
            self.drain();

            if self.terminating {
                self.shutdown();
                return;
            }

            self.push_next();
            self.release_waiters();
        }
    }

    fn handle(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Push(info) => {
                let slot = self.pending.entry(info.index).or_insert_with(|| info.clone());
                slot.size = slot.size.max(info.size);
                slot.sealed |= info.sealed;
            }
            WorkerMessage::Flush(reply) => {
                if self.pending.is_empty() && !self.in_flight {
                    let _ = reply.send(Ok(()));
                } else {
                    self.waiters.push(reply);
                }
            }
            WorkerMessage::Terminate => self.terminating = true,
        }
    }

    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.handle(msg),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.terminating = true;
                    return;
                }
            }
        }
    }

    /// Sleep for a backoff delay while still serving messages.
    /// Returns false once termination is requested.
    fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return !self.terminating;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(msg) => {
                    self.handle(msg);
                    if self.terminating {
                        return false;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return !self.terminating,
                Err(RecvTimeoutError::Disconnected) => {
                    self.terminating = true;
                    return false;
                }
            }
        }
    }

    fn push_next(&mut self) {
        let index = match self.pending.keys().next() {
            Some(&index) => index,
            None => return,
        };
        let info = match self.pending.remove(&index) {
            Some(info) => info,
            None => return,
        };

        let remote = Arc::clone(&self.remote);
        self.in_flight = true;
        let result = remote.push(&info, |delay| self.wait(delay));
        self.in_flight = false;
        match result {
            Ok(()) => {
                if info.sealed {
                    self.evict_local();
                }
            }
            Err(AtlasError::Terminated) => {
                self.requeue(info);
            }
            Err(e) => {
                // local read failures are not retried; the segment stays cached
                tracing::error!(segment = info.index, "cannot push WAL segment: {}", e);
            }
        }
    }

    fn requeue(&mut self, info: LocalSegmentInfo) {
        let slot = self.pending.entry(info.index).or_insert_with(|| info.clone());
        slot.size = slot.size.max(info.size);
        slot.sealed |= info.sealed;
    }

    /// Drop sealed local segments that are now durable remotely
    fn evict_local(&mut self) {
        let mut state = self.state.lock();
        if self.active_replays.load(Ordering::SeqCst) > 0 {
            return;
        }
        let result = match durable_local_bound(&state.local, &self.remote) {
            Ok(Some(bound)) => state.local.remove_wal_log_files(bound).map(|_| ()),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("local WAL eviction failed: {}", e);
        }
    }

    /// Run a garbage collection that was requested during a replay
    fn run_deferred_gc(&mut self) {
        let mut state = self.state.lock();
        if self.active_replays.load(Ordering::SeqCst) > 0 {
            return;
        }
        let bound = match self.deferred_gc.lock().take() {
            Some(bound) => bound,
            None => return,
        };
        tracing::debug!(bound, "running deferred WAL garbage collection");
        if let Err(e) = collect_garbage(&mut state, &self.remote, bound) {
            tracing::warn!(bound, "deferred WAL garbage collection failed: {}", e);
        }
    }

    /// Periodic pass: sync the local segment and make sure its latest
    /// extent is queued
    fn tick(&mut self) {
        self.run_deferred_gc();
        self.evict_local();
        let info = {
            let mut state = self.state.lock();
            if self.periodic_sync {
                if let Err(e) = state.local.sync() {
                    tracing::warn!("periodic WAL sync failed: {}", e);
                }
            }
            let index = state.local.current_index();
            let size = state.local.current_size();
            if size == 0 || self.remote.is_durable(index, size) {
                return;
            }
            LocalSegmentInfo {
                dir: state.local.dir().to_path_buf(),
                index,
                size,
                sealed: false,
            }
        };
        self.requeue(info);
    }

    fn release_waiters(&mut self) {
        if self.pending.is_empty() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// One last attempt per pending segment, then release everyone
    fn shutdown(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let mut failed = 0usize;
        for info in pending.values() {
            if let Err(e) = self.remote.push(info, |_| false) {
                failed += 1;
                tracing::error!(
                    segment = info.index,
                    "giving up on WAL push at shutdown (segment stays cached locally): {}",
                    e
                );
            }
        }
        for waiter in self.waiters.drain(..) {
            let reply = if failed == 0 {
                Ok(())
            } else {
                Err(AtlasError::Terminated)
            };
            let _ = waiter.send(reply);
        }
        tracing::debug!(failed, "WAL push worker stopped");
    }
}
