//! Object store plumbing for remote segments
//!
//! Remote segments live in any `object_store::ObjectStore`. The WAL is
//! synchronous, so calls are driven with `futures::executor::block_on`;
//! `LocalFileSystem` and `InMemory` both complete inline without a runtime.
//!
//! - `local_object_store`: a directory (e.g. a mounted durable volume)
//! - `MemoryObjectStore`: `InMemory` with failure injection for tests

use std::fmt;
use std::fs;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::executor::block_on;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult,
};

use crate::error::{AtlasError, Result};

/// Object store rooted at a directory; `/` in keys maps to subdirectories
pub fn local_object_store(root: &FsPath) -> Result<LocalFileSystem> {
    fs::create_dir_all(root)
        .map_err(|e| AtlasError::Remote(format!("create root {}: {}", root.display(), e)))?;
    Ok(LocalFileSystem::new_with_prefix(root)?)
}

impl From<object_store::Error> for AtlasError {
    fn from(e: object_store::Error) -> Self {
        AtlasError::Remote(e.to_string())
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// `InMemory` that can be told to fail upcoming puts and gets
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: InMemory,
    failing_puts: AtomicUsize,
    failing_gets: AtomicUsize,
    put_attempts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts fail
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` gets fail
    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Total puts attempted, failed ones included
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Every stored key, in lexical order
    pub fn keys(&self) -> Vec<String> {
        let listed: object_store::Result<Vec<ObjectMeta>> =
            block_on(self.inner.list(None).try_collect());
        let mut keys: Vec<String> = listed
            .unwrap_or_default()
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort();
        keys
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected(op: &str, location: &Path) -> object_store::Error {
        object_store::Error::Generic {
            store: "MemoryObjectStore",
            source: format!("injected {} failure for {}", op, location).into(),
        }
    }
}

impl fmt::Display for MemoryObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryObjectStore")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_puts) {
            return Err(Self::injected("put", location));
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        if Self::take_failure(&self.failing_gets) {
            return Err(Self::injected("get", location));
        }
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}
