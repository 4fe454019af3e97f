use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::errors::{Result, SyncError};
use crate::storage::area::CloudStore;
use crate::storage::types::{CloudDocument, DocumentPath};

/// In-memory document store with switchable failures.
///
/// Stands in for the cloud service in tests and offline demos.
#[derive(Default)]
pub struct InMemoryCloudStore {
    docs: RwLock<HashMap<String, CloudDocument>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryCloudStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent read fail with a transport error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail with a permission error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current document at `path`, bypassing failure injection.
    pub fn document(&self, path: &DocumentPath) -> Option<CloudDocument> {
        self.docs.read().ok()?.get(&path.to_string()).cloned()
    }

    /// Seeds a document directly, bypassing failure injection.
    pub fn insert(&self, path: &DocumentPath, doc: CloudDocument) {
        if let Ok(mut docs) = self.docs.write() {
            docs.insert(path.to_string(), doc);
        }
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CloudStore for InMemoryCloudStore {
    fn get_document<'a>(&'a self, path: &'a DocumentPath) -> BoxFuture<'a, Result<Option<CloudDocument>>> {
        async move {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(SyncError::Cloud(format!("unavailable: {}", path)));
            }
            let docs = self
                .docs
                .read()
                .map_err(|_| SyncError::Cloud("document map poisoned".into()))?;
            Ok(docs.get(&path.to_string()).cloned())
        }
        .boxed()
    }

    fn set_document<'a>(&'a self, path: &'a DocumentPath, doc: CloudDocument) -> BoxFuture<'a, Result<()>> {
        async move {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(SyncError::Cloud(format!("permission denied: {}", path)));
            }
            self.docs
                .write()
                .map_err(|_| SyncError::Cloud("document map poisoned".into()))?
                .insert(path.to_string(), doc);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}
