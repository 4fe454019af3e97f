use super::types::{CloudDocument, DocumentPath};
use crate::errors::Result as SyncResult;
use anyhow::Result;
use futures::future::BoxFuture;

/// Object-safe, synchronous key/value slot store (the browser's localStorage).
///
/// One process-wide namespace: every dataset owns exactly one slot, named by
/// [`DatasetKey::local_key`](crate::DatasetKey::local_key).
pub trait LocalStore: Send + Sync {
    /// Retrieves the raw value stored under `key`, or `None` if not found or unreadable.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Sets the value for the given key, overwriting any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the item with the given key. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Clears all items in the store.
    fn clear(&self) -> Result<()>;

    /// Returns the number of items in the store.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all keys in the store, sorted.
    fn keys(&self) -> Vec<String>;
}

/// Object-safe, asynchronous per-user document store.
///
/// Documents are addressed by [`DocumentPath`] and always replaced whole.
pub trait CloudStore: Send + Sync {
    /// Fetches the document at `path`. `Ok(None)` means it does not exist.
    fn get_document<'a>(&'a self, path: &'a DocumentPath) -> BoxFuture<'a, SyncResult<Option<CloudDocument>>>;

    /// Writes `doc` at `path`, fully overwriting prior content.
    fn set_document<'a>(&'a self, path: &'a DocumentPath, doc: CloudDocument) -> BoxFuture<'a, SyncResult<()>>;
}
