//! Typed access to the local slot store.
//!
//! Reads never fail: an absent, unparsable or unreachable slot yields the
//! caller's default. Writes are best-effort; [`try_write_local`] reports the
//! failure for callers that need to know, [`write_local`] logs and swallows it.

/// In-memory local store implementation.
pub mod in_memory;
/// SQLite-backed local store implementation.
#[cfg(feature = "sqlite_local_store")]
pub mod sqlite_store;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::area::LocalStore;
use crate::errors::{Result, SyncError};

/// Reads the slot `key`, falling back to `default` if it is absent or cannot be parsed.
pub fn read_local<T: DeserializeOwned>(store: &dyn LocalStore, key: &str, default: T) -> T {
    let Some(raw) = store.get_item(key) else {
        return default;
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("Local slot '{}' is not valid for this dataset, using default: {}", key, e);
            default
        }
    }
}

pub fn try_write_local<T: Serialize + ?Sized>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store
        .set_item(key, &raw)
        .map_err(|e| SyncError::LocalUnavailable(format!("{:#}", e)))
}

/// Writes `value` to the slot `key`. Failures are logged and swallowed.
pub fn write_local<T: Serialize + ?Sized>(store: &dyn LocalStore, key: &str, value: &T) {
    if let Err(e) = try_write_local(store, key, value) {
        warn!("Failed to write local slot '{}': {}", key, e);
    }
}

/// Deletes the slot `key`; a missing slot is a no-op.
pub fn remove_local(store: &dyn LocalStore, key: &str) {
    if let Err(e) = store.remove_item(key) {
        warn!("Failed to remove local slot '{}': {:#}", key, e);
    }
}
