//! Local → cloud migration on login.
//!
//! When an anonymous user signs in, every syncable dataset that accumulated
//! records locally is merged into the user's cloud document and the local slot
//! is cleared. Records are matched by their `id` field; when both sides carry
//! the same id, the cloud version is kept untouched and the local one dropped.
//!
//! Each dataset is migrated independently: a failure is logged and recorded in
//! the [`MigrationReport`], and the remaining datasets are still processed.
//! Datasets already migrated are not rolled back.
use std::collections::HashSet;
use log::{info, warn};
use serde_json::Value as JsonValue;

use crate::dataset::DatasetKey;
use crate::errors::{Result, SyncError};
use crate::identity::UserId;
use crate::storage::{remove_local, try_read_cloud, write_cloud, CloudStore, LocalStore};

/// Result of merging local records into an existing cloud array.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub records: Vec<JsonValue>,
    /// Local records appended after the existing cloud records
    pub appended: usize,
    /// Local records dropped because their id was already present
    pub dropped: usize,
}

/// Appends every local record whose id is not yet present to `existing`.
///
/// Existing records keep their order and content. Records without an
/// identity (see [`record_identity`]) are never appended.
pub fn merge_by_id(existing: Vec<JsonValue>, local: Vec<JsonValue>) -> MergeOutcome {
    let mut seen: HashSet<String> = existing.iter().filter_map(record_identity).collect();

    let mut records = existing;
    let mut appended = 0;
    let mut dropped = 0;

    for record in local {
        match record_identity(&record) {
            Some(id) if !seen.contains(&id) => {
                seen.insert(id);
                records.push(record);
                appended += 1;
            }
            _ => dropped += 1,
        }
    }

    MergeOutcome { records, appended, dropped }
}

/// Identity used to match records across the two stores.
///
/// Objects are identified by their string `id` field. Scalar records
/// (strings, numbers, booleans) are identified by their JSON text, so
/// `["itemA"]` merges like `[{"id": "itemA"}]`. Objects without a string
/// `id`, nested arrays and `null` have no identity.
pub fn record_identity(record: &JsonValue) -> Option<String> {
    match record {
        JsonValue::Object(map) => map.get("id")?.as_str().map(|id| format!("id:{}", id)),
        JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
            Some(format!("value:{}", record))
        }
        JsonValue::Array(_) | JsonValue::Null => None,
    }
}

/// Why a dataset was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing stored locally, or an empty array
    Empty,
    /// The local value is not an array of records with string ids
    NotRecords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedDataset {
    pub key: DatasetKey,
    pub appended: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: Vec<MigratedDataset>,
    pub skipped: Vec<(DatasetKey, SkipReason)>,
    pub failed: Vec<(DatasetKey, String)>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.migrated.is_empty() && self.failed.is_empty()
    }
}

enum LocalRecords {
    Empty,
    Records(Vec<JsonValue>),
}

fn read_local_records(local: &dyn LocalStore, key: DatasetKey) -> Result<LocalRecords> {
    let Some(raw) = local.get_item(key.local_key()) else {
        return Ok(LocalRecords::Empty);
    };

    let value: JsonValue = serde_json::from_str(&raw).map_err(|e| SyncError::InvalidRecords {
        key,
        reason: format!("unparsable local value: {}", e),
    })?;

    let JsonValue::Array(records) = value else {
        return Err(SyncError::InvalidRecords { key, reason: "local value is not an array".into() });
    };
    if records.is_empty() {
        return Ok(LocalRecords::Empty);
    }
    if let Some(pos) = records.iter().position(|r| record_identity(r).is_none()) {
        return Err(SyncError::InvalidRecords {
            key,
            reason: format!("record {} is not a scalar or an object with a string id", pos),
        });
    }

    Ok(LocalRecords::Records(records))
}

async fn migrate_dataset(
    local: &dyn LocalStore,
    cloud: &dyn CloudStore,
    user: &UserId,
    key: DatasetKey,
    records: Vec<JsonValue>,
) -> Result<MigratedDataset> {
    let Some(collection) = key.collection() else {
        return Err(SyncError::InvalidRecords { key, reason: "dataset is not cloud-syncable".into() });
    };

    // Strict read: an unreachable document fails this dataset, it never merges into `[]`
    let existing: Vec<JsonValue> = try_read_cloud(cloud, user, collection)
        .await?
        .unwrap_or_default();

    let outcome = merge_by_id(existing, records);
    write_cloud(cloud, user, collection, &outcome.records).await?;
    remove_local(local, key.local_key());

    Ok(MigratedDataset {
        key,
        appended: outcome.appended,
        dropped: outcome.dropped,
    })
}

/// Merges every syncable local dataset into `user`'s cloud store.
pub async fn migrate_local_to_cloud(
    local: &dyn LocalStore,
    cloud: &dyn CloudStore,
    user: &UserId,
) -> MigrationReport {
    let mut report = MigrationReport::default();

    for key in DatasetKey::syncable() {
        let records = match read_local_records(local, key) {
            Ok(LocalRecords::Empty) => {
                report.skipped.push((key, SkipReason::Empty));
                continue;
            }
            Ok(LocalRecords::Records(records)) => records,
            Err(e) => {
                warn!("Migration[{}]: skipping {}: {}", user, key, e);
                report.skipped.push((key, SkipReason::NotRecords));
                continue;
            }
        };

        match migrate_dataset(local, cloud, user, key, records).await {
            Ok(done) => {
                info!(
                    "Migration[{}]: {} merged ({} appended, {} already in cloud)",
                    user, key, done.appended, done.dropped
                );
                report.migrated.push(done);
            }
            Err(e) => {
                warn!("Migration[{}]: failed to migrate {}: {}", user, key, e);
                report.failed.push((key, e.to_string()));
            }
        }
    }

    report
}
