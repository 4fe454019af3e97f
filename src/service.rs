use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::cell::{CellValue, PersistentCell};
use crate::config::SyncConfig;
use crate::dataset::DatasetKey;
use crate::errors::{Result, SyncError};
use crate::events::{Subscription, SyncBus, SyncEvent};
use crate::identity::{Identity, Session, UserId};
use crate::migration::{migrate_local_to_cloud, MigrationReport};
use crate::storage::{
    read_cloud, read_local, try_write_local, write_cloud, Backend, CloudStore, DocumentPath, HttpCloudStore,
    InMemoryCloudStore, InMemoryLocalStore, LocalStore, PersistenceResult, StorageTarget,
};

/// Bundles the local and cloud backends behind one handle.
///
/// Cheap to clone; all clones share the same stores, event bus and migration
/// bookkeeping.
#[derive(Clone)]
pub struct PersistenceService {
    local: Arc<dyn LocalStore>,
    cloud: Arc<dyn CloudStore>,
    config: SyncConfig,
    bus: Arc<SyncBus>,
    /// Login sequences whose migration already ran or was skipped
    migrations: Arc<AsyncMutex<HashSet<u64>>>,
    /// Login sequences of the anonymous sessions in which some cell resolved a load
    anonymous_loads: Arc<Mutex<HashSet<u64>>>,
}

impl Debug for PersistenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistenceService {
    pub fn new(local: Arc<dyn LocalStore>, cloud: Arc<dyn CloudStore>, config: SyncConfig) -> Self {
        let bus = Arc::new(SyncBus::new(config.event_channel_capacity));
        Self {
            local,
            cloud,
            config,
            bus,
            migrations: Arc::new(AsyncMutex::new(HashSet::new())),
            anonymous_loads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Both backends in memory, default configuration.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(InMemoryCloudStore::new()),
            SyncConfig::default(),
        )
    }

    /// Builds the backends described by `config`.
    ///
    /// `local_db_path` selects the SQLite local store (in memory otherwise) and
    /// `cloud` the HTTP document service (in memory otherwise).
    pub fn from_config(config: SyncConfig) -> anyhow::Result<Self> {
        let local: Arc<dyn LocalStore> = match &config.local_db_path {
            #[cfg(feature = "sqlite_local_store")]
            Some(path) => Arc::new(crate::storage::SqliteLocalStore::new(path)?),
            #[cfg(not(feature = "sqlite_local_store"))]
            Some(path) => anyhow::bail!(
                "local_db_path {} requires the sqlite_local_store feature",
                path.display()
            ),
            None => Arc::new(InMemoryLocalStore::new()),
        };

        let cloud: Arc<dyn CloudStore> = match &config.cloud {
            Some(cloud) => Arc::new(HttpCloudStore::new(cloud)?),
            None => Arc::new(InMemoryCloudStore::new()),
        };

        Ok(Self::new(local, cloud, config))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    pub fn cloud(&self) -> &Arc<dyn CloudStore> {
        &self.cloud
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub(crate) fn publish(&self, ev: SyncEvent) {
        self.bus.publish(ev);
    }

    /// Where `key` lives for `identity`: the cloud document when authenticated
    /// and the dataset is syncable, the local slot otherwise.
    pub fn target(&self, key: DatasetKey, identity: &Identity) -> StorageTarget {
        match (identity.user_id(), key.collection()) {
            (Some(user), Some(collection)) => StorageTarget::Cloud(DocumentPath::for_dataset(user, collection)),
            _ => StorageTarget::Local(key),
        }
    }

    /// Reads `key` from the backend selected for `identity`, falling back to `default`.
    pub async fn load<T: DeserializeOwned>(&self, key: DatasetKey, identity: &Identity, default: T) -> T {
        match self.target(key, identity) {
            StorageTarget::Local(key) => read_local(self.local.as_ref(), key.local_key(), default),
            StorageTarget::Cloud(path) => {
                read_cloud(self.cloud.as_ref(), path.user(), path.collection(), default).await
            }
        }
    }

    /// Durably writes `value` for `key` under `identity`.
    ///
    /// A failed cloud write is followed by a backup write to the local slot.
    /// Nothing is retried.
    pub async fn persist<T: Serialize + ?Sized>(
        &self,
        key: DatasetKey,
        identity: &Identity,
        value: &T,
    ) -> PersistenceResult {
        match self.target(key, identity) {
            StorageTarget::Local(key) => match try_write_local(self.local.as_ref(), key.local_key(), value) {
                Ok(()) => PersistenceResult::Persisted(Backend::Local),
                Err(e) => {
                    error!("Failed to persist {} locally: {}", key, e);
                    PersistenceResult::Failed { error: e.to_string() }
                }
            },
            StorageTarget::Cloud(path) => {
                let cloud_error = match write_cloud(self.cloud.as_ref(), path.user(), path.collection(), value).await {
                    Ok(()) => return PersistenceResult::Persisted(Backend::Cloud),
                    Err(e) => e,
                };

                warn!("Cloud write to {} failed, keeping a local backup: {}", path, cloud_error);
                match try_write_local(self.local.as_ref(), key.local_key(), value) {
                    Ok(()) => PersistenceResult::FallbackUsed { cloud_error: cloud_error.to_string() },
                    Err(e) => {
                        error!("Local backup of {} failed too, write is lost: {}", key, e);
                        PersistenceResult::Failed {
                            error: format!("cloud: {}; local: {}", cloud_error, e),
                        }
                    }
                }
            }
        }
    }

    /// Records that a cell resolved a load during the anonymous session `login_seq`.
    pub(crate) fn note_anonymous_load(&self, login_seq: u64) {
        self.anonymous_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(login_seq);
    }

    /// Runs the local → cloud migration for the login `login_seq`, at most once.
    ///
    /// The migration only runs if some cell resolved a load in the anonymous
    /// session that preceded this login. Every authenticated load of a cell
    /// goes through here before reading, so a load that starts while the
    /// migration is running waits for it. Only the caller that performed the
    /// migration gets the report.
    pub async fn ensure_migrated(&self, user: &UserId, login_seq: u64) -> Option<MigrationReport> {
        if login_seq == 0 {
            return None;
        }

        let mut done = self.migrations.lock().await;
        if !done.insert(login_seq) {
            return None;
        }

        let had_anonymous_data = self
            .anonymous_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(login_seq - 1));
        if !had_anonymous_data {
            debug!("No anonymous load before login {} of {}, skipping migration", login_seq, user);
            return None;
        }

        info!("Migrating local datasets into cloud for {}", user);
        let report = migrate_local_to_cloud(self.local.as_ref(), self.cloud.as_ref(), user).await;
        self.publish(SyncEvent::MigrationCompleted {
            user: user.clone(),
            report: report.clone(),
        });
        Some(report)
    }

    /// Removes every local slot (settings included).
    pub fn clear_local_data(&self) -> Result<()> {
        self.local
            .clear()
            .map_err(|e| SyncError::LocalUnavailable(format!("{:#}", e)))
    }

    /// Spawns a persistent cell for `key` following `identity`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cell<T: CellValue>(&self, key: DatasetKey, default: T, identity: watch::Receiver<Session>) -> PersistentCell<T> {
        PersistentCell::spawn(self.clone(), key, default, identity)
    }
}
