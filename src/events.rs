//! Sync event bus.
//!
//! Every [`PersistenceService`](crate::PersistenceService) owns one broadcast
//! bus. Cells publish when a load is applied and when a durable write settles;
//! the service publishes migration reports. Nobody has to listen.
use tokio::sync::broadcast;

use crate::cell::CellId;
use crate::dataset::DatasetKey;
use crate::identity::{Identity, UserId};
use crate::migration::MigrationReport;
use crate::storage::PersistenceResult;

/// A handle for receiving sync notifications.
pub type Subscription = broadcast::Receiver<SyncEvent>;

#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// A cell applied the value loaded for `identity`
    Loaded {
        cell: CellId,
        key: DatasetKey,
        identity: Identity,
    },
    /// A durable write settled
    WriteCompleted {
        cell: CellId,
        key: DatasetKey,
        result: PersistenceResult,
    },
    /// The local datasets were merged into `user`'s cloud store
    MigrationCompleted {
        user: UserId,
        report: MigrationReport,
    },
}

#[derive(Debug)]
pub(crate) struct SyncBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, ev: SyncEvent) {
        // send() only fails when there are no receivers
        let _ = self.tx.send(ev);
    }
}
