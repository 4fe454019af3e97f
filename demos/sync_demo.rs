//! Walks one flashcard-set cell through an anonymous session, a login with
//! migration and a logout, against in-memory backends.
//!
//! Run with `RUST_LOG=scientiagen_sync=debug` to follow the cell.
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scientiagen_sync::storage::{InMemoryCloudStore, InMemoryLocalStore};
use scientiagen_sync::{
    init_logging, DatasetKey, DocumentPath, Identity, IdentityProvider, LogLevel, PersistenceService, SyncConfig,
    SyncEvent, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlashcardSet {
    id: String,
    title: String,
    cards: Vec<(String, String)>,
}

impl FlashcardSet {
    fn new(title: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            cards: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogLevel::Info);

    let local = Arc::new(InMemoryLocalStore::new());
    let cloud = Arc::new(InMemoryCloudStore::new());
    let service = PersistenceService::new(local.clone(), cloud.clone(), SyncConfig::default());
    let mut events = service.subscribe();

    let identity = IdentityProvider::new();
    let sets = service.cell(DatasetKey::FlashcardSets, Vec::<FlashcardSet>::new(), identity.subscribe());
    sets.wait_ready().await;

    let result = sets
        .update(|prev| {
            let mut next = prev.clone();
            next.push(FlashcardSet::new("Cell biology"));
            next
        })
        .await;
    println!("anonymous write: {:?}", result);

    let user = UserId::new("user-42");
    identity.login(user.clone());
    sets.wait_ready_as(&Identity::User(user.clone())).await;
    println!("after login: {} set(s) for {}", sets.get().len(), sets.identity());

    let collection = DatasetKey::FlashcardSets
        .collection()
        .ok_or_else(|| anyhow::anyhow!("flashcard sets are not syncable"))?;
    let path = DocumentPath::for_dataset(&user, collection);
    if let Some(doc) = cloud.document(&path) {
        println!("cloud document {} updated at {}", path, doc.updated_at);
    }

    identity.logout();
    sets.wait_ready_as(&Identity::Anonymous).await;
    println!("after logout: {} set(s) on this device", sets.get().len());

    while let Ok(ev) = events.try_recv() {
        if let SyncEvent::MigrationCompleted { user, report } = ev {
            println!("migrated {} dataset(s) for {}", report.migrated.len(), user);
        }
    }

    Ok(())
}
