//! Typed access to the per-user cloud document store.
//!
//! The read path fails open: a missing document, a transport or permission
//! error, or a document whose value does not fit `T` all yield the caller's
//! default. The write path surfaces failures so callers can fall back to the
//! local store.

/// In-memory cloud store implementation.
pub mod in_memory;
/// HTTP document service implementation.
pub mod http_store;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::area::CloudStore;
use super::types::{CloudDocument, DocumentPath};
use crate::dataset::CollectionName;
use crate::errors::Result;
use crate::identity::UserId;

/// Strict read: `Ok(None)` if the document does not exist, errors otherwise.
pub async fn try_read_cloud<T: DeserializeOwned>(
    store: &dyn CloudStore,
    user: &UserId,
    collection: CollectionName,
) -> Result<Option<T>> {
    let path = DocumentPath::for_dataset(user, collection);
    match store.get_document(&path).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc.value)?)),
        None => Ok(None),
    }
}

pub async fn read_cloud<T: DeserializeOwned>(
    store: &dyn CloudStore,
    user: &UserId,
    collection: CollectionName,
    default: T,
) -> T {
    match try_read_cloud(store, user, collection).await {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            warn!("Failed to read userData/{}/{}/data, using default: {}", user, collection, e);
            default
        }
    }
}

/// Writes `{ value, updatedAt: now }` over the document for `(user, collection)`.
pub async fn write_cloud<T: Serialize + ?Sized>(
    store: &dyn CloudStore,
    user: &UserId,
    collection: CollectionName,
    value: &T,
) -> Result<()> {
    let path = DocumentPath::for_dataset(user, collection);
    let doc = CloudDocument::now(serde_json::to_value(value)?);
    store.set_document(&path, doc).await
}

#[cfg(test)]
mod tests {
    use super::in_memory::InMemoryCloudStore;
    use super::*;
    use crate::dataset::DatasetKey;
    use serde_json::json;

    fn history() -> CollectionName {
        DatasetKey::TestHistory.collection().unwrap()
    }

    #[tokio::test]
    async fn missing_document_resolves_to_default() {
        let store = InMemoryCloudStore::new();
        let user = UserId::new("u1");
        let v = read_cloud(&store, &user, history(), json!(["default"])).await;
        assert_eq!(v, json!(["default"]));
    }

    #[tokio::test]
    async fn read_error_resolves_to_default() {
        let store = InMemoryCloudStore::new();
        let user = UserId::new("u1");
        write_cloud(&store, &user, history(), &json!([{"id": "1"}])).await.unwrap();

        store.fail_reads(true);
        let v: Vec<serde_json::Value> = read_cloud(&store, &user, history(), vec![]).await;
        assert!(v.is_empty());
        assert!(try_read_cloud::<serde_json::Value>(&store, &user, history()).await.is_err());
    }

    #[tokio::test]
    async fn malformed_document_resolves_to_default() {
        let store = InMemoryCloudStore::new();
        let user = UserId::new("u1");
        write_cloud(&store, &user, history(), &json!({"not": "a list"})).await.unwrap();

        let v: Vec<u32> = read_cloud(&store, &user, history(), vec![9]).await;
        assert_eq!(v, vec![9]);
    }

    #[tokio::test]
    async fn write_overwrites_and_surfaces_failure() {
        let store = InMemoryCloudStore::new();
        let user = UserId::new("u1");

        write_cloud(&store, &user, history(), &json!([1])).await.unwrap();
        write_cloud(&store, &user, history(), &json!([2])).await.unwrap();
        let path = DocumentPath::for_dataset(&user, history());
        assert_eq!(store.document(&path).unwrap().value, json!([2]));

        store.fail_writes(true);
        assert!(write_cloud(&store, &user, history(), &json!([3])).await.is_err());
        assert_eq!(read_cloud(&store, &user, history(), json!(null)).await, json!([2]));
    }
}
