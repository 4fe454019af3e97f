use std::fmt::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use crate::dataset::{CollectionName, DatasetKey};
use crate::identity::UserId;

/// Location of a dataset document in the cloud store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    user: UserId,
    collection: CollectionName,
}

impl DocumentPath {
    pub fn for_dataset(user: &UserId, collection: CollectionName) -> Self {
        Self {
            user: user.clone(),
            collection,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn collection(&self) -> CollectionName {
        self.collection
    }
}

impl Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "userData/{}/{}/data", self.user, self.collection)
    }
}

/// Body of a cloud dataset document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloudDocument {
    pub value: JsonValue,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

impl CloudDocument {
    /// Wraps `value`, stamping `updatedAt` with the current UTC time (RFC 3339).
    pub fn now(value: JsonValue) -> Self {
        let updated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string());
        Self { value, updated_at }
    }
}

/// Which backend a read or write goes to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Backend {
    Local,
    Cloud,
}

/// Resolved storage location for a dataset under a given identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageTarget {
    Local(DatasetKey),
    Cloud(DocumentPath),
}

impl StorageTarget {
    pub fn backend(&self) -> Backend {
        match self {
            StorageTarget::Local(_) => Backend::Local,
            StorageTarget::Cloud(_) => Backend::Cloud,
        }
    }
}

/// Outcome of a durable write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceResult {
    /// The value reached the intended backend.
    Persisted(Backend),
    /// The cloud write failed; the value was written to the local slot instead.
    FallbackUsed { cloud_error: String },
    /// Nothing durable was written.
    Failed { error: String },
}

impl PersistenceResult {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, PersistenceResult::Persisted(_))
    }
}
