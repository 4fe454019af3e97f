use crate::dataset::DatasetKey;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Local storage unavailable: {0}")]
    LocalUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Cloud store returned {status} for {path}")]
    CloudStatus { status: http::StatusCode, path: String },

    #[error("Cloud store error: {0}")]
    Cloud(String),

    #[error("Dataset {key} cannot be migrated: {reason}")]
    InvalidRecords { key: DatasetKey, reason: String },

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
