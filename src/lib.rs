//! Identity-aware persistence for study datasets.
//!
//! Each dataset (flashcard sets, saved quizzes, the various histories) is one
//! JSON value. While the user is anonymous it lives in a device-local slot;
//! once a user is signed in it lives in that user's cloud document. A
//! [`PersistentCell`] hides the switch: it reloads when the identity changes,
//! migrates anonymous data into the cloud on login and writes optimistically.
//!
//! ```no_run
//! use scientiagen_sync::{DatasetKey, IdentityProvider, PersistenceService};
//!
//! # async fn demo() {
//! let service = PersistenceService::in_memory();
//! let identity = IdentityProvider::new();
//! let sets = service.cell(DatasetKey::FlashcardSets, Vec::<String>::new(), identity.subscribe());
//! sets.wait_ready().await;
//! sets.set(vec!["biology".into()]).await;
//! identity.login("user-42");
//! # }
//! ```

pub mod cell;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod events;
pub mod identity;
pub mod migration;
pub mod service;
pub mod storage;

pub use cell::{CellId, CellStatus, CellValue, LoadState, PendingWrite, PersistentCell};
pub use config::{init_logging, CloudConfig, LogLevel, SyncConfig};
pub use dataset::{CollectionName, DatasetKey};
pub use errors::{Result, SyncError};
pub use events::{Subscription, SyncEvent};
pub use identity::{Identity, IdentityProvider, Session, UserId};
pub use migration::{MigrationReport, SkipReason};
pub use service::PersistenceService;
pub use storage::{Backend, CloudDocument, DocumentPath, PersistenceResult, StorageTarget};
