//! Storage backends for dataset values.
//!
//! Two interchangeable strategies keep one JSON value per dataset:
//!
//! - **Local store**: a synchronous key/value slot store scoped to the device
//!   (browser localStorage). Backed by a [`LocalStore`].
//! - **Cloud store**: an asynchronous per-user document store, shared across
//!   devices once authenticated. Backed by a [`CloudStore`].
//!
//! Both only ever replace the whole value of a dataset; there are no partial
//! updates.
//!
//! # Available types
//!
//! - [`LocalStore`], [`CloudStore`]: backend traits.
//! - [`InMemoryLocalStore`], [`SqliteLocalStore`]: local backends.
//! - [`InMemoryCloudStore`], [`HttpCloudStore`]: cloud backends.
//! - [`DocumentPath`], [`CloudDocument`]: cloud addressing and document body.
//! - [`StorageTarget`], [`PersistenceResult`]: backend selection and write outcome.
//!
//! # Choosing a backend
//!
//! - For durable local data, use [`SqliteLocalStore`].
//! - For tests or private sessions, use [`InMemoryLocalStore`].
//! - For the document service, use [`HttpCloudStore`]; [`InMemoryCloudStore`]
//!   serves tests and offline demos.

/// Backend traits.
pub mod area;
/// Cloud store typed operations and backends.
pub mod cloud;
/// Local store typed operations and backends.
pub mod local;
/// Storage types
pub mod types;

pub use area::{CloudStore, LocalStore};
pub use cloud::http_store::HttpCloudStore;
pub use cloud::in_memory::InMemoryCloudStore;
pub use cloud::{read_cloud, try_read_cloud, write_cloud};
pub use local::in_memory::InMemoryLocalStore;
#[cfg(feature = "sqlite_local_store")]
pub use local::sqlite_store::SqliteLocalStore;
pub use local::{read_local, remove_local, try_write_local, write_local};
pub use types::{Backend, CloudDocument, DocumentPath, PersistenceResult, StorageTarget};
