//! Persistent cells.
//!
//! A [`PersistentCell`] is one reactive storage slot for one dataset. It holds
//! the current value in memory, follows an identity signal and keeps the value
//! in sync with whichever backend that identity selects:
//!
//! - anonymous: the local slot for the dataset,
//! - authenticated: the user's cloud document (local slot for datasets that
//!   are not cloud-syncable).
//!
//! # Lifecycle
//!
//! ```text
//!   spawn ──> Loading ──(load applied)──> Ready
//!                ^                          │
//!                └──── identity changed ────┘
//! ```
//!
//! Every identity change bumps a generation counter and starts a new load
//! tagged with it. A load that finishes after a newer one started, or for an
//! identity that is no longer current, is discarded, so a slow response for a
//! previous user never overwrites the value shown for the current one.
//!
//! Before an authenticated load reads anything it goes through
//! [`PersistenceService::ensure_migrated`]: the first load after an
//! anonymous → user login migrates the local datasets into the cloud, and any
//! other load for that login waits until the migration is done. A login that
//! happens before any cell resolved an anonymous load migrates nothing.
//!
//! Backend failures never surface as a state: reads degrade to the default
//! value, failed cloud writes are backed up locally.
//!
//! # Writes
//!
//! [`set`](PersistentCell::set) and [`update`](PersistentCell::update) replace
//! the in-memory value immediately and dispatch the durable write in the
//! background. The returned [`PendingWrite`] can be awaited for the
//! [`PersistenceResult`] or simply dropped.
//!
//! A write goes to the backend of the identity the in-memory value was loaded
//! for. During a reload that is still the previous identity; the reload then
//! replaces the value.
//!
//! With [`SyncConfig::sequential_writes`](crate::SyncConfig) a cell owns a
//! writer task and durable writes land in dispatch order. Without it every
//! write is an independent task and two writes issued back-to-back may settle
//! in either order.
//!
//! Cells must be created and written from within a Tokio runtime. The
//! background tasks stop once the last handle is dropped.
use std::fmt::{Debug, Display};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::dataset::DatasetKey;
use crate::errors::SyncError;
use crate::events::SyncEvent;
use crate::identity::{Identity, Session};
use crate::service::PersistenceService;
use crate::storage::PersistenceResult;

/// Values a cell can hold.
pub trait CellValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CellValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A unique identifier for a cell, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CellId(Uuid);

impl CellId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CellStatus {
    /// Initial load, or reload after an identity change, still in flight
    Loading,
    /// The value reflects the backend of the current identity
    Ready,
}

/// Load status together with the identity it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadState {
    pub status: CellStatus,
    pub identity: Identity,
}

struct CellState {
    generation: u64,
    /// Identity the in-memory value belongs to; writes are routed by it
    loaded_for: Identity,
}

struct WriteJob<T> {
    identity: Identity,
    value: T,
    reply: oneshot::Sender<PersistenceResult>,
}

struct CellShared<T: CellValue> {
    id: CellId,
    key: DatasetKey,
    default: T,
    service: PersistenceService,
    state: Mutex<CellState>,
    /// Latest published session, used to drop loads for a superseded identity
    session: watch::Receiver<Session>,
    value_tx: watch::Sender<T>,
    load_tx: watch::Sender<LoadState>,
    /// Ordered write queue, `None` when writes are dispatched independently
    writer: Option<mpsc::UnboundedSender<WriteJob<T>>>,
}

impl<T: CellValue> CellShared<T> {
    fn state(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switches to `session` and starts loading its value.
    fn begin_load(self: &Arc<Self>, session: Session) {
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            self.load_tx.send_replace(LoadState {
                status: CellStatus::Loading,
                identity: session.identity.clone(),
            });
            state.generation
        };

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Identity::User(user) = &session.identity {
                shared.service.ensure_migrated(user, session.login_seq).await;
            }
            let value = shared
                .service
                .load(shared.key, &session.identity, shared.default.clone())
                .await;
            shared.apply_load(generation, session, value);
        });
    }

    fn apply_load(&self, generation: u64, session: Session, value: T) {
        {
            let mut state = self.state();
            if state.generation != generation || self.session.borrow().identity != session.identity {
                debug!(
                    "Cell[{}] {}: discarding stale load for {}",
                    self.id, self.key, session.identity
                );
                return;
            }
            state.loaded_for = session.identity.clone();
            self.value_tx.send_replace(value);
            self.load_tx.send_replace(LoadState {
                status: CellStatus::Ready,
                identity: session.identity.clone(),
            });
        }

        if session.identity.is_anonymous() {
            self.service.note_anonymous_load(session.login_seq);
        }

        debug!("Cell[{}] {}: ready for {}", self.id, self.key, session.identity);
        self.service.publish(SyncEvent::Loaded {
            cell: self.id,
            key: self.key,
            identity: session.identity,
        });
    }
}

/// Follows the identity channel until the cell is dropped or the provider goes away.
async fn drive<T: CellValue>(
    shared: Arc<CellShared<T>>,
    mut identity_rx: watch::Receiver<Session>,
    mut last: Identity,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = identity_rx.changed() => {
                if changed.is_err() {
                    debug!("Cell[{}] {}: identity provider dropped", shared.id, shared.key);
                    break;
                }

                let session = identity_rx.borrow_and_update().clone();
                if session.identity == last {
                    continue;
                }

                info!("Cell[{}] {}: identity {} -> {}", shared.id, shared.key, last, session.identity);
                last = session.identity.clone();
                shared.begin_load(session);
            }
        }
    }
}

async fn write_one<T: CellValue>(service: &PersistenceService, cell: CellId, key: DatasetKey, job: WriteJob<T>) {
    let result = service.persist(key, &job.identity, &job.value).await;
    debug!("Cell[{}] {}: write settled: {:?}", cell, key, result);

    service.publish(SyncEvent::WriteCompleted {
        cell,
        key,
        result: result.clone(),
    });
    // The caller may have dropped its PendingWrite
    let _ = job.reply.send(result);
}

async fn run_writer<T: CellValue>(
    service: PersistenceService,
    cell: CellId,
    key: DatasetKey,
    mut rx: mpsc::UnboundedReceiver<WriteJob<T>>,
) {
    while let Some(job) = rx.recv().await {
        write_one(&service, cell, key, job).await;
    }
    debug!("Cell[{}] {}: writer stopped", cell, key);
}

/// Reactive, persisted value of one dataset. Cheap to clone.
pub struct PersistentCell<T: CellValue> {
    shared: Arc<CellShared<T>>,
    _guard: Arc<DropGuard>,
}

impl<T: CellValue> Clone for PersistentCell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _guard: Arc::clone(&self._guard),
        }
    }
}

impl<T: CellValue> Debug for PersistentCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCell")
            .field("id", &self.shared.id)
            .field("key", &self.shared.key)
            .field("state", &*self.shared.load_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: CellValue> PersistentCell<T> {
    pub(crate) fn spawn(
        service: PersistenceService,
        key: DatasetKey,
        default: T,
        mut identity_rx: watch::Receiver<Session>,
    ) -> Self {
        let id = CellId::new();
        let session = identity_rx.borrow_and_update().clone();

        let (value_tx, _) = watch::channel(default.clone());
        let (load_tx, _) = watch::channel(LoadState {
            status: CellStatus::Loading,
            identity: session.identity.clone(),
        });

        let writer = if service.config().sequential_writes {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_writer(service.clone(), id, key, rx));
            Some(tx)
        } else {
            None
        };

        let shared = Arc::new(CellShared {
            id,
            key,
            default,
            service,
            state: Mutex::new(CellState {
                generation: 0,
                loaded_for: session.identity.clone(),
            }),
            session: identity_rx.clone(),
            value_tx,
            load_tx,
            writer,
        });

        debug!("Cell[{}] {}: mounted as {}", id, key, session.identity);
        let last = session.identity.clone();
        shared.begin_load(session);

        let cancel = CancellationToken::new();
        tokio::spawn(drive(shared.clone(), identity_rx, last, cancel.clone()));

        Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        }
    }

    pub fn id(&self) -> CellId {
        self.shared.id
    }

    pub fn key(&self) -> DatasetKey {
        self.shared.key
    }

    /// Current in-memory value.
    pub fn get(&self) -> T {
        self.shared.value_tx.borrow().clone()
    }

    /// Runs `f` against the current value without cloning it.
    ///
    /// `f` must not call back into this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.value_tx.borrow())
    }

    /// True during the initial load and identity-triggered reloads, never during writes.
    pub fn is_loading(&self) -> bool {
        self.status() == CellStatus::Loading
    }

    pub fn status(&self) -> CellStatus {
        self.shared.load_tx.borrow().status
    }

    /// Identity the cell is loading or showing.
    pub fn identity(&self) -> Identity {
        self.shared.load_tx.borrow().identity.clone()
    }

    /// `(value, is_loading)`.
    pub fn snapshot(&self) -> (T, bool) {
        (self.get(), self.is_loading())
    }

    pub fn watch_value(&self) -> watch::Receiver<T> {
        self.shared.value_tx.subscribe()
    }

    pub fn watch_load(&self) -> watch::Receiver<LoadState> {
        self.shared.load_tx.subscribe()
    }

    /// Waits until the cell is `Ready`, whatever the identity.
    pub async fn wait_ready(&self) {
        let mut rx = self.shared.load_tx.subscribe();
        let _ = rx.wait_for(|s| s.status == CellStatus::Ready).await;
    }

    /// Waits until the cell is `Ready` for `identity`.
    pub async fn wait_ready_as(&self, identity: &Identity) {
        let mut rx = self.shared.load_tx.subscribe();
        let _ = rx
            .wait_for(|s| s.status == CellStatus::Ready && s.identity == *identity)
            .await;
    }

    /// Replaces the value.
    pub fn set(&self, value: T) -> PendingWrite {
        self.update(move |_| value)
    }

    /// Replaces the value with `f(current)`.
    ///
    /// `f` sees the value currently held in memory, not a fresh read from the
    /// backend. It may read the cell but must not write to it.
    pub fn update<F>(&self, f: F) -> PendingWrite
    where
        F: FnOnce(&T) -> T,
    {
        let (identity, value) = {
            let state = self.shared.state();
            let value = f(&self.get());
            self.shared.value_tx.send_replace(value.clone());
            (state.loaded_for.clone(), value)
        };
        self.dispatch(identity, value)
    }

    fn dispatch(&self, identity: Identity, value: T) -> PendingWrite {
        let (reply, rx) = oneshot::channel();
        let job = WriteJob { identity, value, reply };

        match &self.shared.writer {
            Some(writer) => {
                if let Err(mpsc::error::SendError(job)) = writer.send(job) {
                    let _ = job.reply.send(PersistenceResult::Failed {
                        error: SyncError::ChannelClosed.to_string(),
                    });
                }
            }
            None => {
                let service = self.shared.service.clone();
                let (cell, key) = (self.shared.id, self.shared.key);
                tokio::spawn(async move {
                    write_one(&service, cell, key, job).await;
                });
            }
        }

        PendingWrite { rx }
    }
}

/// Resolves to the outcome of a durable write. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    rx: oneshot::Receiver<PersistenceResult>,
}

impl Future for PendingWrite {
    type Output = PersistenceResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| PersistenceResult::Failed {
                error: SyncError::ChannelClosed.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::errors::Result;
    use crate::identity::{IdentityProvider, UserId};
    use crate::storage::{
        Backend, CloudDocument, CloudStore, DocumentPath, InMemoryCloudStore, InMemoryLocalStore, LocalStore,
    };
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde::Deserialize;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestResult {
        id: String,
        score: u32,
        total: u32,
    }

    fn user(id: &str) -> Identity {
        Identity::User(UserId::new(id))
    }

    fn path(id: &str, key: DatasetKey) -> DocumentPath {
        DocumentPath::for_dataset(&UserId::new(id), key.collection().unwrap())
    }

    async fn within<F: Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), f)
            .await
            .expect("timed out waiting for the cell")
    }

    struct Fixture {
        local: Arc<InMemoryLocalStore>,
        cloud: Arc<InMemoryCloudStore>,
        service: PersistenceService,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let local = Arc::new(InMemoryLocalStore::new());
        let cloud = Arc::new(InMemoryCloudStore::new());
        let service = PersistenceService::new(local.clone(), cloud.clone(), config);
        Fixture { local, cloud, service }
    }

    /// Cloud store whose reads for selected users, or all writes, block until released.
    #[derive(Default)]
    struct GatedCloudStore {
        inner: InMemoryCloudStore,
        gates: Mutex<HashMap<String, Arc<Notify>>>,
        write_gate: Mutex<Option<Arc<Semaphore>>>,
        finished_reads: AtomicUsize,
    }

    impl GatedCloudStore {
        fn hold(&self, user: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates.lock().unwrap().insert(user.to_string(), gate.clone());
            gate
        }

        /// Writes wait until a permit is added to the returned semaphore.
        fn hold_writes(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.write_gate.lock().unwrap() = Some(gate.clone());
            gate
        }
    }

    impl CloudStore for GatedCloudStore {
        fn get_document<'a>(&'a self, path: &'a DocumentPath) -> BoxFuture<'a, Result<Option<CloudDocument>>> {
            async move {
                let gate = self.gates.lock().unwrap().get(path.user().as_str()).cloned();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                let doc = self.inner.get_document(path).await;
                self.finished_reads.fetch_add(1, Ordering::SeqCst);
                doc
            }
            .boxed()
        }

        fn set_document<'a>(&'a self, path: &'a DocumentPath, doc: CloudDocument) -> BoxFuture<'a, Result<()>> {
            async move {
                let gate = self.write_gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    let _ = gate.acquire().await;
                }
                self.inner.set_document(path, doc).await
            }
            .boxed()
        }
    }

    fn gated_service(cloud: Arc<GatedCloudStore>) -> (PersistenceService, Arc<InMemoryLocalStore>) {
        let local = Arc::new(InMemoryLocalStore::new());
        let service = PersistenceService::new(local.clone(), cloud, SyncConfig::default());
        (service, local)
    }

    #[tokio::test]
    async fn anonymous_cell_loads_default_then_local_value() {
        let fx = fixture(SyncConfig::default());
        let provider = IdentityProvider::new();

        let cell = fx.service.cell(DatasetKey::FlashcardSets, Vec::<String>::new(), provider.subscribe());
        assert!(cell.is_loading());
        within(cell.wait_ready()).await;
        assert_eq!(cell.snapshot(), (vec![], false));

        fx.local.set_item("savedLearnQuizzes", r#"["q1"]"#).unwrap();
        let other = fx.service.cell(DatasetKey::SavedLearnQuizzes, Vec::<String>::new(), provider.subscribe());
        within(other.wait_ready()).await;
        assert_eq!(other.get(), vec!["q1".to_string()]);
    }

    #[tokio::test]
    async fn set_is_visible_before_the_write_settles() {
        let fx = fixture(SyncConfig::default());
        let provider = IdentityProvider::signed_in(UserId::new("u"));
        let cell = fx.service.cell(DatasetKey::GuidedHistory, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;

        let pending = cell.set(json!([{"id": "g1"}]));
        assert_eq!(cell.get(), json!([{"id": "g1"}]));
        assert!(!cell.is_loading());
        assert!(fx.cloud.document(&path("u", DatasetKey::GuidedHistory)).is_none());

        assert_eq!(pending.await, PersistenceResult::Persisted(Backend::Cloud));
        assert_eq!(
            fx.cloud.document(&path("u", DatasetKey::GuidedHistory)).unwrap().value,
            json!([{"id": "g1"}])
        );
    }

    #[tokio::test]
    async fn functional_update_appends_to_cloud_history() {
        let fx = fixture(SyncConfig::default());
        fx.cloud.insert(
            &path("user-42", DatasetKey::TestHistory),
            CloudDocument::now(json!([{"id": "1", "score": 3, "total": 5}])),
        );
        let provider = IdentityProvider::signed_in(UserId::new("user-42"));
        let cell = fx.service.cell(DatasetKey::TestHistory, Vec::<TestResult>::new(), provider.subscribe());
        within(cell.wait_ready()).await;
        assert_eq!(cell.get().len(), 1);

        let pending = cell.update(|prev| {
            let mut next = prev.clone();
            next.push(TestResult { id: "2".into(), score: 5, total: 5 });
            next
        });
        let expected = vec![
            TestResult { id: "1".into(), score: 3, total: 5 },
            TestResult { id: "2".into(), score: 5, total: 5 },
        ];
        assert_eq!(cell.get(), expected);

        assert_eq!(pending.await, PersistenceResult::Persisted(Backend::Cloud));
        let stored = fx.cloud.document(&path("user-42", DatasetKey::TestHistory)).unwrap();
        assert_eq!(stored.value, serde_json::to_value(&expected).unwrap());
    }

    #[tokio::test]
    async fn login_migrates_local_records_into_empty_cloud() {
        let fx = fixture(SyncConfig::default());
        let provider = IdentityProvider::new();
        let cell = fx.service.cell(DatasetKey::FlashcardSets, Vec::<String>::new(), provider.subscribe());
        within(cell.wait_ready()).await;

        assert_eq!(cell.set(vec!["itemA".into()]).await, PersistenceResult::Persisted(Backend::Local));
        assert_eq!(fx.local.get_item("flashcardSets").as_deref(), Some(r#"["itemA"]"#));

        provider.login("user-42");
        within(cell.wait_ready_as(&user("user-42"))).await;

        let doc = fx.cloud.document(&path("user-42", DatasetKey::FlashcardSets)).unwrap();
        assert_eq!(doc.value, json!(["itemA"]));
        assert!(fx.local.get_item("flashcardSets").is_none());
        assert_eq!(cell.get(), vec!["itemA".to_string()]);
    }

    #[tokio::test]
    async fn migration_runs_once_for_all_cells() {
        let fx = fixture(SyncConfig::default());
        let mut events = fx.service.subscribe();
        let provider = IdentityProvider::new();

        let sets = fx.service.cell(DatasetKey::FlashcardSets, json!([]), provider.subscribe());
        let tests = fx.service.cell(DatasetKey::TestHistory, json!([]), provider.subscribe());
        within(sets.wait_ready()).await;
        within(tests.wait_ready()).await;
        sets.set(json!([{"id": "s1"}])).await;
        tests.set(json!([{"id": "t1"}])).await;

        provider.login("u");
        within(sets.wait_ready_as(&user("u"))).await;
        within(tests.wait_ready_as(&user("u"))).await;
        assert_eq!(sets.get(), json!([{"id": "s1"}]));
        assert_eq!(tests.get(), json!([{"id": "t1"}]));

        let mut migrations = 0;
        while let Ok(ev) = events.try_recv() {
            if let SyncEvent::MigrationCompleted { report, .. } = ev {
                assert_eq!(report.migrated.len(), 2);
                migrations += 1;
            }
        }
        assert_eq!(migrations, 1);
    }

    #[tokio::test]
    async fn mounting_while_authenticated_does_not_migrate() {
        let fx = fixture(SyncConfig::default());
        fx.local.set_item("flashcardSets", r#"[{"id":"local"}]"#).unwrap();
        let provider = IdentityProvider::signed_in(UserId::new("u"));

        let cell = fx.service.cell(DatasetKey::FlashcardSets, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;
        assert_eq!(cell.get(), json!([]));
        assert!(fx.local.get_item("flashcardSets").is_some());
        assert!(fx.cloud.document(&path("u", DatasetKey::FlashcardSets)).is_none());
    }

    #[tokio::test]
    async fn switching_users_reloads_without_migrating() {
        let fx = fixture(SyncConfig::default());
        fx.cloud.insert(&path("u1", DatasetKey::MatchHistory), CloudDocument::now(json!(["u1"])));
        fx.local.set_item("matchHistory", r#"[{"id":"backup"}]"#).unwrap();
        let provider = IdentityProvider::signed_in(UserId::new("u1"));

        let cell = fx.service.cell(DatasetKey::MatchHistory, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;
        assert_eq!(cell.get(), json!(["u1"]));

        provider.login("u2");
        within(cell.wait_ready_as(&user("u2"))).await;
        assert_eq!(cell.get(), json!([]));
        assert!(fx.cloud.document(&path("u2", DatasetKey::MatchHistory)).is_none());
        assert!(fx.local.get_item("matchHistory").is_some());
    }

    #[tokio::test]
    async fn logout_switches_back_to_local_slot() {
        let fx = fixture(SyncConfig::default());
        fx.cloud.insert(&path("u", DatasetKey::MixedHistory), CloudDocument::now(json!(["cloud"])));
        fx.local.set_item("mixedHistory", r#"["device"]"#).unwrap();
        let provider = IdentityProvider::signed_in(UserId::new("u"));

        let cell = fx.service.cell(DatasetKey::MixedHistory, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;
        assert_eq!(cell.get(), json!(["cloud"]));

        provider.logout();
        within(cell.wait_ready_as(&Identity::Anonymous)).await;
        assert_eq!(cell.get(), json!(["device"]));

        assert_eq!(cell.set(json!(["offline"])).await, PersistenceResult::Persisted(Backend::Local));
        assert_eq!(
            fx.cloud.document(&path("u", DatasetKey::MixedHistory)).unwrap().value,
            json!(["cloud"])
        );
    }

    #[tokio::test]
    async fn cloud_write_failure_keeps_value_and_backs_up_locally() {
        let fx = fixture(SyncConfig::default());
        let mut events = fx.service.subscribe();
        let provider = IdentityProvider::signed_in(UserId::new("u"));
        let cell = fx.service.cell(DatasetKey::SavedTestQuizzes, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;

        fx.cloud.fail_writes(true);
        let result = cell.set(json!([{"id": "quiz"}])).await;
        assert!(matches!(result, PersistenceResult::FallbackUsed { .. }), "got {:?}", result);
        assert_eq!(cell.get(), json!([{"id": "quiz"}]));
        assert_eq!(fx.local.get_item("savedTestQuizzes").as_deref(), Some(r#"[{"id":"quiz"}]"#));

        let mut saw_fallback = false;
        while let Ok(ev) = events.try_recv() {
            if let SyncEvent::WriteCompleted { key, result, .. } = ev {
                assert_eq!(key, DatasetKey::SavedTestQuizzes);
                saw_fallback = result.is_degraded();
            }
        }
        assert!(saw_fallback);
    }

    #[tokio::test]
    async fn failed_cloud_read_degrades_to_default() {
        let fx = fixture(SyncConfig::default());
        fx.cloud.insert(&path("u", DatasetKey::FlashcardHistory), CloudDocument::now(json!(["x"])));
        fx.cloud.fail_reads(true);
        let provider = IdentityProvider::signed_in(UserId::new("u"));

        let cell = fx.service.cell(DatasetKey::FlashcardHistory, json!(["default"]), provider.subscribe());
        within(cell.wait_ready()).await;
        assert_eq!(cell.snapshot(), (json!(["default"]), false));
    }

    #[tokio::test]
    async fn local_only_dataset_stays_local_when_authenticated() {
        let fx = fixture(SyncConfig::default());
        let provider = IdentityProvider::signed_in(UserId::new("u"));
        let cell = fx.service.cell(DatasetKey::Theme, "light".to_string(), provider.subscribe());
        within(cell.wait_ready()).await;

        assert_eq!(cell.set("dark".into()).await, PersistenceResult::Persisted(Backend::Local));
        assert_eq!(fx.local.get_item("theme").as_deref(), Some(r#""dark""#));
        assert_eq!(fx.cloud.write_count(), 0);
    }

    #[tokio::test]
    async fn late_load_for_previous_user_is_discarded() {
        let cloud = Arc::new(GatedCloudStore::default());
        cloud.inner.insert(&path("u1", DatasetKey::FlashcardSets), CloudDocument::now(json!(["u1-set"])));
        cloud.inner.insert(&path("u2", DatasetKey::FlashcardSets), CloudDocument::now(json!(["u2-set"])));
        let gate = cloud.hold("u1");

        let service = PersistenceService::new(Arc::new(InMemoryLocalStore::new()), cloud.clone(), SyncConfig::default());
        let provider = IdentityProvider::signed_in(UserId::new("u1"));
        let cell = service.cell(DatasetKey::FlashcardSets, Vec::<String>::new(), provider.subscribe());

        tokio::task::yield_now().await;
        assert!(cell.is_loading());

        provider.login("u2");
        within(cell.wait_ready_as(&user("u2"))).await;
        assert_eq!(cell.get(), vec!["u2-set".to_string()]);

        gate.notify_one();
        within(async {
            while cloud.finished_reads.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await;

        assert_eq!(cell.get(), vec!["u2-set".to_string()]);
        assert_eq!(cell.identity(), user("u2"));
        assert!(!cell.is_loading());
    }

    #[tokio::test]
    async fn sequential_writes_land_in_dispatch_order() {
        let fx = fixture(SyncConfig::default());
        let provider = IdentityProvider::signed_in(UserId::new("u"));
        let cell = fx.service.cell(DatasetKey::LearnHistory, Vec::<u32>::new(), provider.subscribe());
        within(cell.wait_ready()).await;

        let mut last = None;
        for i in 0..20 {
            last = Some(cell.update(|prev| {
                let mut next = prev.clone();
                next.push(i);
                next
            }));
        }
        assert_eq!(last.unwrap().await, PersistenceResult::Persisted(Backend::Cloud));

        let expected: Vec<u32> = (0..20).collect();
        assert_eq!(cell.get(), expected);
        assert_eq!(
            fx.cloud.document(&path("u", DatasetKey::LearnHistory)).unwrap().value,
            json!(expected)
        );
    }

    #[tokio::test]
    async fn independent_writes_still_persist() {
        let fx = fixture(SyncConfig {
            sequential_writes: false,
            ..SyncConfig::default()
        });
        let provider = IdentityProvider::new();
        let cell = fx.service.cell(DatasetKey::SavedMixedQuizzes, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;

        assert_eq!(cell.set(json!([{"id": "m"}])).await, PersistenceResult::Persisted(Backend::Local));
        assert_eq!(fx.local.get_item("savedMixedQuizzes").as_deref(), Some(r#"[{"id":"m"}]"#));
    }

    #[tokio::test]
    async fn watchers_see_loads_and_writes() {
        let fx = fixture(SyncConfig::default());
        fx.local.set_item("flashcardSets", r#"["a"]"#).unwrap();
        let provider = IdentityProvider::new();
        let cell = fx.service.cell(DatasetKey::FlashcardSets, Vec::<String>::new(), provider.subscribe());

        let mut values = cell.watch_value();
        within(values.wait_for(|v| v == &vec!["a".to_string()])).await.unwrap();

        let clone = cell.clone();
        clone.set(vec!["b".into()]);
        assert!(values.has_changed().unwrap());
        assert_eq!(*values.borrow_and_update(), vec!["b".to_string()]);
        assert_eq!(cell.with(|v| v.len()), 1);
    }

    #[tokio::test]
    async fn login_before_first_load_resolves_skips_migration() {
        let fx = fixture(SyncConfig::default());
        fx.local.set_item("flashcardSets", r#"[{"id":"local"}]"#).unwrap();
        let mut events = fx.service.subscribe();
        let provider = IdentityProvider::new();

        let cell = fx.service.cell(DatasetKey::FlashcardSets, json!([]), provider.subscribe());
        provider.login("u");
        within(cell.wait_ready_as(&user("u"))).await;

        assert_eq!(cell.get(), json!([]));
        assert!(fx.cloud.document(&path("u", DatasetKey::FlashcardSets)).is_none());
        assert_eq!(fx.local.get_item("flashcardSets").as_deref(), Some(r#"[{"id":"local"}]"#));
        while let Ok(ev) = events.try_recv() {
            assert!(!matches!(ev, SyncEvent::MigrationCompleted { .. }), "unexpected {:?}", ev);
        }
    }

    #[tokio::test]
    async fn load_started_during_migration_sees_migrated_records() {
        let cloud = Arc::new(GatedCloudStore::default());
        let (service, local) = gated_service(cloud.clone());
        local.set_item("flashcardSets", r#"[{"id":"f1"}]"#).unwrap();
        local.set_item("testHistory", r#"[{"id":"t1"}]"#).unwrap();
        let provider = IdentityProvider::new();

        let sets = service.cell(DatasetKey::FlashcardSets, json!([]), provider.subscribe());
        within(sets.wait_ready()).await;

        let writes = cloud.hold_writes();
        provider.login("u");
        let history = service.cell(DatasetKey::TestHistory, json!([]), provider.subscribe());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(history.is_loading());
        assert!(sets.is_loading());

        writes.add_permits(1);
        within(history.wait_ready_as(&user("u"))).await;
        within(sets.wait_ready_as(&user("u"))).await;
        assert_eq!(history.get(), json!([{"id": "t1"}]));
        assert_eq!(sets.get(), json!([{"id": "f1"}]));

        let pending = history.update(|prev| {
            let mut next = prev.as_array().cloned().unwrap_or_default();
            next.push(json!({"id": "t2"}));
            JsonValue::Array(next)
        });
        assert_eq!(pending.await, PersistenceResult::Persisted(Backend::Cloud));
        assert_eq!(
            cloud.inner.document(&path("u", DatasetKey::TestHistory)).unwrap().value,
            json!([{"id": "t1"}, {"id": "t2"}])
        );
    }

    #[tokio::test]
    async fn write_during_reload_stays_with_the_loaded_identity() {
        let cloud = Arc::new(GatedCloudStore::default());
        cloud.inner.insert(&path("u2", DatasetKey::MatchHistory), CloudDocument::now(json!([{"id": "device"}])));
        cloud.inner.insert(&path("u", DatasetKey::MatchHistory), CloudDocument::now(json!([{"id": "c"}])));
        let (service, _local) = gated_service(cloud.clone());
        let provider = IdentityProvider::signed_in(UserId::new("u2"));

        let cell = service.cell(DatasetKey::MatchHistory, json!([]), provider.subscribe());
        within(cell.wait_ready()).await;

        let gate = cloud.hold("u");
        provider.login("u");
        within(async {
            while cell.identity() != user("u") {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(cell.is_loading());

        let pending = cell.update(|prev| {
            let mut next = prev.as_array().cloned().unwrap_or_default();
            next.push(json!({"id": "new"}));
            JsonValue::Array(next)
        });
        assert_eq!(pending.await, PersistenceResult::Persisted(Backend::Cloud));
        assert_eq!(
            cloud.inner.document(&path("u2", DatasetKey::MatchHistory)).unwrap().value,
            json!([{"id": "device"}, {"id": "new"}])
        );
        assert_eq!(
            cloud.inner.document(&path("u", DatasetKey::MatchHistory)).unwrap().value,
            json!([{"id": "c"}])
        );

        gate.notify_one();
        within(cell.wait_ready_as(&user("u"))).await;
        assert_eq!(cell.get(), json!([{"id": "c"}]));
    }

    #[tokio::test]
    async fn updater_can_read_the_cell() {
        let fx = fixture(SyncConfig::default());
        let provider = IdentityProvider::new();
        let cell = fx.service.cell(DatasetKey::LearnHistory, Vec::<u32>::new(), provider.subscribe());
        within(cell.wait_ready()).await;

        let pending = cell.update(|prev| {
            let mut next = prev.clone();
            next.push(cell.with(|v| v.len() as u32) + cell.get().len() as u32);
            next
        });
        assert_eq!(cell.get(), vec![0]);
        assert_eq!(pending.await, PersistenceResult::Persisted(Backend::Local));
    }
}
