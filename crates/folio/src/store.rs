//! Generic document store
//!
//! Typed CRUD and live queries over a [`DocumentBackend`]. The record type
//! selects the collection at compile time (`T::COLLECTION`).
//!
//! - Reads are normalized (wire timestamps → dates) before decoding.
//! - Writes are stamped with `createdAt` / `updatedAt` by the store.
//! - Every round trip goes through the retry policy.
//! - `*_owned` variants check the owner field against the acting identity.
//!
//! Listener lifecycle:
//!
//! ```text
//! Active --snapshot--> Active
//! Active --permission-denied--> Degraded   (empty snapshots, logged once;
//!                                           also when denied at setup)
//! Active --other error--> Errored          (on_error called once)
//! any --unsubscribe / drop--> Terminated
//! ```

use chrono::Utc;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};

use folio_api::{
    Collection, CollectionSchema, Constraints, Document, Fields, OwnedRecord, Record, StoreError,
    StoreResult as Result, Value, CREATED_AT_FIELD, UPDATED_AT_FIELD,
};
use folio_core::{DocumentBackend, IdentityProvider, WriteBatch};

use crate::codec;
use crate::normalize::{normalize_document, normalize_documents};
use crate::retry::{with_retry, RetryPolicy};

/// Where a live listener is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    /// Permission was denied; the listener now only yields empty snapshots.
    Degraded,
    /// A fatal error was reported to `on_error`; later errors are suppressed.
    Errored,
    Terminated,
}

struct ListenerShared {
    label: String,
    state: Mutex<SubscriptionState>,
    terminated: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerShared {
    fn set_state(&self, state: SubscriptionState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != SubscriptionState::Terminated {
            *current = state;
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Handle to a live listener.
///
/// `unsubscribe` is idempotent. Dropping the handle also tears the listener down.
pub struct Subscription {
    shared: Arc<ListenerShared>,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn unsubscribe(&self) {
        if self.shared.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            *state = SubscriptionState::Terminated;
        }
        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        tracing::debug!("[DocumentStore] listener {} terminated", self.shared.label);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.shared.label)
            .field("state", &self.state())
            .finish()
    }
}

type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Typed document store over an injected backend and identity.
pub struct DocumentStore {
    backend: Arc<dyn DocumentBackend>,
    identity: Arc<dyn IdentityProvider>,
    retry: RetryPolicy,
    disposed: AtomicBool,
}

impl DocumentStore {
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        identity: Arc<dyn IdentityProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            identity,
            retry,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<dyn DocumentBackend> {
        &self.backend
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Id of the acting user, or `Unauthenticated`.
    pub fn require_user(&self) -> Result<String> {
        self.identity
            .current_user_id()
            .ok_or(StoreError::Unauthenticated)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    /// Reject further calls and release the backend.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("[DocumentStore] disposing");
        self.backend.dispose().await
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    // ===== Untyped operations =====

    #[tracing::instrument(level = "debug", skip(self), fields(collection = %collection))]
    pub async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        self.ensure_open()?;
        let document = with_retry(&self.retry, "get", || self.backend.get(collection, id)).await?;
        Ok(document.as_ref().map(normalize_document))
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, constraints),
        fields(collection = %collection)
    )]
    pub async fn list_documents(
        &self,
        collection: Collection,
        constraints: &Constraints,
    ) -> Result<Vec<Document>> {
        self.ensure_open()?;
        constraints.validate()?;
        let documents = with_retry(&self.retry, "query", || {
            self.backend.query(collection, constraints)
        })
        .await?;
        tracing::debug!(
            "[DocumentStore] {} returned {} documents",
            collection,
            documents.len()
        );
        Ok(normalize_documents(&documents))
    }

    /// Apply a batch atomically. Callers keep batches within the backend's ceiling.
    #[tracing::instrument(level = "debug", skip(self, batch), fields(writes = batch.len()))]
    pub async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_open()?;
        let limit = self.backend.max_batch_operations();
        if batch.len() > limit {
            return Err(StoreError::BatchLimitExceeded {
                size: batch.len(),
                limit,
            });
        }
        if batch.is_empty() {
            return Ok(());
        }
        with_retry(&self.retry, "commit", || self.backend.commit(batch.clone())).await
    }

    /// Live query delivering normalized documents on every change.
    pub async fn subscribe_documents<F, E>(
        &self,
        collection: Collection,
        constraints: &Constraints,
        on_data: F,
        on_error: E,
    ) -> Result<Subscription>
    where
        F: Fn(Vec<Document>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        constraints.validate()?;
        let setup = self.backend.listen(collection, constraints).await;
        let stream = degrade_if_denied(setup)?;
        let label = folio_api::cache_key(collection, constraints);
        Ok(spawn_listener(label, stream, Arc::new(on_error), move |docs: Vec<Document>| {
            on_data(normalize_documents(&docs));
            Ok(())
        }))
    }

    // ===== Typed reads =====

    /// Fetch one record. Absence is `Ok(None)`, not an error.
    pub async fn get<T: CollectionSchema>(&self, id: &str) -> Result<Option<Record<T>>> {
        self.get_document(T::COLLECTION, id)
            .await?
            .map(codec::decode::<T>)
            .transpose()
    }

    /// Run a query. No filtering happens client-side.
    pub async fn list<T: CollectionSchema>(
        &self,
        constraints: &Constraints,
    ) -> Result<Vec<Record<T>>> {
        let documents = self.list_documents(T::COLLECTION, constraints).await?;
        codec::decode_all(documents)
    }

    // ===== Typed writes =====

    /// Insert with a backend-assigned id. Audit stamps are added if absent.
    #[tracing::instrument(level = "debug", skip(self, data), fields(collection = %T::COLLECTION))]
    pub async fn create<T: CollectionSchema>(&self, data: &T) -> Result<String> {
        self.ensure_open()?;
        let mut fields = codec::encode(T::COLLECTION, data)?;
        let now = Value::DateTime(Utc::now());
        fields
            .entry(CREATED_AT_FIELD.to_string())
            .or_insert_with(|| now.clone());
        fields.entry(UPDATED_AT_FIELD.to_string()).or_insert(now);

        let id = with_retry(&self.retry, "add", || {
            self.backend.add(T::COLLECTION, fields.clone())
        })
        .await?;
        tracing::debug!("[DocumentStore] created {}/{}", T::COLLECTION, id);
        Ok(id)
    }

    /// Write under a known id. A non-merge write is a fresh document and
    /// gets a new `createdAt`; `updatedAt` is always stamped.
    #[tracing::instrument(level = "debug", skip(self, data), fields(collection = %T::COLLECTION))]
    pub async fn upsert<T: CollectionSchema>(&self, id: &str, data: &T, merge: bool) -> Result<()> {
        self.ensure_open()?;
        let mut fields = codec::encode(T::COLLECTION, data)?;
        let now = Value::DateTime(Utc::now());
        if merge {
            fields.remove(CREATED_AT_FIELD);
        } else {
            fields.insert(CREATED_AT_FIELD.to_string(), now.clone());
        }
        fields.insert(UPDATED_AT_FIELD.to_string(), now);

        with_retry(&self.retry, "set", || {
            self.backend.set(T::COLLECTION, id, fields.clone(), merge)
        })
        .await
    }

    /// Merge a partial field map into an existing record. Fails with
    /// `NotFound` if the record does not exist.
    #[tracing::instrument(level = "debug", skip(self, patch), fields(collection = %T::COLLECTION))]
    pub async fn update<T: CollectionSchema>(&self, id: &str, patch: Fields) -> Result<()> {
        self.ensure_open()?;
        let patch = stamp_patch(patch);
        with_retry(&self.retry, "update", || {
            self.backend.update(T::COLLECTION, id, patch.clone())
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(collection = %T::COLLECTION))]
    pub async fn remove<T: CollectionSchema>(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        with_retry(&self.retry, "delete", || self.backend.delete(T::COLLECTION, id)).await
    }

    // ===== Typed live queries =====

    /// Live query. `on_data` receives the full, decoded result set on every
    /// change, in the order the backend produced them.
    pub async fn subscribe<T, F, E>(
        &self,
        constraints: &Constraints,
        on_data: F,
        on_error: E,
    ) -> Result<Subscription>
    where
        T: CollectionSchema,
        F: Fn(Vec<Record<T>>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        constraints.validate()?;
        let setup = self.backend.listen(T::COLLECTION, constraints).await;
        let stream = degrade_if_denied(setup)?;
        let label = folio_api::cache_key(T::COLLECTION, constraints);
        Ok(spawn_listener(label, stream, Arc::new(on_error), move |docs: Vec<Document>| {
            let records = codec::decode_all::<T>(normalize_documents(&docs))?;
            on_data(records);
            Ok(())
        }))
    }

    /// Live single record; `None` while it does not exist.
    pub async fn subscribe_document<T, F, E>(
        &self,
        id: &str,
        on_data: F,
        on_error: E,
    ) -> Result<Subscription>
    where
        T: CollectionSchema,
        F: Fn(Option<Record<T>>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let setup = self.backend.listen_document(T::COLLECTION, id).await;
        let stream = degrade_if_denied(setup)?;
        let label = format!("{}/{}", T::COLLECTION, id);
        Ok(spawn_listener(label, stream, Arc::new(on_error), move |doc: Option<Document>| {
            let record = doc
                .as_ref()
                .map(normalize_document)
                .map(codec::decode::<T>)
                .transpose()?;
            on_data(record);
            Ok(())
        }))
    }

    // ===== Ownership-checked operations =====

    /// Fetch a record owned by the acting user. A record owned by anyone else
    /// is an authorization error, not `None`.
    pub async fn get_owned<T: OwnedRecord>(&self, id: &str) -> Result<Option<Record<T>>> {
        let user_id = self.require_user()?;
        let record = self.get::<T>(id).await?;
        match record {
            Some(record) if record.data.owner_id() != user_id => {
                tracing::warn!(
                    "[DocumentStore] {} attempted to read {}/{} owned by someone else",
                    user_id,
                    T::COLLECTION,
                    id
                );
                Err(StoreError::not_owner(T::COLLECTION.name(), id))
            }
            other => Ok(other),
        }
    }

    /// Create a record whose owner field must be the acting user.
    pub async fn create_owned<T: OwnedRecord>(&self, data: &T) -> Result<String> {
        let user_id = self.require_user()?;
        if data.owner_id() != user_id {
            return Err(StoreError::invalid(format!(
                "{} must be the signed-in user",
                T::OWNER_FIELD
            )));
        }
        self.create(data).await
    }

    /// Update a record after verifying the acting user owns it. The owner
    /// field itself cannot be changed.
    pub async fn update_owned<T: OwnedRecord>(&self, id: &str, patch: Fields) -> Result<()> {
        if patch.contains_key(T::OWNER_FIELD) {
            return Err(StoreError::invalid(format!(
                "{} cannot be changed",
                T::OWNER_FIELD
            )));
        }
        match self.get_owned::<T>(id).await? {
            Some(_) => self.update::<T>(id, patch).await,
            None => Err(StoreError::not_found(T::COLLECTION.name(), id)),
        }
    }

    /// Delete a record after verifying the acting user owns it. Deleting a
    /// record that is already gone succeeds.
    pub async fn remove_owned<T: OwnedRecord>(&self, id: &str) -> Result<()> {
        match self.get_owned::<T>(id).await? {
            Some(_) => self.remove::<T>(id).await,
            None => {
                tracing::debug!(
                    "[DocumentStore] {}/{} already gone, nothing to delete",
                    T::COLLECTION,
                    id
                );
                Ok(())
            }
        }
    }
}

/// Drop caller-supplied `createdAt` and stamp `updatedAt`.
fn stamp_patch(mut patch: Fields) -> Fields {
    patch.remove(CREATED_AT_FIELD);
    patch.insert(UPDATED_AT_FIELD.to_string(), Value::DateTime(Utc::now()));
    patch
}

/// Drive a backend stream on its own task.
///
/// `deliver` converts and forwards each snapshot; if it fails, the failure is
/// handled like a listener error. Permission denial turns into an empty
/// (default) snapshot.
type ListenerStream<S> = Pin<Box<dyn Stream<Item = Result<S>> + Send>>;

/// A listener refused at setup degrades like one denied mid-stream: the
/// denial becomes the stream's only item.
fn degrade_if_denied<S: Send + 'static>(
    setup: Result<ListenerStream<S>>,
) -> Result<ListenerStream<S>> {
    match setup {
        Err(e) if e.is_permission_denied() => Ok(Box::pin(tokio_stream::once(Err(e)))),
        other => other,
    }
}

fn spawn_listener<S, D>(
    label: String,
    mut stream: ListenerStream<S>,
    on_error: ErrorCallback,
    mut deliver: D,
) -> Subscription
where
    S: Default + Send + 'static,
    D: FnMut(S) -> Result<()> + Send + 'static,
{
    let shared = Arc::new(ListenerShared {
        label: label.clone(),
        state: Mutex::new(SubscriptionState::Active),
        terminated: AtomicBool::new(false),
        task: Mutex::new(None),
    });

    let task_shared = Arc::clone(&shared);
    let task = tokio::spawn(async move {
        let mut error_reported = false;
        let mut degraded_logged = false;

        while let Some(item) = stream.next().await {
            if task_shared.is_terminated() {
                break;
            }
            let outcome = item.and_then(&mut deliver);
            match outcome {
                Ok(()) => {}
                Err(e) if e.is_permission_denied() => {
                    if !degraded_logged {
                        tracing::warn!(
                            "[DocumentStore] permission denied on {}, serving empty results: {}",
                            label,
                            e
                        );
                        degraded_logged = true;
                    }
                    task_shared.set_state(SubscriptionState::Degraded);
                    if let Err(e) = deliver(S::default()) {
                        tracing::debug!(
                            "[DocumentStore] empty snapshot rejected on {}: {}",
                            label,
                            e
                        );
                    }
                }
                Err(e) => {
                    if error_reported {
                        tracing::debug!(
                            "[DocumentStore] suppressed repeat error on {}: {}",
                            label,
                            e
                        );
                        continue;
                    }
                    error_reported = true;
                    task_shared.set_state(SubscriptionState::Errored);
                    tracing::error!("[DocumentStore] listener {} failed: {}", label, e);
                    on_error(e);
                }
            }
        }
        tracing::debug!("[DocumentStore] listener stream {} ended", label);
    });

    *shared.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    Subscription { shared }
}
