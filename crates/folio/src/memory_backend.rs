//! In-memory implementation of [`DocumentBackend`]
//!
//! A HashMap-based store useful for:
//! - Unit and integration testing without a remote store
//! - Mocking in frontend development
//! - Reference behaviour for real backends (wire timestamps, snapshot
//!   listeners, atomic batches with an operation ceiling)
//!
//! Dates written by the layer are stored as [`WireTimestamp`]s, the way a
//! remote document store hands them back. Every mutation re-sends full
//! snapshots to the listeners of the touched collection.
//!
//! Fault injection (`fail_next`, `deny_listeners`, `emit_listener_error`)
//! lets tests drive the error paths of the layer.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use folio_api::{
    Collection, Constraints, Document, Fields, StoreError, StoreResult as Result, Value,
    WireTimestamp,
};
use folio_core::{
    BatchWrite, DocumentBackend, DocumentStream, SnapshotStream, WriteBatch, MAX_BATCH_OPERATIONS,
};

/// Buffered snapshots per listener. A listener that falls this far behind
/// misses intermediate snapshots.
const LISTENER_BUFFER: usize = 100;

enum ListenerTarget {
    Query {
        constraints: Constraints,
        tx: mpsc::Sender<Result<Vec<Document>>>,
    },
    Document {
        id: String,
        tx: mpsc::Sender<Result<Option<Document>>>,
    },
}

struct Listener {
    collection: Collection,
    target: ListenerTarget,
}

impl Listener {
    fn is_closed(&self) -> bool {
        match &self.target {
            ListenerTarget::Query { tx, .. } => tx.is_closed(),
            ListenerTarget::Document { tx, .. } => tx.is_closed(),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<Collection, BTreeMap<String, Fields>>,
    /// Counter for deterministic id generation
    next_id_counter: u64,
    listeners: Vec<Listener>,
    /// Errors returned by the next round trips, in order
    pending_faults: VecDeque<StoreError>,
    denied: HashSet<Collection>,
    listen_calls: usize,
    commit_sizes: Vec<usize>,
}

impl MemoryState {
    fn documents(&self, collection: Collection) -> impl Iterator<Item = Document> + '_ {
        self.collections
            .get(&collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
    }

    fn snapshot(&self, collection: Collection, constraints: &Constraints) -> Vec<Document> {
        constraints.apply(self.documents(collection))
    }

    fn document(&self, collection: Collection, id: &str) -> Option<Document> {
        self.collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone()))
    }

    /// Push fresh snapshots to the listeners of `touched` and forget closed ones.
    fn notify(&mut self, touched: &HashSet<Collection>) {
        self.listeners.retain(|listener| !listener.is_closed());

        for listener in &self.listeners {
            if !touched.contains(&listener.collection) {
                continue;
            }
            let denied = self.denied.contains(&listener.collection);
            let sent = match &listener.target {
                ListenerTarget::Query { constraints, tx } => {
                    let item = if denied {
                        Err(denial(listener.collection))
                    } else {
                        Ok(self.snapshot(listener.collection, constraints))
                    };
                    tx.try_send(item).is_ok()
                }
                ListenerTarget::Document { id, tx } => {
                    let item = if denied {
                        Err(denial(listener.collection))
                    } else {
                        Ok(self.document(listener.collection, id))
                    };
                    tx.try_send(item).is_ok()
                }
            };
            if !sent {
                tracing::warn!(
                    "[MemoryDocumentBackend] listener on {} is lagging, snapshot dropped",
                    listener.collection
                );
            }
        }
    }
}

fn denial(collection: Collection) -> StoreError {
    StoreError::permission_denied(format!(
        "Missing or insufficient permissions for {}",
        collection
    ))
}

/// Convert native dates to the store's timestamp type, recursively.
fn to_wire(value: Value) -> Value {
    match value {
        Value::DateTime(dt) => Value::Timestamp(WireTimestamp::from_datetime(dt)),
        Value::Array(items) => Value::Array(items.into_iter().map(to_wire).collect()),
        Value::Object(fields) => Value::Object(fields_to_wire(fields)),
        other => other,
    }
}

fn fields_to_wire(fields: Fields) -> Fields {
    fields.into_iter().map(|(k, v)| (k, to_wire(v))).collect()
}

/// In-memory document store with live listeners.
#[derive(Clone)]
pub struct MemoryDocumentBackend {
    state: Arc<Mutex<MemoryState>>,
    max_batch_operations: usize,
}

impl Default for MemoryDocumentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            max_batch_operations: MAX_BATCH_OPERATIONS,
        }
    }

    /// Use a smaller per-commit ceiling than the default 500.
    pub fn with_max_batch_operations(mut self, limit: usize) -> Self {
        self.max_batch_operations = limit.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_fault(state: &mut MemoryState) -> Result<()> {
        match state.pending_faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Store a document verbatim, bypassing the layer (no stamping, no
    /// date conversion). Used to seed fixtures in their wire shape.
    pub fn seed(&self, collection: Collection, id: impl Into<String>, fields: Fields) {
        let mut state = self.lock();
        state
            .collections
            .entry(collection)
            .or_default()
            .insert(id.into(), fields);
        state.notify(&HashSet::from([collection]));
    }

    /// Raw stored fields of a document.
    pub fn raw(&self, collection: Collection, id: &str) -> Option<Fields> {
        self.lock()
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.lock()
            .collections
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Queue an error for the next round trip. Queued errors are consumed in order.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().pending_faults.push_back(error);
    }

    /// Make every listener on `collection` fail with permission-denied.
    pub fn deny_listeners(&self, collection: Collection) {
        let mut state = self.lock();
        state.denied.insert(collection);
        state.notify(&HashSet::from([collection]));
    }

    pub fn allow_listeners(&self, collection: Collection) {
        let mut state = self.lock();
        state.denied.remove(&collection);
        state.notify(&HashSet::from([collection]));
    }

    /// Push `error` to every open listener on `collection`.
    pub fn emit_listener_error(&self, collection: Collection, error: StoreError) {
        let state = self.lock();
        for listener in state.listeners.iter().filter(|l| l.collection == collection) {
            // A full or closed channel just misses the error.
            match &listener.target {
                ListenerTarget::Query { tx, .. } => {
                    let _ = tx.try_send(Err(error.clone()));
                }
                ListenerTarget::Document { tx, .. } => {
                    let _ = tx.try_send(Err(error.clone()));
                }
            }
        }
    }

    /// Number of `listen`/`listen_document` calls so far.
    pub fn listen_calls(&self) -> usize {
        self.lock().listen_calls
    }

    /// Listeners whose consumer is still attached.
    pub fn active_listeners(&self) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|listener| !listener.is_closed())
            .count()
    }

    /// Sizes of the successfully committed batches, oldest first.
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.lock().commit_sizes.clone()
    }

    fn apply_write(
        collections: &mut HashMap<Collection, BTreeMap<String, Fields>>,
        write: BatchWrite,
    ) -> Result<()> {
        match write {
            BatchWrite::Set {
                collection,
                id,
                fields,
                merge,
            } => {
                let docs = collections.entry(collection).or_default();
                let fields = fields_to_wire(fields);
                match docs.get_mut(&id) {
                    Some(existing) if merge => existing.extend(fields),
                    _ => {
                        docs.insert(id, fields);
                    }
                }
                Ok(())
            }
            BatchWrite::Update {
                collection,
                id,
                fields,
            } => {
                let existing = collections
                    .get_mut(&collection)
                    .and_then(|docs| docs.get_mut(&id))
                    .ok_or_else(|| StoreError::not_found(collection.name(), &id))?;
                existing.extend(fields_to_wire(fields));
                Ok(())
            }
            BatchWrite::Delete { collection, id } => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(&id);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryDocumentBackend {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        Ok(state.document(collection, id))
    }

    async fn query(
        &self,
        collection: Collection,
        constraints: &Constraints,
    ) -> Result<Vec<Document>> {
        constraints.validate()?;
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        Ok(state.snapshot(collection, constraints))
    }

    async fn add(&self, collection: Collection, fields: Fields) -> Result<String> {
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        let id = format!("local://{}", state.next_id_counter);
        state.next_id_counter += 1;
        state
            .collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), fields_to_wire(fields));
        state.notify(&HashSet::from([collection]));
        Ok(id)
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<()> {
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        Self::apply_write(
            &mut state.collections,
            BatchWrite::Set {
                collection,
                id: id.to_string(),
                fields,
                merge,
            },
        )?;
        state.notify(&HashSet::from([collection]));
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<()> {
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        Self::apply_write(
            &mut state.collections,
            BatchWrite::Update {
                collection,
                id: id.to_string(),
                fields,
            },
        )?;
        state.notify(&HashSet::from([collection]));
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        let removed = Self::apply_write(
            &mut state.collections,
            BatchWrite::Delete {
                collection,
                id: id.to_string(),
            },
        );
        state.notify(&HashSet::from([collection]));
        removed
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.len() > self.max_batch_operations {
            return Err(StoreError::BatchLimitExceeded {
                size: batch.len(),
                limit: self.max_batch_operations,
            });
        }
        let mut state = self.lock();
        Self::take_fault(&mut state)?;

        // Apply to a copy so a failing write leaves nothing behind.
        let mut staged = state.collections.clone();
        let size = batch.len();
        let mut touched = HashSet::new();
        for write in batch.into_writes() {
            touched.insert(write.collection());
            Self::apply_write(&mut staged, write)?;
        }
        state.collections = staged;
        state.commit_sizes.push(size);
        state.notify(&touched);
        tracing::debug!("[MemoryDocumentBackend] committed batch of {}", size);
        Ok(())
    }

    async fn listen(
        &self,
        collection: Collection,
        constraints: &Constraints,
    ) -> Result<SnapshotStream> {
        constraints.validate()?;
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        state.listen_calls += 1;

        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let initial = if state.denied.contains(&collection) {
            Err(denial(collection))
        } else {
            Ok(state.snapshot(collection, constraints))
        };
        // Fresh channel, cannot be full.
        let _ = tx.try_send(initial);
        state.listeners.push(Listener {
            collection,
            target: ListenerTarget::Query {
                constraints: constraints.clone(),
                tx,
            },
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn listen_document(&self, collection: Collection, id: &str) -> Result<DocumentStream> {
        let mut state = self.lock();
        Self::take_fault(&mut state)?;
        state.listen_calls += 1;

        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let initial = if state.denied.contains(&collection) {
            Err(denial(collection))
        } else {
            Ok(state.document(collection, id))
        };
        let _ = tx.try_send(initial);
        state.listeners.push(Listener {
            collection,
            target: ListenerTarget::Document {
                id: id.to_string(),
                tx,
            },
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn max_batch_operations(&self) -> usize {
        self.max_batch_operations
    }

    async fn dispose(&self) -> Result<()> {
        let mut state = self.lock();
        // Dropping the senders ends every listener stream.
        state.listeners.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tokio_stream::StreamExt;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_dates_are_stored_as_wire_timestamps() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        let when = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let id = backend
            .add(
                Collection::JobQueue,
                fields(&[("processedAt", Value::DateTime(when))]),
            )
            .await?;

        assert_eq!(id, "local://0");
        let raw = backend.raw(Collection::JobQueue, &id).unwrap();
        assert_eq!(
            raw.get("processedAt"),
            Some(&Value::Timestamp(WireTimestamp::from_datetime(when)))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_update_of_missing_document_is_not_found() {
        let backend = MemoryDocumentBackend::new();
        let err = backend
            .update(Collection::ContentItems, "nope", Fields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        backend.seed(Collection::ContentItems, "a", fields(&[("order", 1.into())]));

        let mut batch = WriteBatch::new();
        batch.delete(Collection::ContentItems, "a");
        batch.update(Collection::ContentItems, "missing", fields(&[("order", 2.into())]));
        assert!(backend.commit(batch).await.is_err());

        assert_eq!(backend.count(Collection::ContentItems), 1);
        assert!(backend.commit_sizes().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_above_ceiling_is_rejected() {
        let backend = MemoryDocumentBackend::new().with_max_batch_operations(2);
        let mut batch = WriteBatch::new();
        for id in ["a", "b", "c"] {
            batch.delete(Collection::ContentItems, id);
        }
        let err = backend.commit(batch).await.unwrap_err();
        assert_eq!(err, StoreError::BatchLimitExceeded { size: 3, limit: 2 });
    }

    #[tokio::test]
    async fn test_listener_receives_initial_and_changed_snapshots() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        let constraints = Constraints::new().where_eq("status", "pending");
        let mut stream = backend.listen(Collection::JobQueue, &constraints).await?;

        let first = stream.next().await.unwrap()?;
        assert!(first.is_empty());

        backend
            .set(Collection::JobQueue, "j1", fields(&[("status", "pending".into())]), false)
            .await?;
        backend
            .set(Collection::JobQueue, "j2", fields(&[("status", "failed".into())]), false)
            .await?;

        let second = stream.next().await.unwrap()?;
        assert_eq!(second.len(), 1);
        let third = stream.next().await.unwrap()?;
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].id, "j1");
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_stream_is_no_longer_active() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        let stream = backend.listen(Collection::JobQueue, &Constraints::new()).await?;
        assert_eq!(backend.active_listeners(), 1);
        drop(stream);
        assert_eq!(backend.active_listeners(), 0);
        assert_eq!(backend.listen_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed_once() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        backend.fail_next(StoreError::unavailable("offline"));
        assert!(backend.get(Collection::UserDefaults, "u1").await.is_err());
        assert!(backend.get(Collection::UserDefaults, "u1").await?.is_none());
        Ok(())
    }
}
