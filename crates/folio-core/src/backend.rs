use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

use folio_api::{Collection, Constraints, Document, Fields, StoreResult as Result};

/// Per-commit operation ceiling of the backing store.
pub const MAX_BATCH_OPERATIONS: usize = 500;

// Define MaybeSendSync trait alias for WASM compatibility
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSendSync: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> MaybeSendSync for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSendSync {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeSendSync for T {}

/// Full result set of a query, re-sent on every change.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Vec<Document>>> + Send>>;

/// Single document, re-sent on every change (`None` once it is gone).
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Option<Document>>> + Send>>;

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    Set {
        collection: Collection,
        id: String,
        fields: Fields,
        merge: bool,
    },
    Update {
        collection: Collection,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

impl BatchWrite {
    pub fn collection(&self) -> Collection {
        match self {
            BatchWrite::Set { collection, .. }
            | BatchWrite::Update { collection, .. }
            | BatchWrite::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BatchWrite::Set { id, .. }
            | BatchWrite::Update { id, .. }
            | BatchWrite::Delete { id, .. } => id,
        }
    }
}

/// Writes committed together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
        fields: Fields,
        merge: bool,
    ) {
        self.writes.push(BatchWrite::Set {
            collection,
            id: id.into(),
            fields,
            merge,
        });
    }

    pub fn update(&mut self, collection: Collection, id: impl Into<String>, fields: Fields) {
        self.writes.push(BatchWrite::Update {
            collection,
            id: id.into(),
            fields,
        });
    }

    pub fn delete(&mut self, collection: Collection, id: impl Into<String>) {
        self.writes.push(BatchWrite::Delete {
            collection,
            id: id.into(),
        });
    }

    pub fn push(&mut self, write: BatchWrite) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[BatchWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<BatchWrite> {
        self.writes
    }
}

/// Remote document store.
///
/// Values returned by reads and listeners may contain store-native types
/// (`Value::Timestamp`); the layer normalizes them. Writes may contain
/// `Value::DateTime`, which the backend stores in its native form.
///
/// Error mapping expected from implementations:
/// - missing document on `update` → `StoreError::NotFound`
/// - rule rejection → `StoreError::PermissionDenied`
/// - connectivity problems → `StoreError::Unavailable` / `DeadlineExceeded`
/// - batch above `max_batch_operations()` → `StoreError::BatchLimitExceeded`
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DocumentBackend: MaybeSendSync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>>;

    async fn query(&self, collection: Collection, constraints: &Constraints)
        -> Result<Vec<Document>>;

    /// Insert with a backend-assigned id.
    async fn add(&self, collection: Collection, fields: Fields) -> Result<String>;

    /// Write a document under `id`. Without `merge` the previous content is replaced.
    async fn set(&self, collection: Collection, id: &str, fields: Fields, merge: bool)
        -> Result<()>;

    /// Merge `fields` into an existing document.
    async fn update(&self, collection: Collection, id: &str, fields: Fields) -> Result<()>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// Apply every write atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Live query. The first item is the current result set.
    async fn listen(&self, collection: Collection, constraints: &Constraints)
        -> Result<SnapshotStream>;

    /// Live single document. The first item is the current state.
    async fn listen_document(&self, collection: Collection, id: &str) -> Result<DocumentStream>;

    fn max_batch_operations(&self) -> usize {
        MAX_BATCH_OPERATIONS
    }

    /// Release connections and listeners.
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
