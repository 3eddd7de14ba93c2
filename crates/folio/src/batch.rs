//! Ownership-checked bulk mutations.
//!
//! Every candidate is fetched and its owner field compared with the caller
//! before it is staged. Missing records are skipped. A record owned by
//! someone else halts the whole operation: writes staged but not yet
//! committed are discarded and nothing after it is looked at.
//!
//! Staged writes are committed in atomic groups of at most
//! `group_limit` operations, one group at a time. Groups are not atomic with
//! each other, so a failure reports what already committed.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use folio_api::{
    Collection, Fields, Hierarchical, OwnedRecord, StoreError, Value, UPDATED_AT_FIELD,
};
use folio_core::{BatchWrite, WriteBatch};

use crate::config::BatchConfig;
use crate::store::DocumentStore;

/// New position of one hierarchical record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderItem {
    pub id: String,
    pub order: i64,
    pub parent_id: Option<String>,
}

impl ReorderItem {
    pub fn new(id: impl Into<String>, order: i64, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            order,
            parent_id,
        }
    }
}

/// What a bulk mutation committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records written, summed over committed groups.
    pub committed: usize,
    pub groups_committed: usize,
    /// Candidates that no longer existed.
    pub skipped_not_found: Vec<String>,
}

/// A bulk mutation stopped early. `report` covers the groups that did commit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("batch stopped after committing {} records: {error}", .report.committed)]
pub struct BatchFailure {
    #[source]
    pub error: StoreError,
    pub report: BatchReport,
    /// The candidate being checked when the operation stopped; `None` when a
    /// group commit failed.
    pub halted_at: Option<String>,
}

impl BatchFailure {
    pub fn is_authorization(&self) -> bool {
        matches!(self.error, StoreError::AuthorizationDenied { .. })
    }
}

/// Failure before anything was staged.
impl From<StoreError> for BatchFailure {
    fn from(error: StoreError) -> Self {
        Self {
            error,
            report: BatchReport::default(),
            halted_at: None,
        }
    }
}

pub struct BatchMutationEngine {
    store: Arc<DocumentStore>,
    group_limit: usize,
}

impl BatchMutationEngine {
    /// The effective group size never exceeds the backend's own ceiling.
    pub fn new(store: Arc<DocumentStore>, config: &BatchConfig) -> Self {
        let group_limit = config
            .max_group_size
            .min(store.backend().max_batch_operations())
            .max(1);
        Self { store, group_limit }
    }

    pub fn group_limit(&self) -> usize {
        self.group_limit
    }

    /// Delete every id owned by `owner_id`. Repeated ids count once.
    #[tracing::instrument(
        skip(self, ids),
        fields(collection = %T::COLLECTION, candidates = ids.len())
    )]
    pub async fn batch_delete<T: OwnedRecord>(
        &self,
        ids: &[String],
        owner_id: &str,
    ) -> Result<BatchReport, BatchFailure> {
        let writes = ids.iter().map(|id| BatchWrite::Delete {
            collection: T::COLLECTION,
            id: id.clone(),
        });
        let report = self
            .run(T::COLLECTION, T::OWNER_FIELD, owner_id, writes)
            .await?;
        tracing::info!(
            "[BatchMutationEngine] deleted {} {} in {} groups ({} already gone)",
            report.committed,
            T::COLLECTION,
            report.groups_committed,
            report.skipped_not_found.len()
        );
        Ok(report)
    }

    /// Move records to new positions (`order`, `parentId`) and stamp `updatedAt`.
    #[tracing::instrument(
        skip(self, items),
        fields(collection = %T::COLLECTION, candidates = items.len())
    )]
    pub async fn batch_reorder<T: Hierarchical>(
        &self,
        items: &[ReorderItem],
        owner_id: &str,
    ) -> Result<BatchReport, BatchFailure> {
        let now = Value::DateTime(Utc::now());
        let writes = items.iter().map(|item| {
            let parent = item
                .parent_id
                .clone()
                .map_or(Value::Null, Value::String);
            let fields = Fields::from([
                (T::ORDER_FIELD.to_string(), Value::Integer(item.order)),
                (T::PARENT_FIELD.to_string(), parent),
                (UPDATED_AT_FIELD.to_string(), now.clone()),
            ]);
            BatchWrite::Update {
                collection: T::COLLECTION,
                id: item.id.clone(),
                fields,
            }
        });
        let report = self
            .run(T::COLLECTION, T::OWNER_FIELD, owner_id, writes)
            .await?;
        tracing::info!(
            "[BatchMutationEngine] reordered {} {} in {} groups",
            report.committed,
            T::COLLECTION,
            report.groups_committed
        );
        Ok(report)
    }

    async fn run(
        &self,
        collection: Collection,
        owner_field: &str,
        owner_id: &str,
        writes: impl Iterator<Item = BatchWrite>,
    ) -> Result<BatchReport, BatchFailure> {
        let mut report = BatchReport::default();
        let mut group = WriteBatch::new();
        let mut seen = HashSet::new();

        for write in writes {
            let id = write.id().to_string();
            if !seen.insert(id.clone()) {
                continue;
            }

            let document = match self.store.get_document(collection, &id).await {
                Ok(document) => document,
                Err(error) => {
                    return Err(BatchFailure {
                        error,
                        report,
                        halted_at: Some(id),
                    })
                }
            };
            let Some(document) = document else {
                tracing::debug!("[BatchMutationEngine] {}/{} not found, skipping", collection, id);
                report.skipped_not_found.push(id);
                continue;
            };
            if document.str_field(owner_field) != Some(owner_id) {
                tracing::warn!(
                    "[BatchMutationEngine] {}/{} is not owned by {}, discarding {} staged writes",
                    collection,
                    id,
                    owner_id,
                    group.len()
                );
                return Err(BatchFailure {
                    error: StoreError::not_owner(collection.name(), &id),
                    report,
                    halted_at: Some(id),
                });
            }

            group.push(write);
            if group.len() >= self.group_limit {
                self.commit_group(&mut group, &mut report).await?;
            }
        }

        if !group.is_empty() {
            self.commit_group(&mut group, &mut report).await?;
        }
        Ok(report)
    }

    async fn commit_group(
        &self,
        group: &mut WriteBatch,
        report: &mut BatchReport,
    ) -> Result<(), BatchFailure> {
        let batch = std::mem::take(group);
        let size = batch.len();
        match self.store.commit(batch).await {
            Ok(()) => {
                report.committed += size;
                report.groups_committed += 1;
                tracing::debug!(
                    "[BatchMutationEngine] group {} committed ({} writes)",
                    report.groups_committed,
                    size
                );
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    "[BatchMutationEngine] group {} failed after {} committed: {}",
                    report.groups_committed + 1,
                    report.committed,
                    error
                );
                Err(BatchFailure {
                    error,
                    report: report.clone(),
                    halted_at: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::MemoryDocumentBackend;
    use crate::retry::RetryPolicy;
    use folio_api::{ContentItem, JobQueueItem};
    use folio_core::SessionIdentity;

    fn engine(backend: &MemoryDocumentBackend, max_group_size: usize) -> BatchMutationEngine {
        let store = DocumentStore::new(
            Arc::new(backend.clone()),
            Arc::new(SessionIdentity::signed_in("u1")),
            RetryPolicy::none(),
        );
        BatchMutationEngine::new(Arc::new(store), &BatchConfig { max_group_size })
    }

    fn owned(owner: &str) -> Fields {
        Fields::from([
            ("userId".to_string(), Value::from(owner)),
            ("type".to_string(), Value::from("company")),
            ("order".to_string(), Value::from(0)),
        ])
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_group_limit_is_capped_by_backend() {
        let backend = MemoryDocumentBackend::new().with_max_batch_operations(10);
        assert_eq!(engine(&backend, 500).group_limit(), 10);
        assert_eq!(engine(&backend, 3).group_limit(), 3);
    }

    #[tokio::test]
    async fn test_missing_ids_are_skipped() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        backend.seed(Collection::ContentItems, "a", owned("u1"));

        let report = engine(&backend, 500)
            .batch_delete::<ContentItem>(&ids(&["a", "ghost"]), "u1")
            .await?;

        assert_eq!(report.committed, 1);
        assert_eq!(report.skipped_not_found, vec!["ghost".to_string()]);
        assert_eq!(backend.count(Collection::ContentItems), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_foreign_record_discards_staged_writes() {
        let backend = MemoryDocumentBackend::new();
        for id in ["a", "b", "d"] {
            backend.seed(Collection::ContentItems, id, owned("u1"));
        }
        backend.seed(Collection::ContentItems, "c", owned("intruder"));

        let failure = engine(&backend, 2)
            .batch_delete::<ContentItem>(&ids(&["a", "b", "c", "d"]), "u1")
            .await
            .unwrap_err();

        assert!(failure.is_authorization());
        assert_eq!(failure.halted_at.as_deref(), Some("c"));
        assert_eq!(failure.report.committed, 2);
        assert_eq!(failure.report.groups_committed, 1);
        // a and b went out in the first group; d was never looked at.
        assert!(backend.raw(Collection::ContentItems, "d").is_some());
        assert_eq!(backend.count(Collection::ContentItems), 2);
    }

    #[tokio::test]
    async fn test_foreign_record_in_partial_group_commits_nothing() {
        let backend = MemoryDocumentBackend::new();
        backend.seed(Collection::ContentItems, "a", owned("u1"));
        backend.seed(Collection::ContentItems, "b", owned("intruder"));

        let failure = engine(&backend, 500)
            .batch_delete::<ContentItem>(&ids(&["a", "b"]), "u1")
            .await
            .unwrap_err();

        assert_eq!(failure.report, BatchReport::default());
        assert_eq!(backend.count(Collection::ContentItems), 2);
        assert!(backend.commit_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_owner_field_follows_record_type() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        backend.seed(
            Collection::JobQueue,
            "j1",
            Fields::from([("submittedBy".to_string(), Value::from("u1"))]),
        );

        let report = engine(&backend, 500)
            .batch_delete::<JobQueueItem>(&ids(&["j1", "j1"]), "u1")
            .await?;
        assert_eq!(report.committed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reorder_sets_position_and_stamp() -> anyhow::Result<()> {
        let backend = MemoryDocumentBackend::new();
        backend.seed(Collection::ContentItems, "p", owned("u1"));
        backend.seed(Collection::ContentItems, "a", owned("u1"));

        let report = engine(&backend, 500)
            .batch_reorder::<ContentItem>(
                &[
                    ReorderItem::new("a", 7, Some("p".into())),
                    ReorderItem::new("p", 1, None),
                ],
                "u1",
            )
            .await?;
        assert_eq!(report.committed, 2);

        let a = backend.raw(Collection::ContentItems, "a").unwrap();
        assert_eq!(a.get("order"), Some(&Value::Integer(7)));
        assert_eq!(a.get("parentId"), Some(&Value::from("p")));
        assert!(a.get("updatedAt").is_some_and(Value::is_timestamp));
        let p = backend.raw(Collection::ContentItems, "p").unwrap();
        assert_eq!(p.get("parentId"), Some(&Value::Null));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_failure_halts_at_candidate() {
        let backend = MemoryDocumentBackend::new();
        for id in ["a", "b", "c"] {
            backend.seed(Collection::ContentItems, id, owned("u1"));
        }
        let engine = engine(&backend, 2);
        backend.fail_next(StoreError::Internal {
            message: "boom".into(),
        });
        let failure = engine
            .batch_delete::<ContentItem>(&ids(&["a", "b", "c"]), "u1")
            .await
            .unwrap_err();

        // The injected fault hits the first round trip, the read of "a".
        assert_eq!(failure.halted_at.as_deref(), Some("a"));
        assert_eq!(failure.report.committed, 0);
        assert_eq!(backend.count(Collection::ContentItems), 3);
    }
}
