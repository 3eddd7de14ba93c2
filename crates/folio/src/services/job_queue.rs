//! Job postings submitted by the signed-in user for analysis.

use chrono::Utc;
use std::sync::Arc;

use folio_api::{
    CollectionSchema, Constraints, Direction, Fields, JobQueueItem, JobStatus, OwnedRecord,
    Record, StoreError, StoreResult as Result, Value, CREATED_AT_FIELD,
};

use crate::store::DocumentStore;
use crate::subscription_cache::{CacheLease, SubscriptionCache};

pub struct JobQueueService {
    store: Arc<DocumentStore>,
    cache: Arc<SubscriptionCache>,
}

impl JobQueueService {
    pub fn new(store: Arc<DocumentStore>, cache: Arc<SubscriptionCache>) -> Self {
        Self { store, cache }
    }

    /// Queue a posting as `pending`.
    pub async fn submit(&self, url: &str, company_name: Option<String>) -> Result<String> {
        let user_id = self.store.require_user()?;
        let url = url.trim();
        if url.is_empty() {
            return Err(StoreError::invalid("job url must not be empty"));
        }

        let item = JobQueueItem {
            submitted_by: user_id,
            url: url.to_string(),
            company_name,
            status: JobStatus::Pending,
            result_message: None,
            retry_count: 0,
            processed_at: None,
            completed_at: None,
        };
        let id = self.store.create_owned(&item).await?;
        tracing::info!("[JobQueueService] queued {} as {}", item.url, id);
        Ok(id)
    }

    /// The user's jobs, newest first, optionally restricted to one status.
    pub async fn list_mine(&self, status: Option<JobStatus>) -> Result<Vec<Record<JobQueueItem>>> {
        let user_id = self.store.require_user()?;
        let mut constraints = Constraints::new().where_eq(JobQueueItem::OWNER_FIELD, user_id);
        if let Some(status) = status {
            constraints = constraints.where_eq("status", status.as_str());
        }
        let constraints = constraints.order_by(CREATED_AT_FIELD, Direction::Descending);
        self.store.list::<JobQueueItem>(&constraints).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record<JobQueueItem>>> {
        self.store.get_owned::<JobQueueItem>(id).await
    }

    /// Move a job to `status`. Entering `processing` stamps `processedAt`;
    /// reaching a terminal status stamps `completedAt`.
    pub async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        result_message: Option<String>,
    ) -> Result<()> {
        let now = Value::DateTime(Utc::now());
        let mut patch = Fields::new();
        patch.insert("status".to_string(), Value::from(status.as_str()));
        if let Some(message) = result_message {
            patch.insert("resultMessage".to_string(), Value::String(message));
        }
        if status == JobStatus::Processing {
            patch.insert("processedAt".to_string(), now.clone());
        }
        if status.is_terminal() {
            patch.insert("completedAt".to_string(), now);
        }
        self.store.update_owned::<JobQueueItem>(id, patch).await?;
        tracing::debug!("[JobQueueService] {} -> {}", id, status.as_str());
        Ok(())
    }

    /// Put a failed or skipped job back to `pending` and bump its retry count.
    pub async fn requeue(&self, id: &str) -> Result<()> {
        let Some(record) = self.get(id).await? else {
            return Err(StoreError::not_found(JobQueueItem::COLLECTION.name(), id));
        };
        if !matches!(record.data.status, JobStatus::Failed | JobStatus::Skipped) {
            return Err(StoreError::invalid(format!(
                "only failed or skipped jobs can be requeued, {} is {}",
                id,
                record.data.status.as_str()
            )));
        }
        let patch = Fields::from([
            ("status".to_string(), Value::from(JobStatus::Pending.as_str())),
            (
                "retryCount".to_string(),
                Value::from(i64::from(record.data.retry_count) + 1),
            ),
            ("resultMessage".to_string(), Value::Null),
        ]);
        self.store.update_owned::<JobQueueItem>(id, patch).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store.remove_owned::<JobQueueItem>(id).await
    }

    /// Shared live view of the user's jobs in `status`. Every watcher of the
    /// same status shares one listener.
    pub async fn watch_status<F, E>(
        &self,
        status: JobStatus,
        on_data: F,
        on_error: E,
    ) -> Result<CacheLease>
    where
        F: Fn(Vec<Record<JobQueueItem>>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        let user_id = self.store.require_user()?;
        let constraints = Constraints::new()
            .where_eq("status", status.as_str())
            .where_eq(JobQueueItem::OWNER_FIELD, user_id);
        self.cache
            .acquire::<JobQueueItem, _, _>(None, constraints, on_data, on_error)
            .await
    }
}
