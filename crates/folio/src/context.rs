//! Explicitly constructed and disposed wiring of the data layer.

use std::sync::Arc;

use folio_api::StoreResult;
use folio_core::{DocumentBackend, IdentityProvider};

use crate::batch::BatchMutationEngine;
use crate::config::{ConfigError, FolioConfig};
use crate::services::{ContentItemService, JobQueueService};
use crate::store::DocumentStore;
use crate::subscription_cache::SubscriptionCache;

/// Store, cache, batch engine and services sharing one backend and identity.
///
/// Hosts may create several contexts (per account, per test); nothing is global.
pub struct FolioContext {
    config: FolioConfig,
    store: Arc<DocumentStore>,
    cache: Arc<SubscriptionCache>,
    batch: Arc<BatchMutationEngine>,
    content_items: ContentItemService,
    job_queue: JobQueueService,
}

impl FolioContext {
    pub fn init(
        backend: Arc<dyn DocumentBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: FolioConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = Arc::new(DocumentStore::new(backend, identity, config.retry.policy()));
        let cache = Arc::new(SubscriptionCache::new(Arc::clone(&store)));
        let batch = Arc::new(BatchMutationEngine::new(Arc::clone(&store), &config.batch));
        let content_items = ContentItemService::new(Arc::clone(&store), Arc::clone(&batch));
        let job_queue = JobQueueService::new(Arc::clone(&store), Arc::clone(&cache));

        tracing::info!(
            "[FolioContext] initialized (retry {}x from {}ms, batch groups of {})",
            config.retry.max_attempts,
            config.retry.base_delay_ms,
            batch.group_limit()
        );

        Ok(Self {
            config,
            store,
            cache,
            batch,
            content_items,
            job_queue,
        })
    }

    pub fn config(&self) -> &FolioConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<SubscriptionCache> {
        &self.cache
    }

    pub fn batch(&self) -> &Arc<BatchMutationEngine> {
        &self.batch
    }

    pub fn content_items(&self) -> &ContentItemService {
        &self.content_items
    }

    pub fn job_queue(&self) -> &JobQueueService {
        &self.job_queue
    }

    /// Tear down every cached listener and release the backend. Later
    /// operations fail with `Disposed`.
    pub async fn dispose(&self) -> StoreResult<()> {
        self.cache.clear(None);
        self.store.dispose().await?;
        tracing::info!("[FolioContext] disposed");
        Ok(())
    }
}
