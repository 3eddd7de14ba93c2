//! Shared live queries
//!
//! Consumers that watch the same query share one backend listener. Each
//! `acquire` takes a lease and bumps the entry's reference count; the
//! listener is torn down when the last lease is released or the entry is
//! cleared.
//!
//! A late joiner immediately receives the entry's last-known snapshot. Leases
//! remember the generation of the entry they joined, so a lease that outlives
//! a `clear` never touches a newer entry under the same key.
//!
//! The entry map is guarded by a std mutex that is never held across an
//! `.await` or a consumer callback.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use folio_api::{
    cache_key, Collection, CollectionSchema, Constraints, Document, Record, StoreError,
    StoreResult as Result,
};

use crate::codec;
use crate::store::{DocumentStore, Subscription};

type DataCallback = Arc<dyn Fn(Arc<Vec<Document>>) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

#[derive(Clone)]
struct Consumer {
    on_data: DataCallback,
    on_error: ErrorCallback,
}

struct CacheEntry {
    generation: u64,
    consumers: BTreeMap<u64, Consumer>,
    last_data: Option<Arc<Vec<Document>>>,
    updated_at: Option<DateTime<Utc>>,
    /// `None` while the listener is being established.
    subscription: Option<Subscription>,
}

impl CacheEntry {
    fn ref_count(&self) -> usize {
        self.consumers.len()
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    next_generation: u64,
    next_consumer: u64,
}

type SharedInner = Arc<Mutex<CacheInner>>;

fn lock(inner: &Mutex<CacheInner>) -> MutexGuard<'_, CacheInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cache of live queries keyed by [`cache_key`] (or a caller-chosen key).
pub struct SubscriptionCache {
    store: Arc<DocumentStore>,
    inner: SharedInner,
}

impl SubscriptionCache {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    /// Join (or establish) the live query `T::COLLECTION` + `constraints`.
    ///
    /// `key` overrides the derived cache key. `on_data` receives decoded
    /// snapshots; a snapshot that fails to decode goes to `on_error`.
    pub async fn acquire<T, F, E>(
        &self,
        key: Option<String>,
        constraints: Constraints,
        on_data: F,
        on_error: E,
    ) -> Result<CacheLease>
    where
        T: CollectionSchema,
        F: Fn(Vec<Record<T>>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        let on_error: ErrorCallback = Arc::new(on_error);
        let decode_error = Arc::clone(&on_error);
        let on_data: DataCallback = Arc::new(move |docs: Arc<Vec<Document>>| {
            match codec::decode_all::<T>(docs.as_ref().clone()) {
                Ok(records) => on_data(records),
                Err(e) => decode_error(e),
            }
        });
        self.acquire_consumer(
            T::COLLECTION,
            key,
            constraints,
            Consumer { on_data, on_error },
        )
        .await
    }

    /// Untyped variant of [`acquire`](Self::acquire). Snapshots are shared, not copied.
    pub async fn acquire_documents<F, E>(
        &self,
        collection: Collection,
        key: Option<String>,
        constraints: Constraints,
        on_data: F,
        on_error: E,
    ) -> Result<CacheLease>
    where
        F: Fn(Arc<Vec<Document>>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        let consumer = Consumer {
            on_data: Arc::new(on_data),
            on_error: Arc::new(on_error),
        };
        self.acquire_consumer(collection, key, constraints, consumer)
            .await
    }

    async fn acquire_consumer(
        &self,
        collection: Collection,
        key: Option<String>,
        constraints: Constraints,
        consumer: Consumer,
    ) -> Result<CacheLease> {
        if self.store.is_disposed() {
            return Err(StoreError::Disposed);
        }
        constraints.validate()?;
        let key = key.unwrap_or_else(|| cache_key(collection, &constraints));

        let (generation, consumer_id, cached, is_new) = {
            let mut inner = lock(&self.inner);
            let consumer_id = inner.next_consumer;
            inner.next_consumer += 1;

            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.consumers.insert(consumer_id, consumer.clone());
                (entry.generation, consumer_id, entry.last_data.clone(), false)
            } else {
                let generation = inner.next_generation;
                inner.next_generation += 1;
                inner.entries.insert(
                    key.clone(),
                    CacheEntry {
                        generation,
                        consumers: BTreeMap::from([(consumer_id, consumer.clone())]),
                        last_data: None,
                        updated_at: None,
                        subscription: None,
                    },
                );
                (generation, consumer_id, None, true)
            }
        };

        let lease = CacheLease {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            generation,
            consumer_id,
            released: AtomicBool::new(false),
        };

        if !is_new {
            tracing::debug!("[SubscriptionCache] joined {} (consumer {})", key, consumer_id);
            if let Some(data) = cached {
                (consumer.on_data)(data);
            }
            return Ok(lease);
        }

        tracing::debug!("[SubscriptionCache] establishing listener for {}", key);
        let data_inner = Arc::downgrade(&self.inner);
        let data_key = key.clone();
        let error_inner = Arc::downgrade(&self.inner);
        let error_key = key.clone();
        let subscribed = self
            .store
            .subscribe_documents(
                collection,
                &constraints,
                move |docs| fan_out_data(&data_inner, &data_key, generation, docs),
                move |e| fan_out_error(&error_inner, &error_key, generation, e),
            )
            .await;

        match subscribed {
            Ok(subscription) => {
                let orphan = {
                    let mut inner = lock(&self.inner);
                    match inner.entries.get_mut(&key) {
                        Some(entry) if entry.generation == generation => {
                            entry.subscription = Some(subscription);
                            None
                        }
                        // Released or cleared while the listener was being set up.
                        _ => Some(subscription),
                    }
                };
                if let Some(orphan) = orphan {
                    orphan.unsubscribe();
                }
                Ok(lease)
            }
            Err(e) => {
                lease.released.store(true, Ordering::SeqCst);
                let others: Vec<Consumer> = {
                    let mut inner = lock(&self.inner);
                    let failed = matches!(
                        inner.entries.get(&key),
                        Some(entry) if entry.generation == generation
                    );
                    if failed {
                        inner
                            .entries
                            .remove(&key)
                            .map(|entry| {
                                entry
                                    .consumers
                                    .into_iter()
                                    .filter(|(id, _)| *id != consumer_id)
                                    .map(|(_, c)| c)
                                    .collect()
                            })
                            .unwrap_or_default()
                    } else {
                        Vec::new()
                    }
                };
                tracing::warn!("[SubscriptionCache] failed to establish {}: {}", key, e);
                for other in others {
                    (other.on_error)(e.clone());
                }
                Err(e)
            }
        }
    }

    /// Tear down one entry, or every entry with `None`.
    pub fn clear(&self, key: Option<&str>) {
        let removed: Vec<(String, CacheEntry)> = {
            let mut inner = lock(&self.inner);
            match key {
                Some(key) => inner
                    .entries
                    .remove_entry(key)
                    .into_iter()
                    .collect(),
                None => inner.entries.drain().collect(),
            }
        };
        for (key, entry) in removed {
            tracing::debug!(
                "[SubscriptionCache] cleared {} ({} leases outstanding)",
                key,
                entry.ref_count()
            );
            if let Some(subscription) = entry.subscription {
                subscription.unsubscribe();
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner).entries.contains_key(key)
    }

    /// Outstanding leases on `key`; 0 if there is no entry.
    pub fn ref_count(&self, key: &str) -> usize {
        lock(&self.inner)
            .entries
            .get(key)
            .map_or(0, CacheEntry::ref_count)
    }

    pub fn last_data(&self, key: &str) -> Option<Arc<Vec<Document>>> {
        lock(&self.inner)
            .entries
            .get(key)
            .and_then(|entry| entry.last_data.clone())
    }

    /// When the entry last received a snapshot.
    pub fn updated_at(&self, key: &str) -> Option<DateTime<Utc>> {
        lock(&self.inner)
            .entries
            .get(key)
            .and_then(|entry| entry.updated_at)
    }
}

impl Drop for SubscriptionCache {
    fn drop(&mut self) {
        self.clear(None);
    }
}

fn fan_out_data(inner: &Weak<Mutex<CacheInner>>, key: &str, generation: u64, docs: Vec<Document>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let data = Arc::new(docs);
    let consumers: Vec<DataCallback> = {
        let mut inner = lock(&inner);
        match inner.entries.get_mut(key) {
            Some(entry) if entry.generation == generation => {
                entry.last_data = Some(Arc::clone(&data));
                entry.updated_at = Some(Utc::now());
                entry
                    .consumers
                    .values()
                    .map(|c| Arc::clone(&c.on_data))
                    .collect()
            }
            _ => return,
        }
    };
    for on_data in consumers {
        on_data(Arc::clone(&data));
    }
}

fn fan_out_error(inner: &Weak<Mutex<CacheInner>>, key: &str, generation: u64, error: StoreError) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let consumers: Vec<ErrorCallback> = {
        let inner = lock(&inner);
        match inner.entries.get(key) {
            Some(entry) if entry.generation == generation => entry
                .consumers
                .values()
                .map(|c| Arc::clone(&c.on_error))
                .collect(),
            _ => return,
        }
    };
    for on_error in consumers {
        on_error(error.clone());
    }
}

/// One consumer's share of a cached live query.
///
/// Released explicitly with [`release`](Self::release) or on drop.
pub struct CacheLease {
    inner: Weak<Mutex<CacheInner>>,
    key: String,
    generation: u64,
    consumer_id: u64,
    released: AtomicBool,
}

impl CacheLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stop this consumer's callbacks. The last release tears the listener
    /// down. Calling it again is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let teardown = {
            let mut inner = lock(&inner);
            let Some(entry) = inner.entries.get_mut(&self.key) else {
                return;
            };
            if entry.generation != self.generation {
                return;
            }
            entry.consumers.remove(&self.consumer_id);
            if entry.consumers.is_empty() {
                inner
                    .entries
                    .remove(&self.key)
                    .and_then(|entry| entry.subscription)
            } else {
                None
            }
        };
        if let Some(subscription) = teardown {
            tracing::debug!("[SubscriptionCache] last lease on {} released", self.key);
            subscription.unsubscribe();
        }
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CacheLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLease")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("released", &self.is_released())
            .finish()
    }
}
