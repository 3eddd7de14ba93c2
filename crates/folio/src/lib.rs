//! Client-side synchronization and mutation layer over a remote document store.

pub mod batch;
pub mod codec;
pub mod config;
pub mod context;
pub mod hierarchy;
pub mod logging;
pub mod memory_backend;
pub mod normalize;
pub mod retry;
pub mod services;
pub mod store;
pub mod subscription_cache;

pub use batch::{BatchFailure, BatchMutationEngine, BatchReport, ReorderItem};
pub use config::{BatchConfig, ConfigError, FolioConfig, RetryConfig};
pub use context::FolioContext;
pub use hierarchy::{build_hierarchy, calculate_stats, HierarchyNode, HierarchyStats, TreeNode};
pub use memory_backend::MemoryDocumentBackend;
pub use retry::{with_retry, RetryPolicy};
pub use store::{DocumentStore, Subscription, SubscriptionState};
pub use subscription_cache::{CacheLease, SubscriptionCache};
