//! User-scoped facades over the store, cache and batch engine.

pub mod content_items;
pub mod job_queue;

pub use content_items::{ContentItemService, ContentTree};
pub use job_queue::JobQueueService;
