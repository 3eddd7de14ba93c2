//! Shared types for the folio data layer: field values, documents, query
//! constraints, errors, and the collection→record registry.

pub mod collection;
pub mod document;
pub mod error;
pub mod query;
pub mod records;
pub mod value;

pub use collection::{Collection, CollectionSchema, Hierarchical, OwnedRecord};
pub use document::{Document, Record, CREATED_AT_FIELD, UPDATED_AT_FIELD};
pub use error::{ErrorClass, StoreError, StoreResult};
pub use query::{cache_key, Constraints, Direction, Filter, FilterOp, OrderBy};
pub use records::{
    ContentItem, ContentItemType, GeneratedDocumentType, GenerationStatus, GeneratorDocument,
    JobMatch, JobQueueItem, JobStatus, UserDefaults,
};
pub use value::{Fields, Value, WireTimestamp};
