//! Collaborator traits consumed by the folio data layer.
//!
//! - `DocumentBackend`: the remote document store (queries, listeners, atomic batches)
//! - `IdentityProvider`: who is acting, for audit stamps and ownership checks

pub mod backend;
pub mod identity;

pub use backend::{
    BatchWrite, DocumentBackend, DocumentStream, MaybeSendSync, SnapshotStream, WriteBatch,
    MAX_BATCH_OPERATIONS,
};
pub use identity::{IdentityProvider, SessionIdentity};

pub use folio_api::{StoreError, StoreResult as Result};
