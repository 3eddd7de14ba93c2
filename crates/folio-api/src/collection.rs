//! Compile-time registry of collections and the record type each one stores.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Every collection the layer knows about.
///
/// Unknown names are rejected by [`Collection::from_name`] instead of
/// surfacing as a failure on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    ContentItems,
    JobQueue,
    JobMatches,
    GeneratorDocuments,
    UserDefaults,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::ContentItems,
        Collection::JobQueue,
        Collection::JobMatches,
        Collection::GeneratorDocuments,
        Collection::UserDefaults,
    ];

    /// Name used by the backing store.
    pub fn name(self) -> &'static str {
        match self {
            Collection::ContentItems => "content-items",
            Collection::JobQueue => "job-queue",
            Collection::JobMatches => "job-matches",
            Collection::GeneratorDocuments => "generator-documents",
            Collection::UserDefaults => "user-defaults",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, StoreError> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| StoreError::UnknownCollection {
                name: name.to_string(),
            })
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::from_name(s)
    }
}

/// Binds a record type to the one collection that stores it.
///
/// The type carries only caller-owned fields; `id`, `createdAt` and
/// `updatedAt` live on [`crate::Record`].
pub trait CollectionSchema: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;
}

/// Records whose mutation is gated on an owner field matching the acting identity.
pub trait OwnedRecord: CollectionSchema {
    /// Wire name of the owner field (`userId`, `submittedBy`).
    const OWNER_FIELD: &'static str;

    fn owner_id(&self) -> &str;
}

/// Owned records that form a tree through a same-collection parent reference.
pub trait Hierarchical: OwnedRecord {
    const PARENT_FIELD: &'static str = "parentId";
    const ORDER_FIELD: &'static str = "order";

    fn parent_id(&self) -> Option<&str>;
    fn order(&self) -> i64;

    /// Type label used when counting nodes.
    fn kind(&self) -> &str;
}
