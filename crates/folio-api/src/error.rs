use serde::{Deserialize, Serialize};

/// Coarse classification driving retry and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Record absent. Reads and batch paths turn this into `None` or a skip.
    NotFound,
    /// Ownership or permission failure. Never retried.
    Authorization,
    /// Network/availability failure. Retried with backoff.
    Transient,
    /// Backend failure with no better classification. Retried with backoff.
    Unknown,
    /// Caller bug or unrecoverable local state. Never retried.
    Fatal,
}

/// Structured error type for store operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Not owner of this item: {collection}/{id}")]
    AuthorizationDenied { collection: String, id: String },

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Deadline exceeded: {message}")]
    DeadlineExceeded { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Unknown collection: {name}")]
    UnknownCollection { name: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Cycle detected in hierarchy at record {id}")]
    CycleDetected { id: String },

    #[error("Batch of {size} operations exceeds the limit of {limit}")]
    BatchLimitExceeded { size: usize, limit: usize },

    #[error("Store has been disposed")]
    Disposed,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StoreError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn not_owner(collection: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::AuthorizationDenied {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        StoreError::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        StoreError::Internal {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::NotFound { .. } => ErrorClass::NotFound,
            StoreError::AuthorizationDenied { .. }
            | StoreError::Unauthenticated
            | StoreError::PermissionDenied { .. } => ErrorClass::Authorization,
            StoreError::Unavailable { .. } | StoreError::DeadlineExceeded { .. } => {
                ErrorClass::Transient
            }
            StoreError::InvalidArgument { .. }
            | StoreError::UnknownCollection { .. }
            | StoreError::Serialization { .. }
            | StoreError::CycleDetected { .. }
            | StoreError::BatchLimitExceeded { .. }
            | StoreError::Disposed => ErrorClass::Fatal,
            StoreError::Internal { .. } => ErrorClass::Unknown,
        }
    }

    /// Everything except authorization, not-found and local caller errors.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self.class(),
            ErrorClass::NotFound | ErrorClass::Authorization | ErrorClass::Fatal
        )
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
