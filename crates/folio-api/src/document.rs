use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{Fields, Value};

/// Audit field stamped on creation.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Audit field stamped on every write.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Untyped document as exchanged with the backing store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of `field`, if present and a string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Typed record: a store-assigned id, the layer's audit stamps, and the
/// caller-owned payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub data: T,
}

impl<T> Record<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            data,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Record<U> {
        Record {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            data: f(self.data),
        }
    }
}

impl<T> std::ops::Deref for Record<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}
