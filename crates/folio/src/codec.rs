//! Typed records ⇄ stored field maps.

use serde::Serialize;

use folio_api::{
    Collection, CollectionSchema, Document, Fields, Record, StoreError, StoreResult as Result,
    Value, CREATED_AT_FIELD, UPDATED_AT_FIELD,
};

/// Serialize a record payload (or a partial patch struct) into stored fields.
pub fn encode<T: Serialize>(collection: Collection, data: &T) -> Result<Fields> {
    let json = serde_json::to_value(data)?;
    match Value::from_json_value(json) {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Serialization {
            message: format!(
                "{} payload must serialize to an object, got {:?}",
                collection, other
            ),
        }),
    }
}

/// Split audit stamps off a normalized document and deserialize the rest.
pub fn decode<T: CollectionSchema>(document: Document) -> Result<Record<T>> {
    let Document { id, mut fields } = document;
    let created_at = fields.remove(CREATED_AT_FIELD).and_then(|v| v.as_datetime());
    let updated_at = fields.remove(UPDATED_AT_FIELD).and_then(|v| v.as_datetime());

    let data: T = serde_json::from_value(Value::Object(fields).to_json_value()).map_err(|e| {
        StoreError::Serialization {
            message: format!("{}/{}: {}", T::COLLECTION, id, e),
        }
    })?;

    Ok(Record {
        id,
        created_at,
        updated_at,
        data,
    })
}

pub fn decode_all<T: CollectionSchema>(documents: Vec<Document>) -> Result<Vec<Record<T>>> {
    documents.into_iter().map(decode::<T>).collect()
}
