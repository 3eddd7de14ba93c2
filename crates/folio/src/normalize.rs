//! Wire → in-memory value conversion.
//!
//! Every `Value::Timestamp` becomes a `Value::DateTime`, at any depth. Other
//! values are copied unchanged. The input is never mutated and a second pass
//! over a normalized value is a no-op.

use folio_api::{Document, Fields, Value};

pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Timestamp(ts) => match ts.to_datetime() {
            Some(dt) => Value::DateTime(dt),
            None => {
                tracing::warn!(
                    "[normalize] timestamp out of range (seconds={}, nanos={}), leaving as-is",
                    ts.seconds,
                    ts.nanos
                );
                value.clone()
            }
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(fields) => Value::Object(normalize_fields(fields)),
        other => other.clone(),
    }
}

pub fn normalize_fields(fields: &Fields) -> Fields {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

pub fn normalize_document(document: &Document) -> Document {
    Document {
        id: document.id.clone(),
        fields: normalize_fields(&document.fields),
    }
}

pub fn normalize_documents(documents: &[Document]) -> Vec<Document> {
    documents.iter().map(normalize_document).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use folio_api::WireTimestamp;
    use proptest::prelude::*;

    fn ts(seconds: i64) -> Value {
        Value::Timestamp(WireTimestamp::new(seconds, 0))
    }

    #[test]
    fn test_top_level_timestamp_becomes_date() {
        let expected = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(normalize_value(&ts(1_700_000_000)), Value::DateTime(expected));
    }

    #[test]
    fn test_nested_objects_and_arrays_are_converted() {
        let mut inner = Fields::new();
        inner.insert("at".into(), ts(10));
        let value = Value::Array(vec![Value::Object(inner), ts(20), Value::from("x")]);

        let normalized = normalize_value(&value);
        let items = normalized.as_array().unwrap();
        assert!(matches!(
            items[0].as_object().unwrap().get("at"),
            Some(Value::DateTime(_))
        ));
        assert!(matches!(items[1], Value::DateTime(_)));
        assert_eq!(items[2], Value::from("x"));
    }

    #[test]
    fn test_scalars_null_and_dates_pass_through() {
        let dt = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        for value in [
            Value::Null,
            Value::Boolean(true),
            Value::Integer(3),
            Value::from("2020-01-01T00:00:00Z"),
            Value::DateTime(dt),
            Value::Reference("content-items/a".into()),
        ] {
            assert_eq!(normalize_value(&value), value);
        }
    }

    #[test]
    fn test_out_of_range_timestamp_is_kept() {
        let bad = Value::Timestamp(WireTimestamp::new(i64::MAX, 0));
        assert_eq!(normalize_value(&bad), bad);
    }

    #[test]
    fn test_document_id_is_preserved() {
        let mut fields = Fields::new();
        fields.insert("createdAt".into(), ts(5));
        let doc = Document::new("abc", fields);
        let normalized = normalize_document(&doc);
        assert_eq!(normalized.id, "abc");
        assert!(matches!(normalized.get("createdAt"), Some(Value::DateTime(_))));
        assert!(doc.get("createdAt").unwrap().is_timestamp());
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            "[a-z]{0,8}".prop_map(Value::String),
            (-10_000_000_000i64..10_000_000_000i64, 0u32..1_000_000_000u32)
                .prop_map(|(s, n)| Value::Timestamp(WireTimestamp::new(s, n))),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Object),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_normalize_is_idempotent(value in value_strategy()) {
            let once = normalize_value(&value);
            let twice = normalize_value(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_normalize_does_not_mutate_input(value in value_strategy()) {
            let before = value.clone();
            let _ = normalize_value(&value);
            prop_assert_eq!(value, before);
        }
    }
}
