use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Field map of a stored document.
pub type Fields = BTreeMap<String, Value>;

/// Timestamp as it travels on the wire: seconds since the Unix epoch plus a
/// nanosecond fraction.
///
/// Distinct from both [`Value::String`] and [`Value::DateTime`] so the
/// normalizer can recognise it at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl WireTimestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }

    /// Convert to a native date. `None` when the value is outside chrono's range
    /// or `nanos` is not a valid fraction.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if self.nanos >= 1_000_000_000 {
            return None;
        }
        DateTime::from_timestamp(self.seconds, self.nanos)
    }
}

/// Dynamically typed field value.
///
/// `Timestamp` is the store-native representation of a point in time,
/// `DateTime` the in-memory one. Everything handed to callers has been
/// normalized so that only `DateTime` remains.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(WireTimestamp),
    DateTime(DateTime<Utc>),
    /// Path of another document, kept opaque.
    Reference(String),
    Array(Vec<Value>),
    Object(Fields),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Native date for either temporal representation.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Timestamp(ts) => ts.to_datetime(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Value::Timestamp(_))
    }

    /// Create a Value from a serde_json::Value
    pub fn from_json_value(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json_value).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json_value(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON. Dates (either representation) become RFC 3339 strings,
    /// which is what chrono's serde support reads back.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) | Value::Reference(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Timestamp(ts) => match ts.to_datetime() {
                Some(dt) => {
                    serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                }
                None => serde_json::json!({ "seconds": ts.seconds, "nanos": ts.nanos }),
            },
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Value::to_json_value).collect())
            }
            Value::Object(obj) => serde_json::Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }

    /// Stable textual form, used for cache keys.
    pub fn canonical_string(&self) -> String {
        match self {
            // Tag temporal and reference values so they never collide with strings.
            Value::DateTime(dt) => format!("@dt:{}", dt.timestamp_nanos_opt().unwrap_or_default()),
            Value::Timestamp(ts) => format!("@ts:{}.{:09}", ts.seconds, ts.nanos),
            Value::Reference(path) => format!("@ref:{}", path),
            Value::Array(arr) => {
                let parts: Vec<String> = arr.iter().map(Value::canonical_string).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Object(obj) => {
                let parts: Vec<String> = obj
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v.canonical_string()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
            other => other.to_json_value().to_string(),
        }
    }

    /// Ordering used by range predicates and `order_by`.
    ///
    /// Only values of comparable kinds are ordered: numbers with numbers,
    /// strings with strings, dates with dates (either representation),
    /// booleans with booleans. Everything else is `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Reference(a), Value::Reference(b)) => Some(a.cmp(b)),
            (
                Value::DateTime(_) | Value::Timestamp(_),
                Value::DateTime(_) | Value::Timestamp(_),
            ) => Some(self.as_datetime()?.cmp(&other.as_datetime()?)),
            _ => None,
        }
    }

    /// Equality as seen by query predicates: numbers compare numerically and
    /// dates compare across representations.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match self.compare(other) {
            Some(ordering) => ordering == Ordering::Equal,
            None => self == other,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::Integer(u as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<WireTimestamp> for Value {
    fn from(ts: WireTimestamp) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}
