//! The Value type - the document tree exchanged with a backing store.
//!
//! A document is a `Value::Map` at the top level. Stores keep documents as
//! opaque trees; only index key functions look inside them.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A tree-shaped value stored in a collection.
///
/// # Design Notes
///
/// - Uses `BTreeMap` for deterministic field ordering
/// - Includes `Bytes` for binary payloads (chunk data)
/// - `ServerTime` is a write-side placeholder; stores replace it with their
///   own clock reading when the write is applied, so it never appears in a
///   value read back from a store
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absence of a value. Distinct from "field doesn't exist".
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Bytes),
    /// Point in time, UTC.
    Timestamp(DateTime<Utc>),
    /// "Now", as seen by the store when the write lands.
    ServerTime,
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Key-value map with string keys.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create a null value.
    pub fn null() -> Self {
        Value::Null
    }

    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Get a top-level field of a map value.
    ///
    /// Returns `None` for non-map values and missing fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(name),
            _ => None,
        }
    }

    /// Set a top-level field, turning a non-map value into a map first.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        if !self.is_map() {
            *self = Value::map();
        }
        if let Value::Map(map) = self {
            map.insert(name.into(), value);
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Merge a partial document into this one.
    ///
    /// Maps merge recursively; any other value in `partial` replaces what is
    /// here. This is the semantics of a document `update`.
    pub fn merge(&mut self, partial: Value) {
        match (self, partial) {
            (Value::Map(current), Value::Map(changes)) => {
                for (key, change) in changes {
                    match current.get_mut(&key) {
                        Some(existing) if existing.is_map() && change.is_map() => {
                            existing.merge(change)
                        }
                        _ => {
                            current.insert(key, change);
                        }
                    }
                }
            }
            (this, other) => *this = other,
        }
    }

    /// Replace every `ServerTime` placeholder with `now`.
    pub fn resolve_server_time(&mut self, now: DateTime<Utc>) {
        match self {
            Value::ServerTime => *self = Value::Timestamp(now),
            Value::Array(arr) => arr.iter_mut().for_each(|v| v.resolve_server_time(now)),
            Value::Map(map) => map.values_mut().for_each(|v| v.resolve_server_time(now)),
            _ => {}
        }
    }

    /// Total order used for index keys.
    ///
    /// Values of different kinds order by kind first (null < bool < number <
    /// string < bytes < time < array < map); integers and floats compare
    /// numerically with each other.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::ServerTime, Value::ServerTime) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.total_cmp(y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    match ka.cmp(kb).then_with(|| va.total_cmp(vb)) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
            Value::Timestamp(_) | Value::ServerTime => 5,
            Value::Array(_) => 6,
            Value::Map(_) => 7,
        }
    }

    /// Render as JSON for diagnostics.
    ///
    /// Bytes are base64 encoded and timestamps use RFC 3339, so the result
    /// does not round-trip back into the same `Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::ServerTime => serde_json::Value::String("<server time>".to_string()),
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(fields: &[(&str, Value)]) -> Value {
        fields.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn field_access() {
        let value = doc(&[("name", Value::from("a")), ("n", Value::from(3i64))]);
        assert_eq!(value.field("name").and_then(Value::as_str), Some("a"));
        assert_eq!(value.field("n").and_then(Value::as_i64), Some(3));
        assert_eq!(value.field("missing"), None);
        assert_eq!(Value::from("x").field("name"), None);
    }

    #[test]
    fn merge_overwrites_and_adds_fields() {
        let mut value = doc(&[
            ("status", Value::from("incomplete")),
            ("file_name", Value::from("/a/b")),
        ]);
        value.merge(doc(&[
            ("status", Value::from("complete")),
            ("length", Value::from(10i64)),
        ]));

        assert_eq!(value.field("status"), Some(&Value::from("complete")));
        assert_eq!(value.field("file_name"), Some(&Value::from("/a/b")));
        assert_eq!(value.field("length"), Some(&Value::from(10i64)));
    }

    #[test]
    fn merge_nested_maps() {
        let mut value = doc(&[("meta", doc(&[("a", Value::from(1i64))]))]);
        value.merge(doc(&[("meta", doc(&[("b", Value::from(2i64))]))]));

        let meta = value.field("meta").unwrap();
        assert_eq!(meta.field("a"), Some(&Value::from(1i64)));
        assert_eq!(meta.field("b"), Some(&Value::from(2i64)));
    }

    #[test]
    fn server_time_is_resolved_everywhere() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut value = doc(&[
            ("started_at", Value::ServerTime),
            ("nested", Value::Array(vec![Value::ServerTime])),
        ]);
        value.resolve_server_time(now);

        assert_eq!(value.field("started_at"), Some(&Value::Timestamp(now)));
        assert_eq!(
            value.field("nested"),
            Some(&Value::Array(vec![Value::Timestamp(now)]))
        );
    }

    #[test]
    fn total_order_sorts_by_kind_then_value() {
        assert_eq!(Value::Null.total_cmp(&Value::from(false)), Ordering::Less);
        assert_eq!(
            Value::from(2i64).total_cmp(&Value::from(1.5f64)),
            Ordering::Greater
        );
        assert_eq!(
            Value::from("a").total_cmp(&Value::from(100i64)),
            Ordering::Greater
        );
        let short = Value::from(vec![Value::from("f"), Value::from(1i64)]);
        let long = Value::from(vec![Value::from("f"), Value::from(1i64), Value::Null]);
        assert_eq!(short.total_cmp(&long), Ordering::Less);
        let bigger = Value::from(vec![Value::from("f"), Value::from(2i64)]);
        assert_eq!(bigger.total_cmp(&long), Ordering::Greater);
    }

    #[test]
    fn json_rendering_encodes_bytes() {
        let value = doc(&[("data", Value::Bytes(Bytes::from_static(b"abcd")))]);
        assert_eq!(value.to_json(), serde_json::json!({"data": "YWJjZA=="}));
    }
}
