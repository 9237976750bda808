//! Core types for synchronized collections.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Field every record must carry; used for update/delete matching.
pub const ID_FIELD: &str = "id";

/// Field used to order the initial snapshot.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Resource names served by the dashboard backend.
pub mod resources {
    pub const SITES: &str = "sites";
    pub const PERSONNEL: &str = "personnel";
    pub const MATERIALS: &str = "materials";
    pub const DAILY_REPORTS: &str = "daily_reports";
    pub const ATTENDANCE: &str = "attendance";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Identity of a record within one collection.
///
/// Backends hand out both text (uuid) and integer keys; both normalize to
/// their textual form so `"7"` and `7` name the same row.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Normalize a JSON key value. Returns `None` for non-scalar keys.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RecordId(s.clone())),
            Value::Number(n) => Some(RecordId(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// A single row of a resource: an opaque field -> value mapping.
///
/// The sync layer only looks at `id` and `created_at`; everything else is
/// carried through untouched and narrowed by the caller via [`Record::decode`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create a record holding only an id (the shape of a bare delete).
    pub fn with_id(id: impl Into<Value>) -> Self {
        Self::new().with(ID_FIELD, id)
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SyncError::Deserialization(format!(
                "record must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Set a field, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The record's identity, if it carries a usable `id`.
    pub fn id(&self) -> Option<RecordId> {
        self.0.get(ID_FIELD).and_then(RecordId::from_value)
    }

    /// Like [`Record::id`], but a missing id is an error.
    pub fn require_id(&self) -> Result<RecordId> {
        self.id().ok_or(SyncError::MissingField(ID_FIELD))
    }

    pub fn created_at(&self) -> Option<&Value> {
        self.0.get(CREATED_AT_FIELD)
    }

    /// Whether `field` equals `value`. Scalars compare by their normalized
    /// text so an integer owner id matches its string form.
    pub fn field_equals(&self, field: &str, value: &Value) -> bool {
        match (self.0.get(field), value) {
            (Some(actual), expected) if actual == expected => true,
            (Some(actual), expected) => match (
                RecordId::from_value(actual),
                RecordId::from_value(expected),
            ) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (None, _) => false,
        }
    }

    /// Narrow the record into a caller-defined type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Order two optional field values ascending.
///
/// Numbers compare numerically, strings lexically (ISO-8601 timestamps sort
/// correctly this way), mixed or missing values sort after present ones.
pub fn compare_field_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (as_integer(x), as_integer(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, Some(_)) => Ordering::Greater,
        (Some(_), Some(Value::Null) | None) => Ordering::Less,
        (Some(_), Some(_)) => Ordering::Equal,
    }
}

/// Exact value of an integral number; floats fall through to `f64`.
fn as_integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}
