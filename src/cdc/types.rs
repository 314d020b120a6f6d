use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// A single column value as produced by a row source.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<FixedOffset>),
    Null,
}

impl Value {
    /// Canonical string form of a timestamp: UTC, RFC 3339, `Z` suffix.
    ///
    /// Two timestamps naming the same instant always render identically,
    /// whatever offset they were read with.
    pub fn canonical_timestamp(ts: &DateTime<FixedOffset>) -> String {
        ts.with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value.into())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Timestamp(ts) => serializer.serialize_str(&Value::canonical_timestamp(ts)),
            Value::Null => serializer.serialize_unit(),
        }
    }
}

/// An ordered mapping from column name to value.
///
/// Column order is the order the source produced, and is kept when the
/// row is serialized.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Sets a column, replacing the value in place if the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Builder-style [`Row::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the row with columns sorted by name, for sources that do
    /// not guarantee a stable column order.
    pub fn sorted_by_column(mut self) -> Self {
        self.columns.sort_by(|(a, _), (b, _)| a.cmp(b));
        self
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// The stable identity of a row across polls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    Integer(i64),
    Text(String),
    Boolean(bool),
}

impl PrimaryKey {
    /// Derives a key from a column value. `Null` has no identity.
    ///
    /// Floats and timestamps are keyed by their canonical string form.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(PrimaryKey::Integer(*i)),
            Value::String(s) => Some(PrimaryKey::Text(s.clone())),
            Value::Boolean(b) => Some(PrimaryKey::Boolean(*b)),
            Value::Float(f) => Some(PrimaryKey::Text(f.to_string())),
            Value::Timestamp(ts) => Some(PrimaryKey::Text(Value::canonical_timestamp(ts))),
            Value::Null => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Integer(i) => Value::Integer(*i),
            PrimaryKey::Text(s) => Value::String(s.clone()),
            PrimaryKey::Boolean(b) => Value::Boolean(*b),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Integer(i) => write!(f, "{}", i),
            PrimaryKey::Text(s) => f.write_str(s),
            PrimaryKey::Boolean(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    /// Name used for the `${event}` tag placeholder.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected change, consumed immediately by the emitter.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(Row),
    Update(Row),
    Delete(PrimaryKey),
}

impl ChangeEvent {
    pub fn op(&self) -> ChangeOperation {
        match self {
            ChangeEvent::Insert(_) => ChangeOperation::Insert,
            ChangeEvent::Update(_) => ChangeOperation::Update,
            ChangeEvent::Delete(_) => ChangeOperation::Delete,
        }
    }

    /// The record handed to the sink.
    ///
    /// Inserts and updates carry the full row. Deletes carry only
    /// `{primary_key_column: id}`.
    pub fn into_record(self, primary_key: &str) -> Row {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) => row,
            ChangeEvent::Delete(id) => Row::new().with(primary_key, id.to_value()),
        }
    }
}
