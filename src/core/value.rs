/// Value Module
///
/// Engine-independent representation of field values and rows. Drivers hand
/// raw rows to the portability layer in these shapes and callers receive the
/// normalized result in the same vocabulary.
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Exact numeric kept in its textual form
    Decimal(String),
    Text(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text content if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Raw bytes of the value, as sent for large-object transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Blob(b) => b.clone(),
            Value::Null => Vec::new(),
            other => other.to_string().into_bytes(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", if *b { "1" } else { "0" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Decimal(s) | Value::Text(s) => f.write_str(s),
            Value::Blob(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Name-keyed row. Keeps column order; a repeated name keeps its first
/// position and takes the later value.
pub type RowMap = IndexMap<String, Value>;

/// A row as handed out by a cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Row {
    /// Positional row, indexed by column ordinal
    Ordered(Vec<Value>),
    /// Name-keyed row
    Assoc(RowMap),
    /// Materialized record
    Object(Record),
}

impl Row {
    /// Number of fields in the row.
    pub fn len(&self) -> usize {
        match self {
            Row::Ordered(values) => values.len(),
            Row::Assoc(map) => map.len(),
            Row::Object(record) => record.fields.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field by ordinal, whatever the row shape.
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Row::Ordered(values) => values.get(index),
            Row::Assoc(map) => map.get_index(index).map(|(_, v)| v),
            Row::Object(record) => record.fields.get_index(index).map(|(_, v)| v),
        }
    }

    /// Field by name. Positional rows have no names.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        match self {
            Row::Ordered(_) => None,
            Row::Assoc(map) => map.get(name),
            Row::Object(record) => record.get(name),
        }
    }

    /// Iterates the field values in column order.
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Row::Ordered(values) => Box::new(values.iter()),
            Row::Assoc(map) => Box::new(map.values()),
            Row::Object(record) => Box::new(record.fields.values()),
        }
    }

    pub(crate) fn values_mut(&mut self) -> Box<dyn Iterator<Item = &mut Value> + '_> {
        match self {
            Row::Ordered(values) => Box::new(values.iter_mut()),
            Row::Assoc(map) => Box::new(map.values_mut()),
            Row::Object(record) => Box::new(record.fields.values_mut()),
        }
    }

    pub fn into_ordered(self) -> Option<Vec<Value>> {
        match self {
            Row::Ordered(values) => Some(values),
            _ => None,
        }
    }

    pub fn into_assoc(self) -> Option<RowMap> {
        match self {
            Row::Assoc(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Row::Object(record) => Some(record),
            _ => None,
        }
    }
}

/// Generic record produced by object-mode fetches.
///
/// `class` carries the configured `fetch_class` name so callers dispatching
/// on record kinds can tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    class: String,
    fields: RowMap,
}

impl Record {
    pub fn new(class: impl Into<String>, fields: RowMap) -> Self {
        Record {
            class: class.into(),
            fields,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &RowMap {
        &self.fields
    }

    pub fn into_fields(self) -> RowMap {
        self.fields
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
