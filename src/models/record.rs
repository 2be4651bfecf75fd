//! Dynamically-typed rows.
//!
//! A [`Record`] maps each result column name to a [`Value`]. Values are a
//! closed set of categories, so callers match exhaustively instead of probing
//! types at runtime.

use crate::db::types::TypeCategory;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::iter::FusedIterator;

/// One scanned column value, also used for bound query arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Binary(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn category(&self) -> TypeCategory {
        match self {
            Self::Null => TypeCategory::Null,
            Self::Int(_) => TypeCategory::Integer,
            Self::Float(_) => TypeCategory::Float,
            Self::Bool(_) => TypeCategory::Boolean,
            Self::Text(_) => TypeCategory::Text,
            Self::Binary(_) => TypeCategory::Binary,
            Self::Timestamp(_) => TypeCategory::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats as-is; integers widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse a JSON literal into a bind argument.
    ///
    /// Arrays and objects are passed as their JSON text.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Binary(v) => match std::str::from_utf8(v) {
                Ok(s) => f.write_str(s),
                Err(_) => f.write_str(&STANDARD.encode(v)),
            },
            Self::Timestamp(v) => f.write_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Binary(v) => serializer.serialize_str(&STANDARD.encode(v)),
            Self::Timestamp(v) => {
                serializer.serialize_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident via $conv:expr),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant($conv(v))
                }
            }
        )+
    };
}

impl_from_for_value! {
    i64 => Int via std::convert::identity,
    i32 => Int via i64::from,
    f64 => Float via std::convert::identity,
    bool => Bool via std::convert::identity,
    String => Text via std::convert::identity,
    &str => Text via str::to_string,
    Vec<u8> => Binary via std::convert::identity,
    &[u8] => Binary via <[u8]>::to_vec,
    DateTime<Utc> => Timestamp via std::convert::identity,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row keyed by column name.
///
/// There is no mutating API: a record is exactly what the query returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    values: HashMap<String, Value>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Render a column as text.
    ///
    /// Missing columns and NULL render as the empty string, text is returned
    /// unchanged, and everything else uses its `Display` form.
    pub fn string(&self, column: &str) -> String {
        match self.values.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::Text(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Column names in no particular order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Records in driver row order, consumed once.
#[derive(Debug)]
pub struct Records {
    rows: std::vec::IntoIter<Record>,
}

impl Records {
    pub(crate) fn new(rows: Vec<Record>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Records {}

impl FusedIterator for Records {}
