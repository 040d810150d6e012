//! Model ↔ database value conversion.
//!
//! Models are serialized with `serde` into JSON object form; each property
//! value is then converted into a [`SqlValue`] according to the field's
//! [`PropertyType`], and converted back when rows are read.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::dbtype::TypeAffinity;
use crate::error::{MapError, Result};

/// A value as stored in or bound to the database engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// How a model property is represented on the model side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Stored as `0`/`1`.
    Bool,
    Integer,
    Real,
    Text,
    /// Any serde value, stored as JSON text.
    Json,
    /// Byte arrays, serialized by serde as a sequence of numbers.
    Blob,
    /// RFC 3339 timestamps; stored as text, or as unix time for INTEGER columns.
    Date,
}

impl PropertyType {
    /// Default property type for a column affinity.
    pub fn from_affinity(affinity: TypeAffinity) -> Self {
        match affinity {
            TypeAffinity::Integer => Self::Integer,
            TypeAffinity::Text => Self::Text,
            TypeAffinity::Blob => Self::Blob,
            TypeAffinity::Real | TypeAffinity::Numeric => Self::Real,
        }
    }

    /// Default declared type for a property type.
    pub fn default_dbtype(&self) -> &'static str {
        match self {
            Self::Bool | Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Json | Self::Date => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

type ToDbFn = dyn Fn(&JsonValue) -> Result<SqlValue> + Send + Sync;
type FromDbFn = dyn Fn(&SqlValue) -> Result<JsonValue> + Send + Sync;

/// A user-supplied bidirectional conversion replacing the default one for
/// a field.
///
/// Two transforms compare equal only if they share the same closures, which
/// is what idempotent re-registration of the same field needs.
#[derive(Clone)]
pub struct ValueTransform {
    to_db: Arc<ToDbFn>,
    from_db: Arc<FromDbFn>,
}

impl ValueTransform {
    pub fn new<T, F>(to_db: T, from_db: F) -> Self
    where
        T: Fn(&JsonValue) -> Result<SqlValue> + Send + Sync + 'static,
        F: Fn(&SqlValue) -> Result<JsonValue> + Send + Sync + 'static,
    {
        Self {
            to_db: Arc::new(to_db),
            from_db: Arc::new(from_db),
        }
    }

    pub fn to_db(&self, value: &JsonValue) -> Result<SqlValue> {
        (self.to_db)(value)
    }

    pub fn from_db(&self, value: &SqlValue) -> Result<JsonValue> {
        (self.from_db)(value)
    }
}

impl PartialEq for ValueTransform {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.to_db, &other.to_db) && Arc::ptr_eq(&self.from_db, &other.from_db)
    }
}

impl fmt::Debug for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueTransform")
    }
}

/// Converts a model-side value into its database representation.
pub fn json_to_sql(
    value: &JsonValue,
    property_type: PropertyType,
    affinity: TypeAffinity,
    date_in_milliseconds: bool,
) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    match property_type {
        PropertyType::Json => serde_json::to_string(value)
            .map(SqlValue::Text)
            .map_err(|e| MapError::Conversion(format!("failed to serialize JSON value: {e}"))),
        PropertyType::Date => date_to_sql(value, affinity, date_in_milliseconds),
        PropertyType::Blob => match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| MapError::Conversion(format!("invalid byte value: {item}")))
                })
                .collect::<Result<Vec<u8>>>()
                .map(SqlValue::Blob),
            other => scalar_to_sql(other),
        },
        _ => scalar_to_sql(value),
    }
}

fn scalar_to_sql(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::from(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(MapError::Conversion(format!("number out of range: {n}")))
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(MapError::Conversion(format!(
            "structured value requires a JSON field: {value}"
        ))),
    }
}

fn date_to_sql(value: &JsonValue, affinity: TypeAffinity, millis: bool) -> Result<SqlValue> {
    let JsonValue::String(text) = value else {
        return scalar_to_sql(value);
    };
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|e| MapError::Conversion(format!("invalid timestamp '{text}': {e}")))?
        .with_timezone(&Utc);
    if affinity == TypeAffinity::Integer {
        let ts = if millis {
            parsed.timestamp_millis()
        } else {
            parsed.timestamp()
        };
        Ok(SqlValue::Integer(ts))
    } else {
        Ok(SqlValue::Text(
            parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ))
    }
}

/// Converts a database value back into its model-side representation.
pub fn sql_to_json(
    value: &SqlValue,
    property_type: PropertyType,
    date_in_milliseconds: bool,
) -> Result<JsonValue> {
    match (property_type, value) {
        (_, SqlValue::Null) => Ok(JsonValue::Null),
        (PropertyType::Bool, SqlValue::Integer(i)) => Ok(JsonValue::Bool(*i != 0)),
        (PropertyType::Bool, SqlValue::Real(f)) => Ok(JsonValue::Bool(*f != 0.0)),
        (PropertyType::Bool, SqlValue::Text(s)) => Ok(JsonValue::Bool(
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        )),
        (PropertyType::Json, SqlValue::Text(s)) => serde_json::from_str(s)
            .map_err(|e| MapError::Conversion(format!("invalid JSON text: {e}"))),
        (PropertyType::Date, SqlValue::Integer(i)) => {
            let parsed = if date_in_milliseconds {
                DateTime::<Utc>::from_timestamp_millis(*i)
            } else {
                DateTime::<Utc>::from_timestamp(*i, 0)
            };
            parsed
                .map(|d| JsonValue::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                .ok_or_else(|| MapError::Conversion(format!("timestamp out of range: {i}")))
        }
        (PropertyType::Integer, SqlValue::Real(f)) if f.fract() == 0.0 => {
            Ok(JsonValue::from(*f as i64))
        }
        (PropertyType::Real, SqlValue::Integer(i)) => Ok(JsonValue::from(*i as f64)),
        (_, SqlValue::Integer(i)) => Ok(JsonValue::from(*i)),
        (_, SqlValue::Real(f)) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| MapError::Conversion(format!("non-finite number: {f}"))),
        (_, SqlValue::Text(s)) => Ok(JsonValue::String(s.clone())),
        (_, SqlValue::Blob(bytes)) => Ok(JsonValue::Array(
            bytes.iter().map(|b| JsonValue::from(*b)).collect(),
        )),
    }
}
