//! Runtime values carried by object updates
//!
//! Absence is modeled as `Option::None` at the field level; a `Value` is
//! always present.

use std::collections::BTreeMap;
use std::io;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A concrete value for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed integer (int8..int64, int_n)
    Int(i64),
    /// Unsigned integer (uint8..uint64, uint_n)
    Uint(u64),
    /// Arbitrary precision decimal integer string
    Integer(String),
    /// Decimal number string
    Decimal(String),
    /// Floating point
    Float(f64),
    /// UTF-8 string, also used for enum labels
    String(String),
    /// Raw bytes, also used for addresses
    Bytes(Vec<u8>),
    /// Timestamp
    Time(DateTime<Utc>),
    /// Duration in nanoseconds
    Duration(i64),
    /// Structured JSON document
    Json(serde_json::Value),
    /// Homogeneous list
    List(Vec<Value>),
    /// Struct fields by name; absent names are null
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the value's type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Json(_) => "json",
            Value::List(_) => "list",
            Value::Struct(_) => "struct",
        }
    }

    /// Returns the string contents for string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Integer(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value to JSON, used for struct columns.
    ///
    /// Bytes render as lowercase hex, times as RFC 3339 and large numbers
    /// as strings so that nothing loses precision.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Uint(u) => json!(u),
            Value::Integer(s) | Value::Decimal(s) | Value::String(s) => json!(s),
            Value::Float(f) => json!(f),
            Value::Bytes(bytes) => json!(hex(bytes)),
            Value::Time(t) => json!(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Duration(nanos) => json!(nanos),
            Value::Json(v) => v.clone(),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Struct(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Renders JSON the way PostgreSQL prints a `jsonb` value as text.
///
/// Length limits on JSON columns are measured on this form, which is what a
/// `octet_length(col::TEXT)` check sees.
pub fn jsonb_text(value: &serde_json::Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, JsonbFormatter);
    if value.serialize(&mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

/// `": "` after object keys and `", "` between elements.
struct JsonbFormatter;

impl serde_json::ser::Formatter for JsonbFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}
