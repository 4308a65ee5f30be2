//! The closed set of field kinds
//!
//! Every kind decides which auxiliary attributes (`size`, `element_kind`,
//! a referenced type) are meaningful for a field. The storage mapping in
//! `storage::compiler` matches exhaustively on this enum, so adding a kind
//! without a column type fails to compile.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::SchemaError;
use super::value::{jsonb_text, Value};

/// Maximum byte length of an address value.
pub const MAX_ADDRESS_LEN: usize = 255;

/// Maximum bit width for `int_n` / `uint_n` fields.
pub const MAX_INT_BITS: u32 = 128;

/// Basic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    String,
    Bytes,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    /// Signed integer with bit width given by the field size
    IntN,
    /// Unsigned integer with bit width given by the field size
    UintN,
    /// Variable precision integer carried as a decimal string
    Integer,
    /// Decimal number carried as a string
    Decimal,
    Bool,
    Time,
    /// Nanosecond duration
    Duration,
    Float32,
    Float64,
    /// Byte sequence identifying an account or module
    Address,
    Json,
    /// String label drawn from a named enum type
    Enum,
    /// Homogeneous list of a scalar element kind
    List,
    /// Nested value shaped by a named struct type
    Struct,
}

/// How a kind interprets the field size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// Size must be zero
    Forbidden,
    /// Optional maximum length, zero means unbounded
    MaxLength,
    /// Required bit width in `1..=MAX_INT_BITS`
    BitWidth,
}

impl Kind {
    /// Every kind, in declaration order.
    pub const ALL: [Kind; 24] = [
        Kind::String,
        Kind::Bytes,
        Kind::Int8,
        Kind::Int16,
        Kind::Int32,
        Kind::Int64,
        Kind::Uint8,
        Kind::Uint16,
        Kind::Uint32,
        Kind::Uint64,
        Kind::IntN,
        Kind::UintN,
        Kind::Integer,
        Kind::Decimal,
        Kind::Bool,
        Kind::Time,
        Kind::Duration,
        Kind::Float32,
        Kind::Float64,
        Kind::Address,
        Kind::Json,
        Kind::Enum,
        Kind::List,
        Kind::Struct,
    ];

    /// Returns the kind's canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Bytes => "bytes",
            Kind::Int8 => "int8",
            Kind::Int16 => "int16",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Uint8 => "uint8",
            Kind::Uint16 => "uint16",
            Kind::Uint32 => "uint32",
            Kind::Uint64 => "uint64",
            Kind::IntN => "int_n",
            Kind::UintN => "uint_n",
            Kind::Integer => "integer",
            Kind::Decimal => "decimal",
            Kind::Bool => "bool",
            Kind::Time => "time",
            Kind::Duration => "duration",
            Kind::Float32 => "float32",
            Kind::Float64 => "float64",
            Kind::Address => "address",
            Kind::Json => "json",
            Kind::Enum => "enum",
            Kind::List => "list",
            Kind::Struct => "struct",
        }
    }

    /// Returns how this kind interprets a field size.
    pub fn size_rule(&self) -> SizeRule {
        match self {
            Kind::String | Kind::Bytes | Kind::Address | Kind::Json => SizeRule::MaxLength,
            Kind::IntN | Kind::UintN => SizeRule::BitWidth,
            _ => SizeRule::Forbidden,
        }
    }

    /// Whether the kind may be used for key fields.
    pub fn is_keyable(&self) -> bool {
        !matches!(
            self,
            Kind::Float32 | Kind::Float64 | Kind::Json | Kind::List | Kind::Struct
        )
    }

    /// Whether the kind may be used as a list element.
    pub fn is_list_element(&self) -> bool {
        !matches!(self, Kind::List | Kind::Struct)
    }

    /// Validates the auxiliary attributes a field declares for this kind.
    ///
    /// For lists, `size` applies to the element kind.
    pub fn validate_attributes(&self, size: u32, element_kind: Option<Kind>) -> Result<(), SchemaError> {
        match (self, element_kind) {
            (Kind::List, None) => {
                return Err(SchemaError::InvalidKind(
                    "list kind requires an element kind".into(),
                ))
            }
            (Kind::List, Some(element)) => {
                if !element.is_list_element() {
                    return Err(SchemaError::InvalidKind(format!(
                        "{} is not allowed as a list element",
                        element
                    )));
                }
                return element.validate_attributes(size, None);
            }
            (_, Some(element)) => {
                return Err(SchemaError::InvalidKind(format!(
                    "element kind {} is only valid for list, found on {}",
                    element, self
                )))
            }
            (_, None) => {}
        }

        match self.size_rule() {
            SizeRule::Forbidden if size != 0 => Err(SchemaError::InvalidKind(format!(
                "size is not meaningful for {}",
                self
            ))),
            SizeRule::BitWidth if size == 0 || size > MAX_INT_BITS => Err(SchemaError::InvalidKind(
                format!("{} requires a bit width in 1..={}, got {}", self, MAX_INT_BITS, size),
            )),
            _ => Ok(()),
        }
    }

    /// Checks that `value` has the runtime type this kind requires.
    ///
    /// Enum membership, list elements and struct fields need the enclosing
    /// field's type references and are checked by `Field::validate_value`.
    /// On mismatch returns the expected description.
    pub fn check_value(&self, value: &Value, size: u32) -> Result<(), String> {
        let ok = match (self, value) {
            (Kind::Int8, Value::Int(i)) => i8::try_from(*i).is_ok(),
            (Kind::Int16, Value::Int(i)) => i16::try_from(*i).is_ok(),
            (Kind::Int32, Value::Int(i)) => i32::try_from(*i).is_ok(),
            (Kind::Int64, Value::Int(_)) => true,
            (Kind::Uint8, Value::Uint(u)) => u8::try_from(*u).is_ok(),
            (Kind::Uint16, Value::Uint(u)) => u16::try_from(*u).is_ok(),
            (Kind::Uint32, Value::Uint(u)) => u32::try_from(*u).is_ok(),
            (Kind::Uint64, Value::Uint(_)) => true,
            (Kind::IntN, Value::Int(i)) => fits_signed(i128::from(*i), size),
            (Kind::IntN, Value::Integer(s)) => s.parse::<i128>().map_or(false, |i| fits_signed(i, size)),
            (Kind::UintN, Value::Uint(u)) => fits_unsigned(u128::from(*u), size),
            (Kind::UintN, Value::Integer(s)) => s.parse::<u128>().map_or(false, |u| fits_unsigned(u, size)),
            (Kind::Integer, Value::Integer(s)) => integer_format().is_match(s),
            (Kind::Decimal, Value::Decimal(s)) => decimal_format().is_match(s),
            (Kind::Bool, Value::Bool(_)) => true,
            (Kind::Time, Value::Time(_)) => true,
            (Kind::Duration, Value::Duration(_)) => true,
            (Kind::Float32, Value::Float(f)) => !f.is_finite() || f.abs() <= f64::from(f32::MAX),
            (Kind::Float64, Value::Float(_)) => true,
            (Kind::String, Value::String(s)) => within(s.chars().count(), size),
            (Kind::Bytes, Value::Bytes(b)) => within(b.len(), size),
            (Kind::Address, Value::Bytes(b)) => {
                !b.is_empty() && b.len() <= MAX_ADDRESS_LEN && within(b.len(), size)
            }
            (Kind::Json, Value::Json(v)) => size == 0 || within(jsonb_text(v).len(), size),
            (Kind::Enum, Value::String(_)) => true,
            (Kind::List, Value::List(_)) => true,
            (Kind::Struct, Value::Struct(_)) => true,
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(self.describe(size))
        }
    }

    fn describe(&self, size: u32) -> String {
        match self.size_rule() {
            SizeRule::BitWidth => format!("{}({})", self, size),
            SizeRule::MaxLength if size > 0 => format!("{} of at most {}", self, size),
            _ => self.as_str().to_string(),
        }
    }
}

fn within(len: usize, size: u32) -> bool {
    size == 0 || len <= size as usize
}

fn fits_signed(value: i128, bits: u32) -> bool {
    if bits == 0 {
        return false;
    }
    if bits >= MAX_INT_BITS {
        return true;
    }
    let bound = 1i128 << (bits - 1);
    value >= -bound && value < bound
}

fn fits_unsigned(value: u128, bits: u32) -> bool {
    bits != 0 && (bits >= MAX_INT_BITS || value < (1u128 << bits))
}

fn integer_format() -> &'static Regex {
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    FORMAT.get_or_init(|| Regex::new(r"^-?[0-9]+$").expect("integer pattern is valid"))
}

fn decimal_format() -> &'static Regex {
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    FORMAT.get_or_init(|| {
        Regex::new(r"^-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?$").expect("decimal pattern is valid")
    })
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SchemaError::InvalidKind(format!("unknown kind {:?}", s)))
    }
}
