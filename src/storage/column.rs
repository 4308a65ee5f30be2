//! Storage columns and cells
//!
//! Column types follow the PostgreSQL dialect. A `Cell` is one stored value;
//! `ColumnSpec::check` is what a backend runs before accepting a cell, so the
//! constraints rendered into DDL and the ones enforced in memory agree.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::jsonb_text;

/// A stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Int(i64),
    /// Exact number in its decimal text form
    Numeric(String),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<Cell>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) | Cell::Numeric(s) => Some(s),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Int(_) => "int",
            Cell::Numeric(_) => "numeric",
            Cell::Float(_) => "float",
            Cell::Text(_) => "text",
            Cell::Bytes(_) => "bytes",
            Cell::Bool(_) => "bool",
            Cell::Timestamp(_) => "timestamp",
            Cell::Json(_) => "json",
            Cell::Array(_) => "array",
        }
    }
}

/// Column storage type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Real,
    DoublePrecision,
    Text,
    Bytea,
    Boolean,
    Timestamptz,
    Jsonb,
    Array(Box<ColumnType>),
}

impl ColumnType {
    /// Returns the SQL type name.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::SmallInt => "SMALLINT".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Numeric => "NUMERIC".into(),
            ColumnType::Real => "REAL".into(),
            ColumnType::DoublePrecision => "DOUBLE PRECISION".into(),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Bytea => "BYTEA".into(),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Timestamptz => "TIMESTAMPTZ".into(),
            ColumnType::Jsonb => "JSONB".into(),
            ColumnType::Array(element) => format!("{}[]", element.sql()),
        }
    }

    /// Checks that a non-null cell has this column's representation and range.
    pub fn accepts(&self, cell: &Cell) -> bool {
        match (self, cell) {
            (ColumnType::SmallInt, Cell::Int(i)) => i16::try_from(*i).is_ok(),
            (ColumnType::Integer, Cell::Int(i)) => i32::try_from(*i).is_ok(),
            (ColumnType::BigInt, Cell::Int(_)) => true,
            (ColumnType::Numeric, Cell::Numeric(_)) => true,
            (ColumnType::Real, Cell::Float(_)) => true,
            (ColumnType::DoublePrecision, Cell::Float(_)) => true,
            (ColumnType::Text, Cell::Text(_)) => true,
            (ColumnType::Bytea, Cell::Bytes(_)) => true,
            (ColumnType::Boolean, Cell::Bool(_)) => true,
            (ColumnType::Timestamptz, Cell::Timestamp(_)) => true,
            (ColumnType::Jsonb, Cell::Json(_)) => true,
            (ColumnType::Array(element), Cell::Array(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// Check constraint on a column. For array columns it applies to each element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnConstraint {
    /// Maximum length in characters
    MaxChars(u32),
    /// Maximum length in bytes
    MaxBytes(u32),
    /// Maximum length of the JSON text
    MaxJsonLength(u32),
    /// Value must be one of the labels
    AllowList(Vec<String>),
}

impl ColumnConstraint {
    fn check(&self, cell: &Cell) -> Result<(), String> {
        match (self, cell) {
            (ColumnConstraint::MaxChars(max), Cell::Text(s)) if s.chars().count() > *max as usize => {
                Err(format!("length exceeds {} characters", max))
            }
            (ColumnConstraint::MaxBytes(max), Cell::Bytes(b)) if b.len() > *max as usize => {
                Err(format!("length exceeds {} bytes", max))
            }
            (ColumnConstraint::MaxJsonLength(max), Cell::Json(v)) if jsonb_text(v).len() > *max as usize => {
                Err(format!("json length exceeds {} bytes", max))
            }
            (ColumnConstraint::AllowList(labels), Cell::Text(s)) if !labels.contains(s) => {
                Err(format!("{:?} is not an allowed value", s))
            }
            (constraint, Cell::Array(items)) => items.iter().try_for_each(|item| constraint.check(item)),
            _ => Ok(()),
        }
    }

    fn sql(&self, column: &str, is_array: bool) -> Option<String> {
        let ident = quote_ident(column);
        match (self, is_array) {
            (ColumnConstraint::MaxChars(max), false) => {
                Some(format!("CHECK (char_length({}) <= {})", ident, max))
            }
            (ColumnConstraint::MaxBytes(max), false) => {
                Some(format!("CHECK (octet_length({}) <= {})", ident, max))
            }
            (ColumnConstraint::MaxJsonLength(max), false) => {
                Some(format!("CHECK (octet_length({}::TEXT) <= {})", ident, max))
            }
            (ColumnConstraint::AllowList(labels), false) => {
                Some(format!("CHECK ({} IN ({}))", ident, quote_labels(labels)))
            }
            (ColumnConstraint::AllowList(labels), true) => Some(format!(
                "CHECK ({} <@ ARRAY[{}]::TEXT[])",
                ident,
                quote_labels(labels)
            )),
            // Element lengths of arrays are enforced by the value validator.
            (_, true) => None,
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ColumnConstraint>,
    /// Value stored when an insert does not set the column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Cell>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
            constraint: None,
            default: None,
        }
    }

    pub fn with_constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_default(mut self, default: Cell) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether the column can be added to an existing table without a rewrite.
    pub fn is_additive(&self) -> bool {
        self.nullable || self.default.is_some()
    }

    /// Cell written when an insert leaves the column unset.
    pub fn initial_cell(&self) -> Cell {
        self.default.clone().unwrap_or(Cell::Null)
    }

    /// Checks type, nullability and constraint of a cell destined for this column.
    pub fn check(&self, cell: &Cell) -> Result<(), String> {
        if cell.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("null value violates not-null constraint".into())
            };
        }
        if !self.column_type.accepts(cell) {
            return Err(format!(
                "{} value does not fit column type {}",
                cell.type_name(),
                self.column_type
            ));
        }
        match &self.constraint {
            Some(constraint) => constraint.check(cell),
            None => Ok(()),
        }
    }

    /// Renders the column definition.
    pub fn sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type.sql());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&literal(default));
        }
        let is_array = matches!(self.column_type, ColumnType::Array(_));
        if let Some(check) = self.constraint.as_ref().and_then(|c| c.sql(&self.name, is_array)) {
            sql.push(' ');
            sql.push_str(&check);
        }
        sql
    }
}

/// Largest number of digits a NUMERIC holds before the decimal point.
const NUMERIC_MAX_WHOLE_DIGITS: i64 = 131_072;
/// Largest number of digits a NUMERIC holds after the decimal point.
const NUMERIC_MAX_SCALE: i64 = 16_383;
/// Exponents beyond this are rejected before any digit arithmetic.
const MAX_EXPONENT: i64 = i32::MAX as i64;

/// Returns the canonical text of a NUMERIC value.
///
/// Numerically equal inputs map to the same text, so that `"1"`, `"01"`
/// and `"1.0e0"` address one row: leading and trailing zeros are dropped,
/// exponents are expanded and negative zero becomes `0`.
pub fn canonical_numeric(text: &str) -> Result<String, String> {
    let malformed = || format!("{:?} is not a decimal number", text);

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (mantissa, exponent) = match unsigned.find(|c: char| c == 'e' || c == 'E') {
        Some(at) => {
            let exponent = unsigned[at + 1..].parse::<i64>().map_err(|_| malformed())?;
            (&unsigned[..at], exponent)
        }
        None => (unsigned, 0),
    };
    if !(-MAX_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
        return Err(format!("{:?} is outside the NUMERIC range", text));
    }
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let mut digits: String = format!("{}{}", whole, fraction);
    // Position of the decimal point within `digits`
    let mut point = whole.len() as i64 + exponent;

    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.replace_range(..leading, "");
    point -= leading as i64;
    digits.truncate(digits.trim_end_matches('0').len());

    if digits.is_empty() {
        return Ok("0".to_string());
    }

    let len = digits.len() as i64;
    if point > NUMERIC_MAX_WHOLE_DIGITS || len - point > NUMERIC_MAX_SCALE {
        return Err(format!("{:?} is outside the NUMERIC range", text));
    }

    let mut canonical = String::with_capacity(digits.len() + 2);
    if negative {
        canonical.push('-');
    }
    if point <= 0 {
        canonical.push_str("0.");
        canonical.extend(std::iter::repeat('0').take((-point) as usize));
        canonical.push_str(&digits);
    } else if point >= len {
        canonical.push_str(&digits);
        canonical.extend(std::iter::repeat('0').take((point - len) as usize));
    } else {
        let (int_part, frac_part) = digits.split_at(point as usize);
        canonical.push_str(int_part);
        canonical.push('.');
        canonical.push_str(frac_part);
    }
    Ok(canonical)
}

/// Quotes an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_labels(labels: &[String]) -> String {
    labels
        .iter()
        .map(|l| format!("'{}'", l.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn literal(cell: &Cell) -> String {
    match cell {
        Cell::Null => "NULL".into(),
        Cell::Bool(true) => "TRUE".into(),
        Cell::Bool(false) => "FALSE".into(),
        Cell::Int(i) => i.to_string(),
        Cell::Numeric(s) => s.clone(),
        Cell::Text(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", serde_json::to_string(other).unwrap_or_default()),
    }
}
