//! Storage compiler: object types to table specs
//!
//! Compilation is a pure function of its inputs. The same object type,
//! module name and retention setting always produce the same `TableSpec`,
//! the same DDL text and therefore the same fingerprint.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::schema::{
    Field, Kind, ObjectType, TypeResolver, Value, DELETED_AT_COLUMN, DELETED_COLUMN,
};

use super::column::{canonical_numeric, quote_ident, Cell, ColumnConstraint, ColumnSpec, ColumnType};
use super::errors::{StorageError, StorageResult};

/// Relational structure compiled from one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    /// Key columns first, then value columns, then tombstone columns
    pub columns: Vec<ColumnSpec>,
    /// Primary key column names in key-field order
    pub primary_key: Vec<String>,
}

impl TableSpec {
    /// Finds a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Whether the table carries tombstone columns.
    pub fn retains_deletions(&self) -> bool {
        self.column(DELETED_COLUMN).is_some()
    }

    /// Key columns in primary key order.
    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.primary_key.iter().filter_map(|name| self.column(name))
    }

    /// Renders the `CREATE TABLE` statement.
    pub fn create_table_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", quote_ident(&self.name));
        for column in &self.columns {
            sql.push('\t');
            sql.push_str(&column.sql());
            sql.push_str(",\n");
        }
        let key = self
            .primary_key
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!("\tPRIMARY KEY ({})\n);", key));
        sql
    }

    /// Renders the `ALTER TABLE ... ADD COLUMN` statement for `column`.
    pub fn add_column_sql(&self, column: &ColumnSpec) -> String {
        format!("ALTER TABLE {} ADD COLUMN {};", quote_ident(&self.name), column.sql())
    }

    /// CRC32 over the DDL text; equal specs have equal fingerprints.
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(self.create_table_sql().as_bytes());
        hasher.finalize()
    }
}

/// Name of the table mirroring `object` of `module`.
pub fn table_name(module: &str, object: &str) -> String {
    format!("{}_{}", module, object)
}

/// Maps a kind to its column type. Exhaustive over `Kind`.
pub fn column_type(kind: Kind, size: u32, element_kind: Option<Kind>) -> ColumnType {
    match kind {
        Kind::Int8 | Kind::Int16 | Kind::Uint8 => ColumnType::SmallInt,
        Kind::Int32 | Kind::Uint16 => ColumnType::Integer,
        Kind::Int64 | Kind::Uint32 | Kind::Duration => ColumnType::BigInt,
        Kind::Uint64 | Kind::Integer | Kind::Decimal => ColumnType::Numeric,
        Kind::IntN => match size {
            0..=16 => ColumnType::SmallInt,
            17..=32 => ColumnType::Integer,
            33..=64 => ColumnType::BigInt,
            _ => ColumnType::Numeric,
        },
        Kind::UintN => match size {
            0..=15 => ColumnType::SmallInt,
            16..=31 => ColumnType::Integer,
            32..=63 => ColumnType::BigInt,
            _ => ColumnType::Numeric,
        },
        Kind::Float32 => ColumnType::Real,
        Kind::Float64 => ColumnType::DoublePrecision,
        Kind::String | Kind::Enum => ColumnType::Text,
        Kind::Bytes | Kind::Address => ColumnType::Bytea,
        Kind::Json | Kind::Struct => ColumnType::Jsonb,
        Kind::Bool => ColumnType::Boolean,
        Kind::Time => ColumnType::Timestamptz,
        Kind::List => {
            // Validation guarantees a scalar element kind.
            let element = element_kind.unwrap_or(Kind::Json);
            ColumnType::Array(Box::new(column_type(element, size, None)))
        }
    }
}

/// Compiles one field to a column.
pub fn compile_field(field: &Field, types: &dyn TypeResolver) -> ColumnSpec {
    let column = ColumnSpec::new(
        field.name.clone(),
        column_type(field.kind, field.size, field.element_kind),
        field.nullable,
    );

    let scalar = field.scalar_kind();
    let constraint = match scalar {
        Kind::Enum => field
            .type_name
            .as_deref()
            .and_then(|name| types.enum_type(name))
            .map(|e| ColumnConstraint::AllowList(e.values.clone())),
        Kind::String if field.size > 0 => Some(ColumnConstraint::MaxChars(field.size)),
        Kind::Bytes | Kind::Address if field.size > 0 => Some(ColumnConstraint::MaxBytes(field.size)),
        Kind::Json if field.size > 0 => Some(ColumnConstraint::MaxJsonLength(field.size)),
        _ => None,
    };

    match constraint {
        Some(constraint) => column.with_constraint(constraint),
        None => column,
    }
}

/// The tombstone columns appended when deletions are retained.
pub fn tombstone_columns() -> [ColumnSpec; 2] {
    [
        ColumnSpec::new(DELETED_COLUMN, ColumnType::Boolean, false).with_default(Cell::Bool(false)),
        ColumnSpec::new(DELETED_AT_COLUMN, ColumnType::Timestamptz, true),
    ]
}

/// Compiles an object type of `module` to a table spec.
pub fn compile(
    module: &str,
    object: &ObjectType,
    types: &dyn TypeResolver,
    retain_deletions: bool,
) -> TableSpec {
    let mut columns: Vec<ColumnSpec> = object.fields().map(|f| compile_field(f, types)).collect();
    if retain_deletions {
        columns.extend(tombstone_columns());
    }

    TableSpec {
        name: table_name(module, &object.name),
        columns,
        primary_key: object.key_fields.iter().map(|f| f.name.clone()).collect(),
    }
}

/// Encodes a validated value for a column of `column_type`.
///
/// Validation runs first, so a failure here means the value and column
/// disagree in a way the validator cannot see (for example a `uint_n`
/// string stored in an integer column that does not parse).
pub fn encode_value(column: &str, value: Option<&Value>, column_type: &ColumnType) -> StorageResult<Cell> {
    let value = match value {
        Some(value) => value,
        None => return Ok(Cell::Null),
    };

    let encoding_error = |reason: String| StorageError::Encoding {
        column: column.to_string(),
        reason,
    };

    let cell = match (column_type, value) {
        (ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt, Value::Int(i)) => Cell::Int(*i),
        (ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt, Value::Uint(u)) => {
            Cell::Int(i64::try_from(*u).map_err(|e| encoding_error(e.to_string()))?)
        }
        (ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt, Value::Integer(s)) => {
            Cell::Int(s.parse::<i64>().map_err(|e| encoding_error(e.to_string()))?)
        }
        (ColumnType::BigInt, Value::Duration(nanos)) => Cell::Int(*nanos),
        (ColumnType::Numeric, Value::Int(i)) => Cell::Numeric(i.to_string()),
        (ColumnType::Numeric, Value::Uint(u)) => Cell::Numeric(u.to_string()),
        (ColumnType::Numeric, Value::Integer(s) | Value::Decimal(s)) => {
            Cell::Numeric(canonical_numeric(s).map_err(encoding_error)?)
        }
        (ColumnType::Real | ColumnType::DoublePrecision, Value::Float(f)) => Cell::Float(*f),
        (ColumnType::Text, Value::String(s)) => Cell::Text(s.clone()),
        (ColumnType::Bytea, Value::Bytes(b)) => Cell::Bytes(b.clone()),
        (ColumnType::Boolean, Value::Bool(b)) => Cell::Bool(*b),
        (ColumnType::Timestamptz, Value::Time(t)) => Cell::Timestamp(*t),
        (ColumnType::Jsonb, Value::Json(v)) => Cell::Json(v.clone()),
        (ColumnType::Jsonb, Value::Struct(_)) => Cell::Json(value.to_json()),
        (ColumnType::Array(element), Value::List(items)) => Cell::Array(
            items
                .iter()
                .map(|item| encode_value(column, Some(item), element))
                .collect::<StorageResult<Vec<_>>>()?,
        ),
        (column_type, value) => {
            return Err(encoding_error(format!(
                "{} value cannot be stored as {}",
                value.type_name(),
                column_type
            )))
        }
    };
    Ok(cell)
}
