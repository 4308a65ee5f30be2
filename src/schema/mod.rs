//! Type system and schema registry
//!
//! Producing modules declare the shape of their data here, independent of any
//! storage technology.
//!
//! # Design Principles
//!
//! - Closed set of kinds, matched exhaustively
//! - Declarations validated once, at registration
//! - Values validated before they reach storage
//! - No coercion: a value either matches its field or is rejected

mod errors;
mod field;
mod kind;
mod registry;
mod types;
mod value;

pub use errors::{SchemaError, SchemaResult};
pub use field::{is_valid_name, EnumType, Field, StructType, TypeResolver};
pub use kind::{Kind, SizeRule, MAX_ADDRESS_LEN, MAX_INT_BITS};
pub use registry::SchemaRegistry;
pub use types::{ModuleSchema, ObjectType, DELETED_AT_COLUMN, DELETED_COLUMN, RESERVED_COLUMNS};
pub use value::{jsonb_text, Value};
