//! Schema error types
//!
//! Declaration errors are FATAL: a module whose schema fails validation is
//! rejected at registration and never retried. Value errors are REJECT: the
//! offending update is refused and the caller decides what to do next.

use thiserror::Error;

use crate::errors::Severity;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised by the type system and the schema registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    // ==================
    // Declaration Errors
    // ==================
    /// Kind name outside the closed set, or attributes that do not fit the kind
    #[error("invalid kind: {0}")]
    InvalidKind(String),

    /// Field name fails the identifier grammar
    #[error("invalid field name {0:?}")]
    InvalidFieldName(String),

    /// Field kind is not usable in this position
    #[error("invalid field kind for {field:?}: {reason}")]
    InvalidFieldKind { field: String, reason: String },

    /// Enum field whose referenced enum is missing or malformed
    #[error("invalid enum definition for field {field:?}: {reason}")]
    InvalidEnumDefinition { field: String, reason: String },

    /// Struct field whose referenced struct is missing or malformed
    #[error("invalid struct definition for field {field:?}: {reason}")]
    InvalidStructDefinition { field: String, reason: String },

    /// Type reference attached to a kind that takes none
    #[error("type reference {type_name:?} is only valid for enum or struct fields, found on {field:?}")]
    EnumDefinitionNotAllowed { field: String, type_name: String },

    /// Object, enum, struct or module name fails the identifier grammar
    #[error("invalid type name {0:?}")]
    InvalidTypeName(String),

    /// Enum declaration itself is malformed
    #[error("invalid enum type {name:?}: {reason}")]
    InvalidEnumType { name: String, reason: String },

    /// Object declaration is structurally invalid
    #[error("invalid object type {object:?}: {reason}")]
    InvalidObjectType { object: String, reason: String },

    /// Key fields identify rows and can never be null
    #[error("key field {field:?} of object type {object:?} cannot be nullable")]
    NullableKeyField { object: String, field: String },

    /// Field names collide within an object or struct
    #[error("duplicate field name {field:?} in {owner:?}")]
    DuplicateFieldName { owner: String, field: String },

    /// Field name collides with an indexer-managed column
    #[error("field name {field:?} in {object:?} is reserved")]
    ReservedFieldName { object: String, field: String },

    /// Compiled table name already belongs to another object type
    #[error("table {table:?} for object type {object:?} of module {module:?} is already used by {owner}")]
    TableNameConflict {
        table: String,
        module: String,
        object: String,
        owner: String,
    },

    // ==================
    // Value Errors
    // ==================
    /// Null supplied for a non-nullable field
    #[error("field {field:?} cannot be null")]
    NullNotAllowed { field: String },

    /// Value does not match the field kind
    #[error("invalid value for field {field:?}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// Enum value outside the declared labels
    #[error("value {value:?} for field {field:?} is not a member of enum {enum_name:?}")]
    UnknownEnumValue {
        field: String,
        enum_name: String,
        value: String,
    },

    // ==================
    // Registry Errors
    // ==================
    /// Module schema registered twice
    #[error("module {0:?} is already registered")]
    DuplicateModule(String),

    /// A module schema contained an invalid declaration
    #[error("schema for module {module:?} failed validation: {source}")]
    SchemaValidationFailed {
        module: String,
        #[source]
        source: Box<SchemaError>,
    },

    /// Two types of one module share a name
    #[error("duplicate type name {name:?} in module {module:?}")]
    DuplicateTypeName { module: String, name: String },

    /// No module registered under this name
    #[error("unknown module {0:?}")]
    UnknownModule(String),

    /// Module has no object type with this name
    #[error("unknown object type {object:?} in module {module:?}")]
    UnknownObject { module: String, object: String },
}

impl SchemaError {
    /// Stable error code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::InvalidKind(_) => "SCHEMA_INVALID_KIND",
            SchemaError::InvalidFieldName(_) => "SCHEMA_INVALID_FIELD_NAME",
            SchemaError::InvalidFieldKind { .. } => "SCHEMA_INVALID_FIELD_KIND",
            SchemaError::InvalidEnumDefinition { .. } => "SCHEMA_INVALID_ENUM_DEFINITION",
            SchemaError::InvalidStructDefinition { .. } => "SCHEMA_INVALID_STRUCT_DEFINITION",
            SchemaError::EnumDefinitionNotAllowed { .. } => "SCHEMA_ENUM_DEFINITION_NOT_ALLOWED",
            SchemaError::InvalidTypeName(_) => "SCHEMA_INVALID_TYPE_NAME",
            SchemaError::InvalidEnumType { .. } => "SCHEMA_INVALID_ENUM_TYPE",
            SchemaError::InvalidObjectType { .. } => "SCHEMA_INVALID_OBJECT_TYPE",
            SchemaError::NullableKeyField { .. } => "SCHEMA_NULLABLE_KEY_FIELD",
            SchemaError::DuplicateFieldName { .. } => "SCHEMA_DUPLICATE_FIELD_NAME",
            SchemaError::ReservedFieldName { .. } => "SCHEMA_RESERVED_FIELD_NAME",
            SchemaError::TableNameConflict { .. } => "SCHEMA_TABLE_NAME_CONFLICT",
            SchemaError::NullNotAllowed { .. } => "VALUE_NULL_NOT_ALLOWED",
            SchemaError::TypeMismatch { .. } => "VALUE_TYPE_MISMATCH",
            SchemaError::UnknownEnumValue { .. } => "VALUE_UNKNOWN_ENUM_VALUE",
            SchemaError::DuplicateModule(_) => "SCHEMA_DUPLICATE_MODULE",
            SchemaError::SchemaValidationFailed { .. } => "SCHEMA_VALIDATION_FAILED",
            SchemaError::DuplicateTypeName { .. } => "SCHEMA_DUPLICATE_TYPE_NAME",
            SchemaError::UnknownModule(_) => "SCHEMA_UNKNOWN_MODULE",
            SchemaError::UnknownObject { .. } => "SCHEMA_UNKNOWN_OBJECT",
        }
    }

    /// Returns true for errors raised while checking a value, as opposed to a declaration.
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            SchemaError::NullNotAllowed { .. }
                | SchemaError::TypeMismatch { .. }
                | SchemaError::UnknownEnumValue { .. }
        )
    }

    /// Severity of this error.
    ///
    /// Value errors and lookups of unknown objects reject a single update;
    /// everything else is a broken declaration.
    pub fn severity(&self) -> Severity {
        if self.is_value_error() || matches!(self, SchemaError::UnknownObject { .. }) {
            Severity::Reject
        } else {
            Severity::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_errors_reject() {
        let err = SchemaError::NullNotAllowed { field: "count".into() };
        assert!(err.is_value_error());
        assert_eq!(err.severity(), Severity::Reject);
        assert_eq!(err.code(), "VALUE_NULL_NOT_ALLOWED");
    }

    #[test]
    fn test_declaration_errors_fatal() {
        let err = SchemaError::NullableKeyField {
            object: "balances".into(),
            field: "id".into(),
        };
        assert_eq!(err.severity(), Severity::Fatal);
        assert!(!err.is_value_error());
    }

    #[test]
    fn test_validation_failed_wraps_source() {
        let err = SchemaError::SchemaValidationFailed {
            module: "bank".into(),
            source: Box::new(SchemaError::InvalidFieldName("1abc".into())),
        };
        let display = err.to_string();
        assert!(display.contains("bank"));
        assert!(display.contains("1abc"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
