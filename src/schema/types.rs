//! Object types and module schemas
//!
//! A module schema is declared once by a producing module and validated as a
//! whole: every enum, struct and object type must be well formed and type
//! names must be unique within the module.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::errors::{SchemaError, SchemaResult};
use super::field::{is_valid_name, EnumType, Field, StructType, TypeResolver};

/// Tombstone flag column appended when deletions are retained.
pub const DELETED_COLUMN: &str = "_deleted";

/// Deletion timestamp column appended when deletions are retained.
pub const DELETED_AT_COLUMN: &str = "_deleted_at";

/// Column names managed by the indexer; user fields may not use them.
pub const RESERVED_COLUMNS: [&str; 2] = [DELETED_COLUMN, DELETED_AT_COLUMN];

/// A type of object whose instances are materialized as table rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub name: String,
    /// Composite identity, never nullable
    pub key_fields: Vec<Field>,
    #[serde(default)]
    pub value_fields: Vec<Field>,
    /// Per-type retention preference; `None` defers to the indexer config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_deletions: Option<bool>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>, key_fields: Vec<Field>, value_fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            key_fields,
            value_fields,
            retain_deletions: None,
        }
    }

    pub fn with_retain_deletions(mut self, retain: bool) -> Self {
        self.retain_deletions = Some(retain);
        self
    }

    /// Key fields followed by value fields.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.key_fields.iter().chain(self.value_fields.iter())
    }

    /// Finds a key or value field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().find(|f| f.name == name)
    }

    /// Validates the object type against the module's named types.
    pub fn validate(&self, types: &dyn TypeResolver) -> SchemaResult<()> {
        if !is_valid_name(&self.name) {
            return Err(SchemaError::InvalidTypeName(self.name.clone()));
        }
        if self.key_fields.is_empty() {
            return Err(SchemaError::InvalidObjectType {
                object: self.name.clone(),
                reason: "object types must have at least one key field".into(),
            });
        }

        for field in &self.key_fields {
            field.validate(types)?;
            if field.nullable {
                return Err(SchemaError::NullableKeyField {
                    object: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if !field.kind.is_keyable() {
                return Err(SchemaError::InvalidFieldKind {
                    field: field.name.clone(),
                    reason: format!("{} cannot be used as a key", field.kind),
                });
            }
        }

        for field in &self.value_fields {
            field.validate(types)?;
        }

        let mut seen = HashSet::new();
        for field in self.fields() {
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(SchemaError::ReservedFieldName {
                    object: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateFieldName {
                    owner: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Everything one module declares about its data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSchema {
    #[serde(default)]
    pub object_types: Vec<ObjectType>,
    #[serde(default)]
    pub enum_types: Vec<EnumType>,
    #[serde(default)]
    pub struct_types: Vec<StructType>,
}

impl ModuleSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, object: ObjectType) -> Self {
        self.object_types.push(object);
        self
    }

    pub fn with_enum(mut self, enum_type: EnumType) -> Self {
        self.enum_types.push(enum_type);
        self
    }

    pub fn with_struct(mut self, struct_type: StructType) -> Self {
        self.struct_types.push(struct_type);
        self
    }

    /// Parses a schema from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Finds an object type by name.
    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.object_types.iter().find(|o| o.name == name)
    }

    /// Validates every declared type of the module.
    ///
    /// Errors are returned as-is; the registry wraps them with the module name.
    pub fn validate(&self, module: &str) -> SchemaResult<()> {
        let mut names = HashSet::new();
        let declared = self
            .enum_types
            .iter()
            .map(|e| &e.name)
            .chain(self.struct_types.iter().map(|s| &s.name))
            .chain(self.object_types.iter().map(|o| &o.name));
        for name in declared {
            if !names.insert(name.as_str()) {
                return Err(SchemaError::DuplicateTypeName {
                    module: module.to_string(),
                    name: name.clone(),
                });
            }
        }

        for enum_type in &self.enum_types {
            enum_type.validate()?;
        }
        for struct_type in &self.struct_types {
            struct_type.validate(self)?;
        }
        for object_type in &self.object_types {
            object_type.validate(self)?;
        }
        Ok(())
    }
}

impl TypeResolver for ModuleSchema {
    fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enum_types.iter().find(|e| e.name == name)
    }

    fn struct_type(&self, name: &str) -> Option<&StructType> {
        self.struct_types.iter().find(|s| s.name == name)
    }
}
