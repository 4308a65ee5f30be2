//! Field, enum and struct declarations
//!
//! `Field::validate_value` is the single gate a value passes before it is
//! encoded for storage. It is pure: everything it needs comes from the field
//! and the `TypeResolver` it is handed.

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::{SchemaError, SchemaResult};
use super::kind::Kind;
use super::value::Value;

/// Returns true if `name` matches `^[a-zA-Z_][a-zA-Z0-9_]{0,63}$`.
pub fn is_valid_name(name: &str) -> bool {
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    FORMAT
        .get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]{0,63}$").expect("name pattern is valid"))
        .is_match(name)
}

/// Resolves type names referenced by fields.
pub trait TypeResolver {
    /// Looks up an enum type by name.
    fn enum_type(&self, name: &str) -> Option<&EnumType>;

    /// Looks up a struct type by name.
    fn struct_type(&self, name: &str) -> Option<&StructType>;
}

/// Resolver with no named types, for fields that reference none.
impl TypeResolver for () {
    fn enum_type(&self, _name: &str) -> Option<&EnumType> {
        None
    }

    fn struct_type(&self, _name: &str) -> Option<&StructType> {
        None
    }
}

/// A named, ordered set of string labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Validates the enum: valid name, at least one value, unique valid labels.
    pub fn validate(&self) -> SchemaResult<()> {
        if !is_valid_name(&self.name) {
            return Err(SchemaError::InvalidTypeName(self.name.clone()));
        }
        if self.values.is_empty() {
            return Err(self.invalid("enum must have at least one value"));
        }

        let mut seen = HashSet::new();
        for value in &self.values {
            if !is_valid_name(value) {
                return Err(self.invalid(format!("invalid enum value {:?}", value)));
            }
            if !seen.insert(value.as_str()) {
                return Err(self.invalid(format!("duplicate enum value {:?}", value)));
            }
        }
        Ok(())
    }

    /// Returns true if `value` is one of the labels.
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Checks that `value`, held by `field`, is one of the labels.
    pub fn validate_value(&self, field: &str, value: &str) -> SchemaResult<()> {
        if self.contains(value) {
            return Ok(());
        }
        Err(SchemaError::UnknownEnumValue {
            field: field.to_string(),
            enum_name: self.name.clone(),
            value: value.to_string(),
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidEnumType {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// A named group of fields used as the shape of struct values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<Field>,
}

impl StructType {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Validates the struct declaration and each of its fields.
    ///
    /// Struct fields may not themselves be structs, which keeps struct
    /// references acyclic.
    pub fn validate(&self, types: &dyn TypeResolver) -> SchemaResult<()> {
        if !is_valid_name(&self.name) {
            return Err(SchemaError::InvalidTypeName(self.name.clone()));
        }
        if self.fields.is_empty() {
            return Err(SchemaError::InvalidStructDefinition {
                field: self.name.clone(),
                reason: "struct must have at least one field".into(),
            });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            field.validate(types)?;
            if field.kind == Kind::Struct {
                return Err(SchemaError::InvalidFieldKind {
                    field: field.name.clone(),
                    reason: "structs cannot nest other structs".into(),
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

/// A field of an object or struct type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: Kind,
    #[serde(default)]
    pub nullable: bool,
    /// Element kind when `kind` is `List`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_kind: Option<Kind>,
    /// Referenced enum or struct name
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Bit width or maximum length, see `Kind::size_rule`
    #[serde(default)]
    pub size: u32,
}

impl Field {
    /// Creates a non-nullable field of `kind`.
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            element_kind: None,
            type_name: None,
            size: 0,
        }
    }

    /// Creates an enum field referencing `enum_name`.
    pub fn enumeration(name: impl Into<String>, enum_name: impl Into<String>) -> Self {
        Self::new(name, Kind::Enum).with_type(enum_name)
    }

    /// Creates a list field with the given element kind.
    pub fn list(name: impl Into<String>, element_kind: Kind) -> Self {
        Self {
            element_kind: Some(element_kind),
            ..Self::new(name, Kind::List)
        }
    }

    /// Creates a struct field referencing `struct_name`.
    pub fn structure(name: impl Into<String>, struct_name: impl Into<String>) -> Self {
        Self::new(name, Kind::Struct).with_type(struct_name)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// The kind that decides value shape: the element kind for lists.
    pub fn scalar_kind(&self) -> Kind {
        match (self.kind, self.element_kind) {
            (Kind::List, Some(element)) => element,
            (kind, _) => kind,
        }
    }

    /// Validates the declaration.
    pub fn validate(&self, types: &dyn TypeResolver) -> SchemaResult<()> {
        if !is_valid_name(&self.name) {
            return Err(SchemaError::InvalidFieldName(self.name.clone()));
        }

        self.kind
            .validate_attributes(self.size, self.element_kind)
            .map_err(|e| SchemaError::InvalidFieldKind {
                field: self.name.clone(),
                reason: e.to_string(),
            })?;

        match (self.scalar_kind(), self.type_name.as_deref()) {
            (Kind::Enum, None) => Err(SchemaError::InvalidEnumDefinition {
                field: self.name.clone(),
                reason: "enum fields must reference an enum type".into(),
            }),
            (Kind::Enum, Some(name)) => {
                let enum_type = types.enum_type(name).ok_or_else(|| {
                    SchemaError::InvalidEnumDefinition {
                        field: self.name.clone(),
                        reason: format!("enum type {:?} is not defined", name),
                    }
                })?;
                enum_type
                    .validate()
                    .map_err(|e| SchemaError::InvalidEnumDefinition {
                        field: self.name.clone(),
                        reason: e.to_string(),
                    })
            }
            (Kind::Struct, None) => Err(SchemaError::InvalidStructDefinition {
                field: self.name.clone(),
                reason: "struct fields must reference a struct type".into(),
            }),
            (Kind::Struct, Some(name)) => types.struct_type(name).map(|_| ()).ok_or_else(|| {
                SchemaError::InvalidStructDefinition {
                    field: self.name.clone(),
                    reason: format!("struct type {:?} is not defined", name),
                }
            }),
            (_, Some(name)) => Err(SchemaError::EnumDefinitionNotAllowed {
                field: self.name.clone(),
                type_name: name.to_string(),
            }),
            (_, None) => Ok(()),
        }
    }

    /// Validates a value against this field's kind and nullability.
    pub fn validate_value(&self, value: Option<&Value>, types: &dyn TypeResolver) -> SchemaResult<()> {
        let value = match value {
            Some(value) => value,
            None if self.nullable => return Ok(()),
            None => {
                return Err(SchemaError::NullNotAllowed {
                    field: self.name.clone(),
                })
            }
        };

        match (self.kind, value) {
            (Kind::List, Value::List(items)) => {
                let element = self.scalar_kind();
                for (i, item) in items.iter().enumerate() {
                    self.check_scalar(element, item, types, &format!("{}[{}]", self.name, i))?;
                }
                Ok(())
            }
            (kind, value) => self.check_scalar(kind, value, types, &self.name),
        }
    }

    fn check_scalar(
        &self,
        kind: Kind,
        value: &Value,
        types: &dyn TypeResolver,
        path: &str,
    ) -> SchemaResult<()> {
        kind.check_value(value, self.size)
            .map_err(|expected| SchemaError::TypeMismatch {
                field: path.to_string(),
                expected,
                actual: value.type_name().to_string(),
            })?;

        match (kind, value) {
            (Kind::Enum, Value::String(label)) => {
                let enum_name = self.type_name.as_deref().unwrap_or_default();
                let enum_type = types.enum_type(enum_name).ok_or_else(|| {
                    SchemaError::InvalidEnumDefinition {
                        field: self.name.clone(),
                        reason: format!("enum type {:?} is not defined", enum_name),
                    }
                })?;
                enum_type.validate_value(path, label)
            }
            (Kind::Struct, Value::Struct(members)) => {
                let struct_name = self.type_name.as_deref().unwrap_or_default();
                let struct_type = types.struct_type(struct_name).ok_or_else(|| {
                    SchemaError::InvalidStructDefinition {
                        field: self.name.clone(),
                        reason: format!("struct type {:?} is not defined", struct_name),
                    }
                })?;
                validate_struct_members(struct_type, members, types, path)
            }
            _ => Ok(()),
        }
    }
}

fn validate_struct_members(
    struct_type: &StructType,
    members: &std::collections::BTreeMap<String, Value>,
    types: &dyn TypeResolver,
    path: &str,
) -> SchemaResult<()> {
    let declared: BTreeSet<&str> = struct_type.fields.iter().map(|f| f.name.as_str()).collect();
    if let Some(extra) = members.keys().find(|name| !declared.contains(name.as_str())) {
        return Err(SchemaError::TypeMismatch {
            field: format!("{}.{}", path, extra),
            expected: format!("a field of struct {}", struct_type.name),
            actual: "undeclared field".into(),
        });
    }

    for field in &struct_type.fields {
        field
            .validate_value(members.get(&field.name), types)
            .map_err(|e| nest_path(e, path))?;
    }
    Ok(())
}

fn nest_path(err: SchemaError, path: &str) -> SchemaError {
    match err {
        SchemaError::NullNotAllowed { field } => SchemaError::NullNotAllowed {
            field: format!("{}.{}", path, field),
        },
        SchemaError::TypeMismatch {
            field,
            expected,
            actual,
        } => SchemaError::TypeMismatch {
            field: format!("{}.{}", path, field),
            expected,
            actual,
        },
        SchemaError::UnknownEnumValue {
            field,
            enum_name,
            value,
        } => SchemaError::UnknownEnumValue {
            field: format!("{}.{}", path, field),
            enum_name,
            value,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Types {
        enums: Vec<EnumType>,
        structs: Vec<StructType>,
    }

    impl TypeResolver for Types {
        fn enum_type(&self, name: &str) -> Option<&EnumType> {
            self.enums.iter().find(|e| e.name == name)
        }

        fn struct_type(&self, name: &str) -> Option<&StructType> {
            self.structs.iter().find(|s| s.name == name)
        }
    }

    fn types() -> Types {
        Types {
            enums: vec![EnumType::new("color", &["red", "green"])],
            structs: vec![StructType::new(
                "coin",
                vec![
                    Field::new("denom", Kind::String),
                    Field::new("amount", Kind::Integer).nullable(),
                ],
            )],
        }
    }

    #[test]
    fn test_name_grammar() {
        assert!(is_valid_name("a"));
        assert!(is_valid_name("_private"));
        assert!(is_valid_name("Balance_2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name("with-dash"));
        assert!(!is_valid_name(&"x".repeat(65)));
        assert!(is_valid_name(&"x".repeat(64)));
    }

    #[test]
    fn test_invalid_field_name() {
        let field = Field::new("bad name", Kind::String);
        assert!(matches!(field.validate(&()), Err(SchemaError::InvalidFieldName(_))));
    }

    #[test]
    fn test_enum_requires_definition() {
        let missing = Field::new("color", Kind::Enum);
        assert!(matches!(
            missing.validate(&types()),
            Err(SchemaError::InvalidEnumDefinition { .. })
        ));

        let unknown = Field::enumeration("color", "shade");
        assert!(matches!(
            unknown.validate(&types()),
            Err(SchemaError::InvalidEnumDefinition { .. })
        ));

        assert!(Field::enumeration("color", "color").validate(&types()).is_ok());
    }

    #[test]
    fn test_malformed_enum_rejected() {
        let bad = Types {
            enums: vec![EnumType::new("color", &["red", "red"])],
            structs: vec![],
        };
        assert!(matches!(
            Field::enumeration("color", "color").validate(&bad),
            Err(SchemaError::InvalidEnumDefinition { .. })
        ));
    }

    #[test]
    fn test_enum_definition_not_allowed() {
        let field = Field::new("name", Kind::String).with_type("color");
        assert!(matches!(
            field.validate(&types()),
            Err(SchemaError::EnumDefinitionNotAllowed { .. })
        ));
    }

    #[test]
    fn test_list_of_list_rejected() {
        let field = Field::list("nested", Kind::List);
        assert!(matches!(
            field.validate(&()),
            Err(SchemaError::InvalidFieldKind { .. })
        ));
    }

    #[test]
    fn test_null_handling() {
        let required = Field::new("count", Kind::Uint32);
        assert!(matches!(
            required.validate_value(None, &()),
            Err(SchemaError::NullNotAllowed { .. })
        ));
        assert!(required.clone().nullable().validate_value(None, &()).is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let field = Field::new("count", Kind::Uint32);
        let err = field.validate_value(Some(&Value::from("1")), &()).unwrap_err();
        match err {
            SchemaError::TypeMismatch { field, expected, actual } => {
                assert_eq!(field, "count");
                assert_eq!(expected, "uint32");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unvalidated_bit_width_rejects_value() {
        let field = Field::new("x", Kind::IntN);
        let err = field.validate_value(Some(&Value::Int(1)), &()).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { ref field, .. } if field == "x"));
    }

    #[test]
    fn test_enum_membership() {
        let field = Field::enumeration("color", "color");
        assert!(field.validate_value(Some(&Value::from("red")), &types()).is_ok());
        assert!(matches!(
            field.validate_value(Some(&Value::from("blue")), &types()),
            Err(SchemaError::UnknownEnumValue { .. })
        ));
    }

    #[test]
    fn test_list_elements_checked() {
        let field = Field::list("tags", Kind::String).with_size(3);
        let ok = Value::List(vec![Value::from("a"), Value::from("abc")]);
        assert!(field.validate_value(Some(&ok), &()).is_ok());

        let too_long = Value::List(vec![Value::from("a"), Value::from("abcd")]);
        let err = field.validate_value(Some(&too_long), &()).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { ref field, .. } if field == "tags[1]"));
    }

    #[test]
    fn test_enum_list_membership() {
        let field = Field::list("colors", Kind::Enum).with_type("color");
        assert!(field.validate(&types()).is_ok());
        let value = Value::List(vec![Value::from("red"), Value::from("blue")]);
        assert!(matches!(
            field.validate_value(Some(&value), &types()),
            Err(SchemaError::UnknownEnumValue { .. })
        ));
    }

    #[test]
    fn test_struct_members() {
        let field = Field::structure("fee", "coin");
        assert!(field.validate(&types()).is_ok());

        let mut members = BTreeMap::new();
        members.insert("denom".to_string(), Value::from("uatom"));
        assert!(field
            .validate_value(Some(&Value::Struct(members.clone())), &types())
            .is_ok());

        members.remove("denom");
        let err = field
            .validate_value(Some(&Value::Struct(members.clone())), &types())
            .unwrap_err();
        assert!(matches!(err, SchemaError::NullNotAllowed { ref field } if field == "fee.denom"));

        members.insert("denom".to_string(), Value::from("uatom"));
        members.insert("memo".to_string(), Value::from("hi"));
        assert!(field
            .validate_value(Some(&Value::Struct(members)), &types())
            .is_err());
    }

    #[test]
    fn test_field_deserializes_type_key() {
        let field: Field = serde_json::from_str(
            r#"{"name":"color","kind":"enum","type":"color"}"#,
        )
        .unwrap();
        assert_eq!(field, Field::enumeration("color", "color"));
    }
}
