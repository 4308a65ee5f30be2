//! Change applier
//!
//! Turns one object update into exactly one row operation against the
//! object's compiled table. The applier validates and encodes; it never
//! touches the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::IndexerResult;
use crate::schema::{Field, ObjectType, SchemaError, TypeResolver, Value};
use crate::storage::{encode_value, Cell, RowOp, StorageError, TableSpec};

/// A single create, update or delete of one object, addressed to a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    /// Object type name within the module
    pub type_name: String,
    /// One value per key field, in declaration order
    pub key: Vec<Value>,
    /// One entry per value field, in declaration order. Ignored for deletes.
    #[serde(default)]
    pub value: Vec<Option<Value>>,
    #[serde(default)]
    pub delete: bool,
}

impl ObjectUpdate {
    /// Insert or update with the full value vector.
    pub fn upsert(type_name: impl Into<String>, key: Vec<Value>, value: Vec<Option<Value>>) -> Self {
        Self {
            type_name: type_name.into(),
            key,
            value,
            delete: false,
        }
    }

    pub fn delete(type_name: impl Into<String>, key: Vec<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            key,
            value: Vec::new(),
            delete: true,
        }
    }
}

/// Counts of each kind of row operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub upserted: u64,
    pub deleted: u64,
    pub tombstoned: u64,
}

impl OpCounts {
    pub fn of<'a>(ops: impl IntoIterator<Item = &'a RowOp>) -> Self {
        ops.into_iter().fold(Self::default(), |mut counts, op| {
            match op {
                RowOp::Upsert { .. } => counts.upserted += 1,
                RowOp::Delete { .. } => counts.deleted += 1,
                RowOp::Tombstone { .. } => counts.tombstoned += 1,
            }
            counts
        })
    }
}

/// Maps updates of one object type onto its table.
pub struct ChangeApplier<'a> {
    object: &'a ObjectType,
    table: &'a TableSpec,
    types: &'a dyn TypeResolver,
}

impl<'a> ChangeApplier<'a> {
    pub fn new(object: &'a ObjectType, table: &'a TableSpec, types: &'a dyn TypeResolver) -> Self {
        Self { object, table, types }
    }

    /// Validates `update` and returns the row operation that applies it.
    ///
    /// Deletes become `Tombstone` stamped with `deleted_at` when the table
    /// retains deletions, and `Delete` otherwise.
    ///
    /// # Errors
    ///
    /// - `Validation` if the key or value vector has the wrong arity or a
    ///   value fails its field
    /// - `Backend(Encoding)` if a validated value still cannot be stored
    pub fn apply(&self, update: &ObjectUpdate, deleted_at: DateTime<Utc>) -> IndexerResult<RowOp> {
        let key = self.encode_key(&update.key)?;

        if update.delete {
            let table = self.table.name.clone();
            return Ok(if self.table.retains_deletions() {
                RowOp::Tombstone { table, key, deleted_at }
            } else {
                RowOp::Delete { table, key }
            });
        }

        check_arity(&self.object.name, "value", self.object.value_fields.len(), update.value.len())?;
        let values = self
            .object
            .value_fields
            .iter()
            .zip(&update.value)
            .map(|(field, value)| Ok((field.name.clone(), self.encode(field, value.as_ref())?)))
            .collect::<IndexerResult<Vec<_>>>()?;

        Ok(RowOp::Upsert {
            table: self.table.name.clone(),
            key,
            values,
        })
    }

    fn encode_key(&self, key: &[Value]) -> IndexerResult<Vec<Cell>> {
        check_arity(&self.object.name, "key", self.object.key_fields.len(), key.len())?;
        self.object
            .key_fields
            .iter()
            .zip(key)
            .map(|(field, value)| self.encode(field, Some(value)))
            .collect()
    }

    fn encode(&self, field: &Field, value: Option<&Value>) -> IndexerResult<Cell> {
        field.validate_value(value, self.types)?;
        let column = self
            .table
            .column(&field.name)
            .ok_or_else(|| StorageError::SchemaDrift {
                table: self.table.name.clone(),
                reason: format!("compiled table has no column {:?}", field.name),
            })?;
        Ok(encode_value(&field.name, value, &column.column_type)?)
    }
}

fn check_arity(object: &str, part: &str, expected: usize, actual: usize) -> Result<(), SchemaError> {
    if expected == actual {
        return Ok(());
    }
    Err(SchemaError::TypeMismatch {
        field: format!("{}.{}", object, part),
        expected: format!("{} values", expected),
        actual: format!("{} values", actual),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IndexerError;
    use crate::schema::{EnumType, Kind, ModuleSchema};
    use crate::storage::compile;

    fn schema() -> ModuleSchema {
        ModuleSchema::new()
            .with_enum(EnumType::new("status", &["active", "jailed"]))
            .with_object(ObjectType::new(
                "validators",
                vec![Field::new("address", Kind::Address)],
                vec![
                    Field::enumeration("status", "status"),
                    Field::new("power", Kind::Uint64).nullable(),
                ],
            ))
    }

    fn applier_op(retain: bool, update: &ObjectUpdate) -> IndexerResult<RowOp> {
        let schema = schema();
        let object = schema.object_type("validators").unwrap();
        let table = compile("staking", object, &schema, retain);
        ChangeApplier::new(object, &table, &schema).apply(update, Utc::now())
    }

    #[test]
    fn test_upsert() {
        let update = ObjectUpdate::upsert(
            "validators",
            vec![Value::Bytes(vec![1, 2, 3])],
            vec![Some(Value::from("active")), Some(Value::Uint(10))],
        );
        let op = applier_op(true, &update).unwrap();
        assert_eq!(
            op,
            RowOp::Upsert {
                table: "staking_validators".into(),
                key: vec![Cell::Bytes(vec![1, 2, 3])],
                values: vec![
                    ("status".into(), Cell::Text("active".into())),
                    ("power".into(), Cell::Numeric("10".into())),
                ],
            }
        );
    }

    #[test]
    fn test_delete_follows_retention() {
        let update = ObjectUpdate::delete("validators", vec![Value::Bytes(vec![1])]);
        assert!(matches!(applier_op(true, &update).unwrap(), RowOp::Tombstone { .. }));
        assert!(matches!(applier_op(false, &update).unwrap(), RowOp::Delete { .. }));
    }

    #[test]
    fn test_rejects_unknown_enum_value() {
        let update = ObjectUpdate::upsert(
            "validators",
            vec![Value::Bytes(vec![1])],
            vec![Some(Value::from("unbonded")), None],
        );
        let err = applier_op(false, &update).unwrap_err();
        assert!(matches!(
            err,
            IndexerError::Validation(SchemaError::UnknownEnumValue { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_arity() {
        let short = ObjectUpdate::upsert("validators", vec![Value::Bytes(vec![1])], vec![None]);
        assert!(matches!(
            applier_op(false, &short),
            Err(IndexerError::Validation(SchemaError::TypeMismatch { .. }))
        ));

        let no_key = ObjectUpdate::delete("validators", vec![]);
        assert!(applier_op(false, &no_key).is_err());
    }

    #[test]
    fn test_rejects_null_non_nullable() {
        let update = ObjectUpdate::upsert("validators", vec![Value::Bytes(vec![1])], vec![None, None]);
        assert!(matches!(
            applier_op(false, &update),
            Err(IndexerError::Validation(SchemaError::NullNotAllowed { .. }))
        ));
    }

    #[test]
    fn test_op_counts() {
        let ops = vec![
            RowOp::Delete {
                table: "t".into(),
                key: vec![],
            },
            RowOp::Upsert {
                table: "t".into(),
                key: vec![],
                values: vec![],
            },
        ];
        assert_eq!(
            OpCounts::of(&ops),
            OpCounts {
                upserted: 1,
                deleted: 1,
                tombstoned: 0
            }
        );
    }
}
