//! Per-indexer registry of module schemas
//!
//! Schemas are registered once and frozen: the registry hands out shared,
//! immutable `Arc<ModuleSchema>` values. Each indexer owns its own registry,
//! so independent indexers never see each other's modules.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::errors::{SchemaError, SchemaResult};
use super::field::is_valid_name;
use super::types::{ModuleSchema, ObjectType};

/// Validated, frozen module schemas indexed by module name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    modules: BTreeMap<String, Arc<ModuleSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a module schema.
    ///
    /// # Errors
    ///
    /// - `DuplicateModule` if the module is already registered
    /// - `InvalidTypeName` if the module name fails the name grammar
    /// - `DuplicateTypeName` if two types of the module share a name
    /// - `SchemaValidationFailed` wrapping any other declaration error
    pub fn register(&mut self, module: &str, schema: ModuleSchema) -> SchemaResult<Arc<ModuleSchema>> {
        if self.modules.contains_key(module) {
            return Err(SchemaError::DuplicateModule(module.to_string()));
        }
        if !is_valid_name(module) {
            return Err(SchemaError::InvalidTypeName(module.to_string()));
        }

        schema.validate(module).map_err(|e| match e {
            dup @ SchemaError::DuplicateTypeName { .. } => dup,
            other => SchemaError::SchemaValidationFailed {
                module: module.to_string(),
                source: Box::new(other),
            },
        })?;

        let schema = Arc::new(schema);
        self.modules.insert(module.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Resolves an object type of a registered module.
    pub fn lookup(&self, module: &str, object: &str) -> SchemaResult<&ObjectType> {
        let schema = self
            .modules
            .get(module)
            .ok_or_else(|| SchemaError::UnknownModule(module.to_string()))?;
        schema
            .object_type(object)
            .ok_or_else(|| SchemaError::UnknownObject {
                module: module.to_string(),
                object: object.to_string(),
            })
    }

    /// Removes a module, returning its schema.
    ///
    /// Used to back out a registration whose tables could not be set up.
    pub fn remove(&mut self, module: &str) -> Option<Arc<ModuleSchema>> {
        self.modules.remove(module)
    }

    /// Returns a registered module schema.
    pub fn module(&self, module: &str) -> Option<&Arc<ModuleSchema>> {
        self.modules.get(module)
    }

    /// Checks if a module is registered.
    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Registered module names in sorted order.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Returns the number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
