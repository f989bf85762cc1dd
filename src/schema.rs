//! Table Schema
//!
//! Column definitions, the key column, and the additive merge rule.
//!
//! A `TableSchema` is an immutable value: `merge` builds a new schema and
//! reports the columns that changed, which is exactly what the WAL logs.
//! Column indices are handed out once, in order of first appearance, and
//! are the on-wire identity of a column.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::record::TOMBSTONE_COLUMN;
use crate::types::DataType;

/// A column with its assigned wire index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub index: u32,
    pub data_type: DataType,
}

/// Caller-side column description (no index yet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Caller-side schema description passed to `update`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchemaDesc {
    /// Required on the first update of a table; must match afterwards
    pub key_column: Option<String>,
    pub columns: Vec<ColumnDesc>,
}

impl TableSchemaDesc {
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: Some(key_column.into()),
            columns: Vec::new(),
        }
    }

    /// Description that only adds columns to an existing schema
    pub fn columns_only() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnDesc::new(name, data_type));
        self
    }
}

/// Schema change as logged in a WAL entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDelta {
    pub key_column: String,
    pub columns: Vec<ColumnSchema>,
}

/// Result of merging a description into a schema
#[derive(Debug, Clone)]
pub struct SchemaMerge {
    pub schema: TableSchema,
    /// New columns, plus existing object columns whose attributes grew
    pub added: Vec<ColumnSchema>,
}

impl SchemaMerge {
    /// Delta to log, or `None` when nothing changed
    pub fn delta(&self) -> Option<SchemaDelta> {
        if self.added.is_empty() {
            return None;
        }
        Some(SchemaDelta {
            key_column: self.schema.key_column.clone(),
            columns: self.added.clone(),
        })
    }
}

/// Schema of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    key_column: String,
    columns: HashMap<String, ColumnSchema>,
    names_by_index: HashMap<u32, String>,
    next_index: u32,
}

impl TableSchema {
    /// Merge `desc` into `base` (or establish a schema when `base` is None)
    pub fn merge(base: Option<&TableSchema>, desc: &TableSchemaDesc) -> Result<SchemaMerge> {
        let mut schema = match base {
            Some(existing) => {
                if let Some(key) = &desc.key_column {
                    if key != &existing.key_column {
                        return Err(AtlasError::validation(format!(
                            "key column is {}, cannot change it to {}",
                            existing.key_column, key
                        )));
                    }
                }
                existing.clone()
            }
            None => {
                let key = desc.key_column.as_ref().ok_or_else(|| {
                    AtlasError::validation("the first schema of a table must name its key column")
                })?;
                TableSchema::empty(key.clone())
            }
        };

        let mut added: Vec<ColumnSchema> = Vec::new();
        for col in &desc.columns {
            validate_column_name(&col.name)?;
            col.data_type.validate(&col.name)?;

            match schema.columns.get(&col.name) {
                None => {
                    let column = ColumnSchema {
                        name: col.name.clone(),
                        index: schema.next_index,
                        data_type: col.data_type.clone(),
                    };
                    schema.next_index += 1;
                    schema.insert(column.clone());
                    added.push(column);
                }
                Some(existing) => {
                    if let Some(merged) = existing.data_type.merge(&col.data_type, &col.name)? {
                        let column = ColumnSchema {
                            name: existing.name.clone(),
                            index: existing.index,
                            data_type: merged,
                        };
                        schema.insert(column.clone());
                        // a column listed twice in one description is logged once
                        added.retain(|c| c.name != column.name);
                        added.push(column);
                    }
                }
            }
        }

        schema.check_key_column()?;
        Ok(SchemaMerge { schema, added })
    }

    /// Apply a logged delta during replay. Indices come from the log.
    pub fn apply_delta(base: Option<&TableSchema>, delta: &SchemaDelta) -> Result<TableSchema> {
        let mut schema = match base {
            Some(existing) => {
                if existing.key_column != delta.key_column {
                    return Err(AtlasError::corruption(format!(
                        "logged key column {} differs from {}",
                        delta.key_column, existing.key_column
                    )));
                }
                existing.clone()
            }
            None => TableSchema::empty(delta.key_column.clone()),
        };

        for col in &delta.columns {
            if let Some(owner) = schema.names_by_index.get(&col.index) {
                if owner != &col.name {
                    return Err(AtlasError::corruption(format!(
                        "logged column {} reuses index {} of column {}",
                        col.name, col.index, owner
                    )));
                }
            }
            let data_type = match schema.columns.get(&col.name) {
                Some(existing) => {
                    if existing.index != col.index {
                        return Err(AtlasError::corruption(format!(
                            "logged column {} has index {}, expected {}",
                            col.name, col.index, existing.index
                        )));
                    }
                    existing
                        .data_type
                        .merge(&col.data_type, &col.name)
                        .map_err(|e| AtlasError::corruption(e.to_string()))?
                        .unwrap_or_else(|| existing.data_type.clone())
                }
                None => col.data_type.clone(),
            };
            schema.next_index = schema.next_index.max(col.index + 1);
            schema.insert(ColumnSchema {
                name: col.name.clone(),
                index: col.index,
                data_type,
            });
        }

        schema
            .check_key_column()
            .map_err(|e| AtlasError::corruption(e.to_string()))?;
        Ok(schema)
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// The key column's schema (always present once established)
    pub fn key_schema(&self) -> &ColumnSchema {
        &self.columns[&self.key_column]
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    pub fn column_by_index(&self, index: u32) -> Option<&ColumnSchema> {
        self.names_by_index
            .get(&index)
            .and_then(|name| self.columns.get(name))
    }

    /// Column lookup that reports unknown names as validation errors
    pub fn require_column(&self, name: &str) -> Result<&ColumnSchema> {
        self.columns
            .get(name)
            .ok_or_else(|| AtlasError::validation(format!("unknown column {}", name)))
    }

    /// All columns ordered by index
    pub fn columns(&self) -> Vec<&ColumnSchema> {
        let mut cols: Vec<_> = self.columns.values().collect();
        cols.sort_by_key(|c| c.index);
        cols
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Full schema as a delta (used to describe a table from scratch)
    pub fn to_delta(&self) -> SchemaDelta {
        SchemaDelta {
            key_column: self.key_column.clone(),
            columns: self.columns().into_iter().cloned().collect(),
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn empty(key_column: String) -> Self {
        Self {
            key_column,
            columns: HashMap::new(),
            names_by_index: HashMap::new(),
            next_index: 0,
        }
    }

    fn insert(&mut self, column: ColumnSchema) {
        self.names_by_index.insert(column.index, column.name.clone());
        self.columns.insert(column.name.clone(), column);
    }

    fn check_key_column(&self) -> Result<()> {
        let key = self.columns.get(&self.key_column).ok_or_else(|| {
            AtlasError::validation(format!("key column {} is not defined", self.key_column))
        })?;
        if !key.data_type.is_scalar() {
            return Err(AtlasError::validation(format!(
                "key column {} must be a scalar type, got {}",
                key.name, key.data_type
            )));
        }
        Ok(())
    }
}

fn validate_column_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AtlasError::validation("column name must not be empty"));
    }
    if name == TOMBSTONE_COLUMN {
        return Err(AtlasError::validation(format!(
            "column name {:?} is reserved",
            TOMBSTONE_COLUMN
        )));
    }
    Ok(())
}
