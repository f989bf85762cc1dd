//! Record Codec
//!
//! Converts between the three shapes a record takes:
//! - caller input: a JSON object of column name to string form (or null)
//! - `WireRecord`: columns by wire index, as logged in the WAL
//! - `Record`: typed values by column name, as held in memory

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{AtlasError, Result};
use crate::schema::TableSchema;
use crate::types::Value;
use crate::wal::{WireColumn, WireRecord};

/// Reserved pseudo-column marking a record as a delete
pub const TOMBSTONE_COLUMN: &str = "-";

/// Wire index of the tombstone marker
pub const TOMBSTONE_INDEX: i32 = -1;

/// A typed record
///
/// `values` maps a column to `Some(value)` or an explicit `None` (null).
/// A column missing from the map was not supplied at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub values: BTreeMap<String, Option<Value>>,
    /// Set when the record carried the tombstone marker
    pub deleted: bool,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete marker for `key`
    pub fn tombstone(key_column: impl Into<String>, key: Value) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key_column.into(), Some(key));
        Self {
            values,
            deleted: true,
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, column: impl Into<String>) -> Self {
        self.values.insert(column.into(), None);
        self
    }

    /// Non-null value of `column`
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column).and_then(|v| v.as_ref())
    }

    /// Merge `other` into this record: supplied columns replace, the rest stay
    pub fn merge_from(&mut self, other: Record) {
        for (column, value) in other.values {
            self.values.insert(column, value);
        }
    }
}

/// Decode a caller-supplied record against `schema`
pub fn decode_record(schema: &TableSchema, input: &JsonMap<String, JsonValue>) -> Result<Record> {
    let mut record = Record::new();
    for (name, raw) in input {
        if name == TOMBSTONE_COLUMN {
            record.deleted = true;
            continue;
        }
        let column = schema.require_column(name)?;
        let value = if raw.is_null() {
            None
        } else {
            Some(column.data_type.decode_input(name, raw)?)
        };
        record.values.insert(name.clone(), value);
    }
    Ok(record)
}

/// Encode a typed record for the WAL
pub fn encode_wal_record(schema: &TableSchema, record: &Record) -> Result<WireRecord> {
    let mut columns = Vec::with_capacity(record.values.len() + 1);
    if record.deleted {
        columns.push(WireColumn {
            index: TOMBSTONE_INDEX,
            value: None,
        });
    }
    for (name, value) in &record.values {
        let column = schema.require_column(name)?;
        let index = i32::try_from(column.index).map_err(|_| {
            AtlasError::validation(format!("column {} index {} out of range", name, column.index))
        })?;
        let value = match value {
            Some(v) => Some(column.data_type.encode_wire(name, v)?),
            None => None,
        };
        columns.push(WireColumn { index, value });
    }
    Ok(WireRecord { columns })
}

/// Decode a logged record. Every index must already be in `schema` because
/// schema changes are logged before the records that use them.
pub fn decode_wal_record(schema: &TableSchema, wire: WireRecord) -> Result<Record> {
    let mut record = Record::new();
    for col in wire.columns {
        if col.index == TOMBSTONE_INDEX {
            record.deleted = true;
            continue;
        }
        let column = u32::try_from(col.index)
            .ok()
            .and_then(|index| schema.column_by_index(index))
            .ok_or_else(|| {
                AtlasError::corruption(format!("logged record uses unknown column index {}", col.index))
            })?;
        let value = match col.value {
            Some(w) => Some(column.data_type.decode_wire(&column.name, w)?),
            None => None,
        };
        record.values.insert(column.name.clone(), value);
    }
    Ok(record)
}
