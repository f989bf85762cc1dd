//! MemoryTable implementation
//!
//! BTreeMap keyed by the key column's value, behind an RwLock. Mutations
//! take the write lock for the whole merge → append → apply sequence, so a
//! failed WAL append leaves the table untouched.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{AtlasError, Result};
use crate::record::{decode_record, decode_wal_record, encode_wal_record, Record};
use crate::schema::{SchemaDelta, TableSchema, TableSchemaDesc};
use crate::types::Value;
use crate::wal::{WalEntry, WalManager};

use super::query::{
    check_order_by, compare_records, page_bounds, project, resolve_projection, QueryRequest,
    RecordResult, ScanRequest,
};

/// One table: schema, key-ordered records, and the WAL it writes through
pub struct MemoryTable {
    name: String,
    wal: Arc<WalManager>,
    state: RwLock<TableState>,
}

#[derive(Default)]
struct TableState {
    schema: Option<TableSchema>,
    records: BTreeMap<Value, Record>,
    /// Id of the last WAL entry applied
    last_revision: Option<u64>,
}

impl MemoryTable {
    /// Create an empty table (no schema until the first update)
    pub fn new(name: impl Into<String>, wal: Arc<WalManager>) -> Self {
        Self {
            name: name.into(),
            wal,
            state: RwLock::new(TableState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply caller input: merge the schema, decode the records, log, then
    /// mutate memory.
    ///
    /// Returns the WAL id, or `None` when nothing changed.
    pub fn update(
        &self,
        schema: Option<&TableSchemaDesc>,
        records: &[JsonMap<String, JsonValue>],
    ) -> Result<Option<u64>> {
        let mut state = self.state.write();
        let (merged, delta) = self.merged_schema(&state, schema)?;
        let merged = match merged {
            Some(s) => s,
            None if records.is_empty() => return Ok(None),
            None => {
                return Err(AtlasError::validation(format!(
                    "table {} has no schema yet",
                    self.name
                )))
            }
        };

        let decoded = records
            .iter()
            .map(|input| decode_record(&merged, input))
            .collect::<Result<Vec<_>>>()?;
        self.commit(&mut state, merged, delta, decoded)
    }

    /// Apply already-typed records
    pub fn update_records(
        &self,
        schema: Option<&TableSchemaDesc>,
        records: Vec<Record>,
    ) -> Result<Option<u64>> {
        let mut state = self.state.write();
        let (merged, delta) = self.merged_schema(&state, schema)?;
        let merged = match merged {
            Some(s) => s,
            None if records.is_empty() => return Ok(None),
            None => {
                return Err(AtlasError::validation(format!(
                    "table {} has no schema yet",
                    self.name
                )))
            }
        };
        self.commit(&mut state, merged, delta, records)
    }

    /// Apply an entry read back from the WAL
    pub fn apply_replayed(&self, entry: WalEntry) -> Result<()> {
        let mut state = self.state.write();
        if let Some(delta) = &entry.schema_delta {
            state.schema = Some(TableSchema::apply_delta(state.schema.as_ref(), delta)?);
        }
        if !entry.records.is_empty() {
            let schema = state.schema.as_ref().ok_or_else(|| {
                AtlasError::corruption(format!(
                    "entry {} has records for table {} before any schema",
                    entry.id, self.name
                ))
            })?;
            let mut records = Vec::with_capacity(entry.records.len());
            for wire in entry.records {
                let record = decode_wal_record(schema, wire)?;
                let key = record
                    .get(schema.key_column())
                    .cloned()
                    .ok_or_else(|| {
                        AtlasError::corruption(format!(
                            "entry {} logs a record without a key for table {}",
                            entry.id, self.name
                        ))
                    })?;
                records.push((key, record));
            }
            apply_records(&mut state.records, records);
        }
        state.last_revision = Some(entry.id);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Filter, sort, paginate and project
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<RecordResult>> {
        let state = self.state.read();
        let schema = match &state.schema {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let projection = resolve_projection(schema, &request.projection)?;
        check_order_by(schema, &request.order_by)?;
        if let Some(filter) = &request.filter {
            filter.check(schema)?;
        }

        let mut matched: Vec<(&Value, &Record)> = state
            .records
            .iter()
            .filter(|(_, record)| request.filter.as_ref().map_or(true, |f| f.matches(record)))
            .collect();
        if !request.order_by.is_empty() {
            matched.sort_by(|(_, a), (_, b)| compare_records(a, b, &request.order_by));
        }

        let (start, end) = page_bounds(matched.len(), request.start, request.limit);
        Ok(matched[start..end]
            .iter()
            .map(|(key, record)| project(key, record, &projection, request.keep_none, request.raw))
            .collect())
    }

    /// Key-ordered range iteration
    pub fn scan(&self, request: &ScanRequest) -> Result<Vec<RecordResult>> {
        let state = self.state.read();
        let schema = match &state.schema {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let projection = resolve_projection(schema, &request.projection)?;

        let key_type = &schema.key_schema().data_type;
        for bound in [&request.start_key, &request.end_key].into_iter().flatten() {
            if !key_type.conforms(bound) {
                return Err(AtlasError::validation(format!(
                    "scan bound {} does not match key column {} of type {}",
                    bound,
                    schema.key_column(),
                    key_type
                )));
            }
        }

        let lower = match &request.start_key {
            Some(k) if request.start_inclusive => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
            None => Bound::Unbounded,
        };
        let upper = match &request.end_key {
            Some(k) if request.end_inclusive => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
            None => Bound::Unbounded,
        };
        if is_empty_range(
            &request.start_key,
            &request.end_key,
            request.start_inclusive,
            request.end_inclusive,
        ) {
            return Ok(Vec::new());
        }

        let limit = usize::try_from(request.limit).unwrap_or(usize::MAX);
        Ok(state
            .records
            .range::<Value, _>((lower, upper))
            .take(limit)
            .map(|(key, record)| project(key, record, &projection, request.keep_none, true))
            .collect())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Number of live records
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current schema
    pub fn schema(&self) -> Option<TableSchema> {
        self.state.read().schema.clone()
    }

    /// Id of the last WAL entry applied to this table
    pub fn last_revision(&self) -> Option<u64> {
        self.state.read().last_revision
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn merged_schema(
        &self,
        state: &TableState,
        desc: Option<&TableSchemaDesc>,
    ) -> Result<(Option<TableSchema>, Option<SchemaDelta>)> {
        match desc {
            Some(desc) => {
                let merge = TableSchema::merge(state.schema.as_ref(), desc)?;
                let delta = merge.delta();
                Ok((Some(merge.schema), delta))
            }
            None => Ok((state.schema.clone(), None)),
        }
    }

    fn commit(
        &self,
        state: &mut TableState,
        schema: TableSchema,
        delta: Option<SchemaDelta>,
        records: Vec<Record>,
    ) -> Result<Option<u64>> {
        if delta.is_none() && records.is_empty() {
            return Ok(None);
        }

        let key_column = schema.key_column().to_string();
        let mut keyed = Vec::with_capacity(records.len());
        let mut wire = Vec::with_capacity(records.len());
        for record in records {
            let key = record.get(&key_column).cloned().ok_or_else(|| {
                AtlasError::validation(format!(
                    "table {}: key column {} must not be null",
                    self.name, key_column
                ))
            })?;
            wire.push(encode_wal_record(&schema, &record)?);
            keyed.push((key, record));
        }

        let id = self.wal.append(WalEntry::new(self.name.clone(), delta, wire))?;

        state.schema = Some(schema);
        apply_records(&mut state.records, keyed);
        state.last_revision = Some(id);
        tracing::debug!(table = %self.name, id, "applied update");
        Ok(Some(id))
    }
}

/// Tombstones remove; everything else merges into the stored record
fn apply_records(map: &mut BTreeMap<Value, Record>, records: Vec<(Value, Record)>) {
    for (key, record) in records {
        if record.deleted {
            map.remove(&key);
        } else {
            map.entry(key).or_default().merge_from(record);
        }
    }
}

fn is_empty_range(
    start: &Option<Value>,
    end: &Option<Value>,
    start_inclusive: bool,
    end_inclusive: bool,
) -> bool {
    match (start, end) {
        (Some(s), Some(e)) => s > e || (s == e && !(start_inclusive && end_inclusive)),
        _ => false,
    }
}
