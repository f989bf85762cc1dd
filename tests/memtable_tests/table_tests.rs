//! MemoryTable Tests
//!
//! These tests verify:
//! - Insert, partial update and tombstone delete of one key
//! - Explicit nulls versus absent columns
//! - No resurrection of deleted columns
//! - Validation failures leave schema and records untouched
//! - A failed WAL append leaves the table untouched
//! - Replaying logged entries rebuilds the same table
//! - Revision tracking

use std::sync::Arc;

use atlasdb::config::Config;
use atlasdb::memtable::{MemoryTable, QueryRequest};
use atlasdb::record::Record;
use atlasdb::schema::TableSchemaDesc;
use atlasdb::types::{DataType, Value};
use atlasdb::wal::{MemoryObjectStore, ObjectStore, WalManager};
use atlasdb::AtlasError;
use serde_json::{json, Map, Value as JsonValue};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_wal() -> (TempDir, Arc<WalManager>) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .wal_push_retry_ms(1, 4)
        .wal_flush_interval_ms(10)
        .build();
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let wal = Arc::new(WalManager::open(&config, store).unwrap());
    (temp, wal)
}

fn schema() -> TableSchemaDesc {
    TableSchemaDesc::new("k")
        .column("k", DataType::String)
        .column("a", DataType::Int32)
        .column("b", DataType::String)
}

fn rec(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().unwrap().clone()
}

/// The stored row for `key`, every column kept (nulls as None)
fn row(table: &MemoryTable, key: &str) -> Option<Vec<(String, Option<Value>)>> {
    table
        .query(&QueryRequest::new().keep_none(true))
        .unwrap()
        .into_iter()
        .find(|r| r.key == Value::from(key))
        .map(|r| r.values.into_iter().collect())
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_insert_update_delete_cycle() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));

    let id = table
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1"}))])
        .unwrap();
    assert_eq!(id, Some(1));
    let rows = table.query(&QueryRequest::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, Value::from("x"));
    assert_eq!(rows[0].get("a"), Some(&Value::Int32(1)));

    table.update(None, &[rec(json!({"k": "x", "a": "2"}))]).unwrap();
    let rows = table.query(&QueryRequest::new()).unwrap();
    assert_eq!(rows[0].get("a"), Some(&Value::Int32(2)));

    table.update(None, &[rec(json!({"k": "x", "-": "1"}))]).unwrap();
    assert!(table.query(&QueryRequest::new()).unwrap().is_empty());
    assert!(table.is_empty());
}

#[test]
fn test_partial_update_keeps_other_columns() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    table
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1", "b": "hello"}))])
        .unwrap();
    table.update(None, &[rec(json!({"k": "x", "a": "ff"}))]).unwrap();

    let rows = table.query(&QueryRequest::new()).unwrap();
    assert_eq!(rows[0].get("a"), Some(&Value::Int32(255)));
    assert_eq!(rows[0].get("b"), Some(&Value::from("hello")));
}

#[test]
fn test_explicit_null_clears_column() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    table
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1", "b": "hello"}))])
        .unwrap();
    table.update(None, &[rec(json!({"k": "x", "b": null}))]).unwrap();

    let stored = row(&table, "x").unwrap();
    assert_eq!(
        stored,
        vec![
            ("a".to_string(), Some(Value::Int32(1))),
            ("b".to_string(), None),
            ("k".to_string(), Some(Value::from("x"))),
        ]
    );
}

#[test]
fn test_no_resurrection_after_delete() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    table
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1", "b": "old"}))])
        .unwrap();
    table.update(None, &[rec(json!({"k": "x", "-": "1"}))]).unwrap();
    table.update(None, &[rec(json!({"k": "x", "b": "new"}))]).unwrap();

    let rows = table.query(&QueryRequest::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("a"), None);
    assert_eq!(rows[0].get("b"), Some(&Value::from("new")));
}

#[test]
fn test_records_in_one_update_apply_in_order() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    let id = table
        .update(
            Some(&schema()),
            &[
                rec(json!({"k": "x", "a": "1"})),
                rec(json!({"k": "y", "a": "2"})),
                rec(json!({"k": "x", "-": "1"})),
                rec(json!({"k": "x", "a": "3"})),
            ],
        )
        .unwrap();

    assert_eq!(id, Some(1));
    assert_eq!(table.len(), 2);
    assert_eq!(row(&table, "x").unwrap()[0], ("a".to_string(), Some(Value::Int32(3))));
}

#[test]
fn test_schema_only_update_is_logged() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));

    let id = table.update(Some(&schema()), &[]).unwrap();

    assert_eq!(id, Some(1));
    let schema = table.schema().unwrap();
    assert_eq!(schema.key_column(), "k");
    assert_eq!(schema.len(), 3);
    assert!(table.is_empty());
}

#[test]
fn test_no_op_update_is_not_logged() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));

    assert_eq!(table.update(None, &[]).unwrap(), None);
    table.update(Some(&schema()), &[]).unwrap();
    assert_eq!(table.update(Some(&schema()), &[]).unwrap(), None);
    assert_eq!(wal.last_id(), Some(1));
}

#[test]
fn test_update_records_with_typed_values() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    table
        .update_records(
            Some(&schema()),
            vec![Record::new().with("k", "x").with("a", 7i32).with_null("b")],
        )
        .unwrap();

    let rows = table.query(&QueryRequest::new()).unwrap();
    assert_eq!(rows[0].get("a"), Some(&Value::Int32(7)));
    assert_eq!(rows[0].get("b"), None);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_records_without_schema_rejected() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    let result = table.update(None, &[rec(json!({"k": "x"}))]);
    assert!(matches!(result, Err(AtlasError::Validation(_))));
}

#[test]
fn test_null_key_rejected_without_logging() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));

    let missing = table.update(Some(&schema()), &[rec(json!({"a": "1"}))]);
    let null = table.update(Some(&schema()), &[rec(json!({"k": null, "a": "1"}))]);

    assert!(matches!(missing, Err(AtlasError::Validation(_))));
    assert!(matches!(null, Err(AtlasError::Validation(_))));
    assert!(table.schema().is_none());
    assert_eq!(wal.last_id(), None);
}

#[test]
fn test_bad_value_leaves_table_untouched() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));
    table
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1"}))])
        .unwrap();

    let extended = TableSchemaDesc::columns_only().column("c", DataType::Bool);
    let result = table.update(
        Some(&extended),
        &[
            rec(json!({"k": "y", "a": "2"})),
            rec(json!({"k": "x", "a": "not-hex"})),
        ],
    );

    assert!(matches!(result, Err(AtlasError::Validation(_))));
    assert!(table.schema().unwrap().column("c").is_none());
    assert_eq!(table.len(), 1);
    assert_eq!(row(&table, "x").unwrap()[0], ("a".to_string(), Some(Value::Int32(1))));
    assert_eq!(wal.last_id(), Some(1));
}

#[test]
fn test_unknown_column_rejected() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    let result = table.update(Some(&schema()), &[rec(json!({"k": "x", "zzz": "1"}))]);
    assert!(matches!(result, Err(AtlasError::Validation(_))));
}

#[test]
fn test_number_input_rejected_for_scalar() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", wal);

    let result = table.update(Some(&schema()), &[rec(json!({"k": "x", "a": 1}))]);
    assert!(matches!(result, Err(AtlasError::Validation(_))));
}

#[test]
fn test_failed_append_leaves_table_untouched() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));
    table
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1"}))])
        .unwrap();

    wal.terminate().unwrap();
    let extended = TableSchemaDesc::columns_only().column("c", DataType::Bool);
    let result = table.update(Some(&extended), &[rec(json!({"k": "x", "a": "2", "c": "1"}))]);

    assert!(matches!(result, Err(AtlasError::Terminated)));
    assert!(table.schema().unwrap().column("c").is_none());
    assert_eq!(row(&table, "x").unwrap()[0], ("a".to_string(), Some(Value::Int32(1))));
    assert_eq!(table.last_revision(), Some(1));
}

// =============================================================================
// Replay Tests
// =============================================================================

#[test]
fn test_replayed_entries_rebuild_table() {
    let (_temp, wal) = setup_wal();
    let table = MemoryTable::new("t", Arc::clone(&wal));
    table
        .update(
            Some(&schema()),
            &[
                rec(json!({"k": "x", "a": "1", "b": "one"})),
                rec(json!({"k": "y", "a": "2"})),
            ],
        )
        .unwrap();
    table.update(None, &[rec(json!({"k": "y", "-": "1"}))]).unwrap();
    let extended = TableSchemaDesc::columns_only().column("c", DataType::Bool);
    table
        .update(Some(&extended), &[rec(json!({"k": "z", "c": "1", "b": null}))])
        .unwrap();

    let rebuilt = MemoryTable::new("t", Arc::clone(&wal));
    for entry in wal.read_all().unwrap() {
        rebuilt.apply_replayed(entry.unwrap()).unwrap();
    }

    let request = QueryRequest::new().keep_none(true);
    assert_eq!(rebuilt.query(&request).unwrap(), table.query(&request).unwrap());
    assert_eq!(rebuilt.schema(), table.schema());
    assert_eq!(rebuilt.last_revision(), Some(3));
}

#[test]
fn test_replayed_records_before_schema_rejected() {
    let (_temp, wal) = setup_wal();
    let writer = MemoryTable::new("t", Arc::clone(&wal));
    writer
        .update(Some(&schema()), &[rec(json!({"k": "x", "a": "1"}))])
        .unwrap();

    let mut entry = wal.read_all().unwrap().next().unwrap().unwrap();
    entry.schema_delta = None;

    let rebuilt = MemoryTable::new("t", Arc::clone(&wal));
    let result = rebuilt.apply_replayed(entry);
    assert!(matches!(result, Err(AtlasError::WalCorruption(_))));
}

// =============================================================================
// Revision Tests
// =============================================================================

#[test]
fn test_last_revision_tracks_wal_ids() {
    let (_temp, wal) = setup_wal();
    let first = MemoryTable::new("first", Arc::clone(&wal));
    let second = MemoryTable::new("second", Arc::clone(&wal));
    assert_eq!(first.last_revision(), None);

    first.update(Some(&schema()), &[]).unwrap();
    second.update(Some(&schema()), &[]).unwrap();
    first.update(None, &[rec(json!({"k": "x"}))]).unwrap();

    assert_eq!(first.last_revision(), Some(3));
    assert_eq!(second.last_revision(), Some(2));
}
