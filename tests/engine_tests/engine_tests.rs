//! Tests for DataStore
//!
//! These tests verify:
//! - Opening creates the local layout
//! - Update / query / scan routing, tables created on first reference
//! - Unknown tables read as empty without being created
//! - Restart replays every table from the shared WAL
//! - Replay from the object store alone after the local cache is lost
//! - Concurrent writers on different tables
//! - Datastore lifecycle (terminate)

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use atlasdb::config::{Config, WalSyncStrategy};
use atlasdb::engine::DataStore;
use atlasdb::memtable::{QueryRequest, ScanRequest};
use atlasdb::schema::TableSchemaDesc;
use atlasdb::types::{DataType, Value};
use atlasdb::wal::{MemoryObjectStore, ObjectStore};
use atlasdb::AtlasError;
use serde_json::{json, Map, Value as JsonValue};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .wal_max_segment_size(1024)
        .wal_max_entry_size(64 * 1024)
        .wal_push_retry_ms(1, 4)
        .wal_flush_interval_ms(10)
        .build()
}

fn open(dir: &Path, store: &Arc<MemoryObjectStore>) -> DataStore {
    DataStore::open(config(dir), Arc::clone(store) as Arc<dyn ObjectStore>).unwrap()
}

fn setup_temp_store() -> (TempDir, Arc<MemoryObjectStore>, DataStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let db = open(temp_dir.path(), &store);
    (temp_dir, store, db)
}

fn users_schema() -> TableSchemaDesc {
    TableSchemaDesc::new("id")
        .column("id", DataType::Int64)
        .column("name", DataType::String)
}

fn orders_schema() -> TableSchemaDesc {
    TableSchemaDesc::new("order")
        .column("order", DataType::String)
        .column("paid", DataType::Bool)
}

fn rec(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().unwrap().clone()
}

fn user(id: u64, name: &str) -> Map<String, JsonValue> {
    rec(json!({"id": format!("{:x}", id), "name": name}))
}

/// (key, name or paid) for every row
fn all_rows(db: &DataStore, table: &str) -> Vec<(Value, Option<Value>)> {
    db.query(table, &QueryRequest::new())
        .unwrap()
        .into_iter()
        .map(|r| {
            let v = r.get("name").or_else(|| r.get("paid")).cloned();
            (r.key, v)
        })
        .collect()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_creates_directories() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");
    let store = Arc::new(MemoryObjectStore::new());

    let db = open(&data_dir, &store);

    assert!(data_dir.exists());
    assert!(db.config().wal_cache_dir().exists());
    assert!(db.table_names().is_empty());
    assert_eq!(db.recovery().entries_recovered, 0);
    db.terminate().unwrap();
}

#[test]
fn test_terminate_rejects_further_updates() {
    let (_temp, _store, db) = setup_temp_store();
    db.update("users", Some(&users_schema()), &[user(1, "ann")])
        .unwrap();

    db.terminate().unwrap();
    db.terminate().unwrap();

    let result = db.update("users", None, &[user(2, "ben")]);
    assert!(matches!(result, Err(AtlasError::Terminated)));
    assert_eq!(db.get_table("users").unwrap().len(), 1);
}

// =============================================================================
// Routing Tests
// =============================================================================

#[test]
fn test_update_then_query() {
    let (_temp, _store, db) = setup_temp_store();

    let id = db
        .update("users", Some(&users_schema()), &[user(2, "bo"), user(1, "al")])
        .unwrap();

    assert_eq!(id, Some(1));
    assert_eq!(
        all_rows(&db, "users"),
        vec![
            (Value::Int64(1), Some(Value::from("al"))),
            (Value::Int64(2), Some(Value::from("bo"))),
        ]
    );
    db.terminate().unwrap();
}

#[test]
fn test_scan_routes_to_table() {
    let (_temp, _store, db) = setup_temp_store();
    let users: Vec<_> = (1..=5).map(|i| user(i, "x")).collect();
    db.update("users", Some(&users_schema()), &users).unwrap();

    let rows = db
        .scan("users", &ScanRequest::new().start(2i64, true).end(4i64, true))
        .unwrap();

    let keys: Vec<Value> = rows.into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec![Value::Int64(2), Value::Int64(3), Value::Int64(4)]);
    db.terminate().unwrap();
}

#[test]
fn test_unknown_table_reads_empty() {
    let (_temp, _store, db) = setup_temp_store();

    assert!(db.query("ghost", &QueryRequest::new()).unwrap().is_empty());
    assert!(db.scan("ghost", &ScanRequest::new()).unwrap().is_empty());
    assert!(db.table_names().is_empty());
    db.terminate().unwrap();
}

#[test]
fn test_empty_table_name_rejected() {
    let (_temp, _store, db) = setup_temp_store();
    let result = db.update("", Some(&users_schema()), &[]);
    assert!(matches!(result, Err(AtlasError::Validation(_))));
    db.terminate().unwrap();
}

#[test]
fn test_tables_created_on_first_reference() {
    let (_temp, _store, db) = setup_temp_store();

    db.update("users", Some(&users_schema()), &[]).unwrap();
    db.update("orders", Some(&orders_schema()), &[]).unwrap();
    let table = db.table("later").unwrap();

    assert_eq!(table.name(), "later");
    assert!(table.schema().is_none());
    assert_eq!(db.table_names(), vec!["later", "orders", "users"]);
    db.terminate().unwrap();
}

#[test]
fn test_wal_ids_shared_across_tables() {
    let (_temp, _store, db) = setup_temp_store();

    let a = db.update("users", Some(&users_schema()), &[]).unwrap();
    let b = db.update("orders", Some(&orders_schema()), &[]).unwrap();
    let c = db.update("users", None, &[user(1, "al")]).unwrap();

    assert_eq!((a, b, c), (Some(1), Some(2), Some(3)));
    db.terminate().unwrap();
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_restart_replays_all_tables() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let (users_before, orders_before) = {
        let db = open(temp_dir.path(), &store);
        db.update("users", Some(&users_schema()), &[user(1, "al"), user(2, "bo")])
            .unwrap();
        db.update("orders", Some(&orders_schema()), &[rec(json!({"order": "o1", "paid": "0"}))])
            .unwrap();
        db.update("users", None, &[rec(json!({"id": "1", "-": "1"}))])
            .unwrap();
        db.update("orders", None, &[rec(json!({"order": "o1", "paid": "1"}))])
            .unwrap();
        let snapshot = (all_rows(&db, "users"), all_rows(&db, "orders"));
        db.terminate().unwrap();
        snapshot
    };

    let db = open(temp_dir.path(), &store);

    assert_eq!(all_rows(&db, "users"), users_before);
    assert_eq!(all_rows(&db, "orders"), orders_before);
    assert_eq!(
        all_rows(&db, "orders"),
        vec![(Value::from("o1"), Some(Value::Bool(true)))]
    );
    assert_eq!(db.recovery().entries_recovered, 4);
    assert_eq!(db.recovery().last_id, Some(4));
    assert_eq!(db.table_names(), vec!["orders", "users"]);
    assert_eq!(db.get_table("users").unwrap().last_revision(), Some(3));
    db.terminate().unwrap();
}

#[test]
fn test_restart_continues_ids() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    {
        let db = open(temp_dir.path(), &store);
        db.update("users", Some(&users_schema()), &[user(1, "al")])
            .unwrap();
        db.terminate().unwrap();
    }

    let db = open(temp_dir.path(), &store);
    let id = db.update("users", None, &[user(2, "bo")]).unwrap();

    assert_eq!(id, Some(2));
    assert_eq!(all_rows(&db, "users").len(), 2);
    db.terminate().unwrap();
}

#[test]
fn test_restart_from_remote_only() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let expected = {
        let db = open(temp_dir.path(), &store);
        db.update("users", Some(&users_schema()), &[]).unwrap();
        for i in 0..30 {
            db.update("users", None, &[user(i, &format!("user-{}", i))])
                .unwrap();
        }
        db.flush().unwrap();
        let rows = all_rows(&db, "users");
        db.terminate().unwrap();
        rows
    };
    fs::remove_dir_all(config(temp_dir.path()).wal_cache_dir()).unwrap();

    let db = open(temp_dir.path(), &store);

    assert_eq!(all_rows(&db, "users"), expected);
    assert!(db.recovery().remote_segments > 1);
    assert_eq!(db.recovery().local_segments, 0);
    db.terminate().unwrap();
}

#[test]
fn test_schema_evolution_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    {
        let db = open(temp_dir.path(), &store);
        db.update("users", Some(&users_schema()), &[user(1, "al")])
            .unwrap();
        let extended = TableSchemaDesc::columns_only().column("admin", DataType::Bool);
        db.update(
            "users",
            Some(&extended),
            &[rec(json!({"id": "1", "admin": "1"}))],
        )
        .unwrap();
        db.terminate().unwrap();
    }

    let db = open(temp_dir.path(), &store);
    let rows = db
        .query("users", &QueryRequest::new().select("admin").select("name"))
        .unwrap();

    assert_eq!(rows[0].get("admin"), Some(&Value::Bool(true)));
    assert_eq!(rows[0].get("name"), Some(&Value::from("al")));
    db.terminate().unwrap();
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_concurrent_writers_on_separate_tables() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    {
        let db = Arc::new(open(temp_dir.path(), &store));
        let mut handles = vec![];

        for t in 0..4 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                let table = format!("table{}", t);
                db.update(&table, Some(&users_schema()), &[]).unwrap();
                for i in 0..25 {
                    db.update(&table, None, &[user(i, "x")]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.wal().last_id(), Some(104));
        db.terminate().unwrap();
    }

    let db = open(temp_dir.path(), &store);
    for t in 0..4 {
        assert_eq!(all_rows(&db, &format!("table{}", t)).len(), 25);
    }
    assert_eq!(db.recovery().entries_recovered, 104);
    db.terminate().unwrap();
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (_temp, _store, db) = setup_temp_store();
    let db = Arc::new(db);
    db.update("users", Some(&users_schema()), &[]).unwrap();

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 0..50 {
                db.update("users", None, &[user(i, "w")]).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..50 {
                    let n = db.query("users", &QueryRequest::new()).unwrap().len();
                    assert!(n >= last);
                    last = n;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(all_rows(&db, "users").len(), 50);
    db.terminate().unwrap();
}
