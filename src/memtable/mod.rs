//! MemTable Module
//!
//! In-memory tables: schema, key-ordered records, and the query engine.
//!
//! ## Responsibilities
//! - Additive schema evolution per table
//! - Upsert-merge and tombstone deletes, written through the WAL first
//! - Filtered, sorted, paginated queries with strict type checks
//! - Key-ordered range scans
//!
//! ## Data Structure Choice
//! BTreeMap keyed by the key column's `Value`, wrapped in an RwLock:
//! - Ordered keys make scans a plain range walk
//! - Queries run concurrently, mutations are exclusive

mod query;
mod table;

pub use query::{
    CompareOp, Filter, Operand, OrderBy, QueryRequest, RecordResult, ScanRequest,
};
pub use table::MemoryTable;
