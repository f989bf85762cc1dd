//! # AtlasDB
//!
//! An embedded, schema-flexible tabular datastore with:
//! - Typed values and additive schema evolution per table
//! - Filtered, sorted, paginated queries and key-range scans
//! - A segmented Write-Ahead Log (WAL) for durability
//! - Local segment cache mirrored to a remote object store
//! - Crash recovery with torn-tail handling
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DataStore                             │
//! │              (table registry, replay on open)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      MemoryTable                             │
//! │          (schema merge → WAL append → apply)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      WalManager                              │
//! │         (id assignment, sync local write, replay)            │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐   push worker   ┌─────────────────┐
//!   │   Local Cache   │ ──────────────▶ │  Object Store   │
//!   │  wal.log.<n>    │                 │ <prefix>wal.log │
//!   └─────────────────┘                 └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod types;
pub mod schema;
pub mod record;

pub mod wal;
pub mod memtable;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::Config;
pub use engine::DataStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
