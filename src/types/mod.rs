//! Typed Value System
//!
//! The closed set of value types a column may hold, with the codecs that
//! move them between caller input, WAL payloads, and memory.
//!
//! ## Responsibilities
//! - `Value`: tagged union of scalars and composites (total ordering)
//! - `DataType`: declared column type, additive merge of object attributes
//! - String-form decoding of caller input
//! - WAL payload encoding (`WireValue`) with exact-width restore

mod data_type;
mod value;
mod wire;

pub use data_type::{DataType, TypeFamily};
pub use value::Value;
pub use wire::WireValue;
