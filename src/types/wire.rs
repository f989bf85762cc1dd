//! Compact WAL payload for a single value
//!
//! Integers of every width travel as `Int(i64)`; the declared column type
//! restores the exact width on decode.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Bool(bool),
    Int(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Elements of a LIST or TUPLE
    List(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
    /// Attributes of an OBJECT, by attribute name
    Object(Vec<(String, WireValue)>),
}
