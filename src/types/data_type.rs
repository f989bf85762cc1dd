//! Column data types and per-type codecs
//!
//! Each `DataType` knows how to:
//! - decode a caller-supplied (loosely typed) input value
//! - encode a `Value` into its WAL payload, and decode it back
//!
//! ## String Forms
//!
//! | Type | Form |
//! |------|------|
//! | BOOL | `"1"` / `"0"` |
//! | INT8..INT64 | hex two's-complement bit pattern (`"ff"` is -1 for INT8) |
//! | FLOAT32/64 | hex IEEE-754 bit pattern |
//! | STRING | verbatim |
//! | BYTES | base64 |
//!
//! Composites take JSON arrays (LIST, TUPLE) or JSON objects (MAP keyed by
//! the key's string form, OBJECT keyed by attribute name).

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AtlasError, Result};

use super::{Value, WireValue};

/// Declared type of a column (or of a composite's element)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    List(Box<DataType>),
    Tuple(Box<DataType>),
    Map {
        key: Box<DataType>,
        value: Box<DataType>,
    },
    Object {
        name: String,
        attributes: BTreeMap<String, DataType>,
    },
}

/// Comparison family used by filters.
///
/// Numeric types group by bit width: INT32 and FLOAT32 compare with each
/// other, INT32 and INT64 do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Bool,
    Numeric8,
    Numeric16,
    Numeric32,
    Numeric64,
    String,
    Bytes,
    List,
    Tuple,
    Map,
    Object,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Float32 => "FLOAT32",
            DataType::Float64 => "FLOAT64",
            DataType::String => "STRING",
            DataType::Bytes => "BYTES",
            DataType::List(_) => "LIST",
            DataType::Tuple(_) => "TUPLE",
            DataType::Map { .. } => "MAP",
            DataType::Object { .. } => "OBJECT",
        }
    }

    pub fn family(&self) -> TypeFamily {
        match self {
            DataType::Bool => TypeFamily::Bool,
            DataType::Int8 => TypeFamily::Numeric8,
            DataType::Int16 => TypeFamily::Numeric16,
            DataType::Int32 | DataType::Float32 => TypeFamily::Numeric32,
            DataType::Int64 | DataType::Float64 => TypeFamily::Numeric64,
            DataType::String => TypeFamily::String,
            DataType::Bytes => TypeFamily::Bytes,
            DataType::List(_) => TypeFamily::List,
            DataType::Tuple(_) => TypeFamily::Tuple,
            DataType::Map { .. } => TypeFamily::Map,
            DataType::Object { .. } => TypeFamily::Object,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            DataType::List(_) | DataType::Tuple(_) | DataType::Map { .. } | DataType::Object { .. }
        )
    }

    /// Scalar type a literal value carries
    pub fn of_scalar(value: &Value) -> Option<DataType> {
        let dt = match value {
            Value::Bool(_) => DataType::Bool,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float32(_) => DataType::Float32,
            Value::Float64(_) => DataType::Float64,
            Value::String(_) => DataType::String,
            Value::Bytes(_) => DataType::Bytes,
            _ => return None,
        };
        Some(dt)
    }

    /// Reject shapes that can never hold data (non-scalar map keys, empty
    /// object names)
    pub fn validate(&self, column: &str) -> Result<()> {
        match self {
            DataType::List(element) | DataType::Tuple(element) => element.validate(column),
            DataType::Map { key, value } => {
                if !key.is_scalar() {
                    return Err(AtlasError::validation(format!(
                        "column {}: map key type must be scalar, got {}",
                        column,
                        key.name()
                    )));
                }
                value.validate(column)
            }
            DataType::Object { name, attributes } => {
                if name.is_empty() {
                    return Err(AtlasError::validation(format!(
                        "column {}: object type name must not be empty",
                        column
                    )));
                }
                for attr in attributes.values() {
                    attr.validate(column)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Merge a redefinition of this type.
    ///
    /// Returns `Ok(None)` when `other` is identical, `Ok(Some(merged))` when
    /// `other` adds object attributes, and a validation error for anything
    /// else.
    pub fn merge(&self, other: &DataType, column: &str) -> Result<Option<DataType>> {
        if self == other {
            return Ok(None);
        }
        let conflict = || {
            AtlasError::validation(format!(
                "column {}: cannot change type from {} to {}",
                column, self, other
            ))
        };
        match (self, other) {
            (
                DataType::Object { name, attributes },
                DataType::Object {
                    name: other_name,
                    attributes: other_attributes,
                },
            ) if name == other_name => {
                let mut merged = attributes.clone();
                for (attr, attr_type) in other_attributes {
                    match attributes.get(attr) {
                        None => {
                            merged.insert(attr.clone(), attr_type.clone());
                        }
                        Some(existing) => {
                            let nested = format!("{}.{}", column, attr);
                            if let Some(m) = existing.merge(attr_type, &nested)? {
                                merged.insert(attr.clone(), m);
                            }
                        }
                    }
                }
                Ok(Some(DataType::Object {
                    name: name.clone(),
                    attributes: merged,
                }))
            }
            _ => Err(conflict()),
        }
    }

    /// Does `value` have exactly this type?
    pub fn conforms(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::Bool, Value::Bool(_))
            | (DataType::Int8, Value::Int8(_))
            | (DataType::Int16, Value::Int16(_))
            | (DataType::Int32, Value::Int32(_))
            | (DataType::Int64, Value::Int64(_))
            | (DataType::Float32, Value::Float32(_))
            | (DataType::Float64, Value::Float64(_))
            | (DataType::String, Value::String(_))
            | (DataType::Bytes, Value::Bytes(_)) => true,
            (DataType::List(element), Value::List(items))
            | (DataType::Tuple(element), Value::Tuple(items)) => {
                items.iter().all(|item| element.conforms(item))
            }
            (DataType::Map { key, value: val }, Value::Map(entries)) => entries
                .iter()
                .all(|(k, v)| key.conforms(k) && val.conforms(v)),
            (DataType::Object { name, attributes }, Value::Object(obj_name, attrs)) => {
                name == obj_name
                    && attrs.iter().all(|(attr, v)| {
                        attributes.get(attr).map_or(false, |t| t.conforms(v))
                    })
            }
            _ => false,
        }
    }

    // =========================================================================
    // Input Decoding
    // =========================================================================

    /// Decode a scalar from its string form
    pub fn decode_str(&self, column: &str, raw: &str) -> Result<Value> {
        let invalid = || {
            AtlasError::validation(format!(
                "column {}: invalid {} value {:?}",
                column,
                self.name(),
                raw
            ))
        };
        let value = match self {
            DataType::Bool => match raw {
                "1" => Value::Bool(true),
                "0" => Value::Bool(false),
                _ => return Err(invalid()),
            },
            DataType::Int8 => Value::Int8(u8::from_str_radix(raw, 16).map_err(|_| invalid())? as i8),
            DataType::Int16 => {
                Value::Int16(u16::from_str_radix(raw, 16).map_err(|_| invalid())? as i16)
            }
            DataType::Int32 => {
                Value::Int32(u32::from_str_radix(raw, 16).map_err(|_| invalid())? as i32)
            }
            DataType::Int64 => {
                Value::Int64(u64::from_str_radix(raw, 16).map_err(|_| invalid())? as i64)
            }
            DataType::Float32 => Value::Float32(f32::from_bits(
                u32::from_str_radix(raw, 16).map_err(|_| invalid())?,
            )),
            DataType::Float64 => Value::Float64(f64::from_bits(
                u64::from_str_radix(raw, 16).map_err(|_| invalid())?,
            )),
            DataType::String => Value::String(raw.to_string()),
            DataType::Bytes => Value::Bytes(BASE64.decode(raw).map_err(|_| invalid())?),
            _ => {
                return Err(AtlasError::validation(format!(
                    "column {}: {} has no string form, got {:?}",
                    column,
                    self.name(),
                    raw
                )))
            }
        };
        Ok(value)
    }

    /// Decode a loosely typed input value. `raw` must not be null; nulls are
    /// handled at the record level.
    pub fn decode_input(&self, column: &str, raw: &JsonValue) -> Result<Value> {
        let mismatch = |expected: &str| {
            AtlasError::validation(format!(
                "column {}: expected {} for {}, got {}",
                column,
                expected,
                self.name(),
                raw
            ))
        };
        match self {
            DataType::List(element) | DataType::Tuple(element) => {
                let items = raw.as_array().ok_or_else(|| mismatch("an array"))?;
                let values = items
                    .iter()
                    .map(|item| {
                        if item.is_null() {
                            return Err(AtlasError::validation(format!(
                                "column {}: null element in {}",
                                column,
                                self.name()
                            )));
                        }
                        element.decode_input(column, item)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(match self {
                    DataType::List(_) => Value::List(values),
                    _ => Value::Tuple(values),
                })
            }
            DataType::Map { key, value } => {
                let entries = raw.as_object().ok_or_else(|| mismatch("an object"))?;
                let mut pairs = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    if v.is_null() {
                        return Err(AtlasError::validation(format!(
                            "column {}: null value for map key {:?}",
                            column, k
                        )));
                    }
                    pairs.push((key.decode_str(column, k)?, value.decode_input(column, v)?));
                }
                Ok(Value::Map(pairs))
            }
            DataType::Object { name, attributes } => {
                let entries = raw.as_object().ok_or_else(|| mismatch("an object"))?;
                let mut attrs = BTreeMap::new();
                for (attr, v) in entries {
                    let attr_type = attributes.get(attr).ok_or_else(|| {
                        AtlasError::validation(format!(
                            "column {}: unknown attribute {:?} for object {}",
                            column, attr, name
                        ))
                    })?;
                    if v.is_null() {
                        continue;
                    }
                    let nested = format!("{}.{}", column, attr);
                    attrs.insert(attr.clone(), attr_type.decode_input(&nested, v)?);
                }
                Ok(Value::Object(name.clone(), attrs))
            }
            scalar => {
                let s = raw.as_str().ok_or_else(|| mismatch("a string"))?;
                scalar.decode_str(column, s)
            }
        }
    }

    // =========================================================================
    // WAL Payload Codec
    // =========================================================================

    /// Encode a value into its WAL payload
    pub fn encode_wire(&self, column: &str, value: &Value) -> Result<WireValue> {
        let wire = match (self, value) {
            (DataType::Bool, Value::Bool(v)) => WireValue::Bool(*v),
            (DataType::Int8, Value::Int8(v)) => WireValue::Int(*v as i64),
            (DataType::Int16, Value::Int16(v)) => WireValue::Int(*v as i64),
            (DataType::Int32, Value::Int32(v)) => WireValue::Int(*v as i64),
            (DataType::Int64, Value::Int64(v)) => WireValue::Int(*v),
            (DataType::Float32, Value::Float32(v)) => WireValue::Float32(*v),
            (DataType::Float64, Value::Float64(v)) => WireValue::Float64(*v),
            (DataType::String, Value::String(v)) => WireValue::String(v.clone()),
            (DataType::Bytes, Value::Bytes(v)) => WireValue::Bytes(v.clone()),
            (DataType::List(element), Value::List(items))
            | (DataType::Tuple(element), Value::Tuple(items)) => WireValue::List(
                items
                    .iter()
                    .map(|item| element.encode_wire(column, item))
                    .collect::<Result<_>>()?,
            ),
            (DataType::Map { key, value: val }, Value::Map(entries)) => WireValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((key.encode_wire(column, k)?, val.encode_wire(column, v)?)))
                    .collect::<Result<_>>()?,
            ),
            (DataType::Object { name, attributes }, Value::Object(obj_name, attrs))
                if name == obj_name =>
            {
                let mut out = Vec::with_capacity(attrs.len());
                for (attr, v) in attrs {
                    let attr_type = attributes.get(attr).ok_or_else(|| {
                        AtlasError::validation(format!(
                            "column {}: unknown attribute {:?} for object {}",
                            column, attr, name
                        ))
                    })?;
                    out.push((attr.clone(), attr_type.encode_wire(column, v)?));
                }
                WireValue::Object(out)
            }
            _ => {
                return Err(AtlasError::validation(format!(
                    "column {}: value {} does not match type {}",
                    column, value, self
                )))
            }
        };
        Ok(wire)
    }

    /// Decode a WAL payload; a mismatch means the log is inconsistent
    pub fn decode_wire(&self, column: &str, wire: WireValue) -> Result<Value> {
        let mismatch = |wire: &WireValue| {
            AtlasError::corruption(format!(
                "column {}: payload {:?} does not match type {}",
                column, wire, self
            ))
        };
        let value = match (self, wire) {
            (DataType::Bool, WireValue::Bool(v)) => Value::Bool(v),
            (DataType::Int8, WireValue::Int(v)) => {
                Value::Int8(i8::try_from(v).map_err(|_| mismatch(&WireValue::Int(v)))?)
            }
            (DataType::Int16, WireValue::Int(v)) => {
                Value::Int16(i16::try_from(v).map_err(|_| mismatch(&WireValue::Int(v)))?)
            }
            (DataType::Int32, WireValue::Int(v)) => {
                Value::Int32(i32::try_from(v).map_err(|_| mismatch(&WireValue::Int(v)))?)
            }
            (DataType::Int64, WireValue::Int(v)) => Value::Int64(v),
            (DataType::Float32, WireValue::Float32(v)) => Value::Float32(v),
            (DataType::Float64, WireValue::Float64(v)) => Value::Float64(v),
            (DataType::String, WireValue::String(v)) => Value::String(v),
            (DataType::Bytes, WireValue::Bytes(v)) => Value::Bytes(v),
            (DataType::List(element), WireValue::List(items)) => Value::List(
                items
                    .into_iter()
                    .map(|item| element.decode_wire(column, item))
                    .collect::<Result<_>>()?,
            ),
            (DataType::Tuple(element), WireValue::List(items)) => Value::Tuple(
                items
                    .into_iter()
                    .map(|item| element.decode_wire(column, item))
                    .collect::<Result<_>>()?,
            ),
            (DataType::Map { key, value }, WireValue::Map(entries)) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((key.decode_wire(column, k)?, value.decode_wire(column, v)?)))
                    .collect::<Result<_>>()?,
            ),
            (DataType::Object { name, attributes }, WireValue::Object(attrs)) => {
                let mut out = BTreeMap::new();
                for (attr, v) in attrs {
                    let attr_type = attributes.get(&attr).ok_or_else(|| {
                        AtlasError::corruption(format!(
                            "column {}: logged attribute {:?} missing from object {}",
                            column, attr, name
                        ))
                    })?;
                    let decoded = attr_type.decode_wire(column, v)?;
                    out.insert(attr, decoded);
                }
                Value::Object(name.clone(), out)
            }
            (_, other) => return Err(mismatch(&other)),
        };
        Ok(value)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::List(element) => write!(f, "LIST<{}>", element),
            DataType::Tuple(element) => write!(f, "TUPLE<{}>", element),
            DataType::Map { key, value } => write!(f, "MAP<{}, {}>", key, value),
            DataType::Object { name, attributes } => {
                write!(f, "OBJECT {}{{", name)?;
                for (i, (attr, t)) in attributes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", attr, t)?;
                }
                write!(f, "}}")
            }
            scalar => f.write_str(scalar.name()),
        }
    }
}
