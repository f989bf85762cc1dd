//! Typed values
//!
//! `Value` is the closed union every cell of a table holds. A missing or null
//! cell is `None` at the record level; there is no null variant here.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// A single typed value
///
/// Scalars keep their exact width. Composites hold further values
/// recursively. Equality and ordering are total (floats use
/// `total_cmp`), so values can key a `BTreeMap` directly.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Entry order is not significant for equality or ordering
    Map(Vec<(Value, Value)>),
    /// Named object: type name plus attributes
    Object(String, BTreeMap<String, Value>),
}

impl Value {
    /// Upper-case type name, matching `DataType::name`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "BOOL",
            Value::Int8(_) => "INT8",
            Value::Int16(_) => "INT16",
            Value::Int32(_) => "INT32",
            Value::Int64(_) => "INT64",
            Value::Float32(_) => "FLOAT32",
            Value::Float64(_) => "FLOAT64",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Tuple(_) => "TUPLE",
            Value::Map(_) => "MAP",
            Value::Object(..) => "OBJECT",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            Value::List(_) | Value::Tuple(_) | Value::Map(_) | Value::Object(..)
        )
    }

    /// Integer payload widened to i64, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload widened to f64, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Scalar string form: `"1"`/`"0"` for booleans, hex bit patterns for
    /// numbers, verbatim strings, base64 bytes. `None` for composites.
    pub fn to_scalar_string(&self) -> Option<String> {
        let s = match self {
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int8(v) => format!("{:x}", *v as u8),
            Value::Int16(v) => format!("{:x}", *v as u16),
            Value::Int32(v) => format!("{:x}", *v as u32),
            Value::Int64(v) => format!("{:x}", *v as u64),
            Value::Float32(v) => format!("{:x}", v.to_bits()),
            Value::Float64(v) => format!("{:x}", v.to_bits()),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => BASE64.encode(b),
            _ => return None,
        };
        Some(s)
    }

    /// Replace every scalar leaf with its string form, keeping the
    /// composite structure intact
    pub fn to_string_form(&self) -> Value {
        match self {
            Value::List(items) => Value::List(items.iter().map(Value::to_string_form).collect()),
            Value::Tuple(items) => Value::Tuple(items.iter().map(Value::to_string_form).collect()),
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string_form(), v.to_string_form()))
                    .collect(),
            ),
            Value::Object(name, attrs) => Value::Object(
                name.clone(),
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_string_form()))
                    .collect(),
            ),
            scalar => Value::String(scalar.to_scalar_string().unwrap_or_default()),
        }
    }

    /// Position of the variant in the cross-type ordering
    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int8(_) => 1,
            Value::Int16(_) => 2,
            Value::Int32(_) => 3,
            Value::Int64(_) => 4,
            Value::Float32(_) => 5,
            Value::Float64(_) => 6,
            Value::String(_) => 7,
            Value::Bytes(_) => 8,
            Value::List(_) => 9,
            Value::Tuple(_) => 10,
            Value::Map(_) => 11,
            Value::Object(..) => 12,
        }
    }
}

fn sorted_entries(entries: &[(Value, Value)]) -> Vec<&(Value, Value)> {
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort();
    sorted
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int8(a), Value::Int8(b)) => a.cmp(b),
            (Value::Int16(a), Value::Int16(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float32(a), Value::Float32(b)) => a.total_cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => sorted_entries(a).cmp(&sorted_entries(b)),
            (Value::Object(na, a), Value::Object(nb, b)) => na.cmp(nb).then_with(|| a.cmp(b)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "b64:{}", BASE64.encode(v)),
            Value::List(items) | Value::Tuple(items) => {
                let open = if matches!(self, Value::List(_)) { "[" } else { "(" };
                let close = if matches!(self, Value::List(_)) { "]" } else { ")" };
                write!(f, "{}", open)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "{}", close)
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Object(name, attrs) => {
                write!(f, "{}{{", name)?;
                for (i, (k, v)) in attrs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
