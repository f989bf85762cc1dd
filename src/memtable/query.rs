//! Query and scan requests, and the filter evaluator
//!
//! Filters are checked against the schema before any record is touched:
//! unknown columns and comparisons across type families are validation
//! errors, never a silent `false`.
//!
//! ## Null Ordering
//! - null sorts before every non-null value
//! - two nulls satisfy `EQUAL`, `LESS_EQUAL` and `GREATER_EQUAL`, never
//!   `LESS` or `GREATER`

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{AtlasError, Result};
use crate::record::Record;
use crate::schema::TableSchema;
use crate::types::{DataType, Value};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl CompareOp {
    fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Equal)
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessEqual => ordering != Ordering::Greater,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::GreaterEqual => ordering != Ordering::Less,
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    /// `None` is the null literal
    Literal(Option<Value>),
}

impl Operand {
    pub fn column(name: impl Into<String>) -> Self {
        Operand::Column(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Operand::Literal(Some(value.into()))
    }

    pub fn null() -> Self {
        Operand::Literal(None)
    }
}

/// Boolean filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        op: CompareOp,
        lhs: Operand,
        rhs: Operand,
    },
}

impl Filter {
    pub fn compare(op: CompareOp, lhs: Operand, rhs: Operand) -> Self {
        Filter::Compare { op, lhs, rhs }
    }

    /// `column <op> literal`
    pub fn column(op: CompareOp, column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Compare {
            op,
            lhs: Operand::column(column),
            rhs: Operand::literal(value),
        }
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Check every comparison against `schema`
    pub(crate) fn check(&self, schema: &TableSchema) -> Result<()> {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.check(schema)?;
                }
                Ok(())
            }
            Filter::Not(inner) => inner.check(schema),
            Filter::Compare { op, lhs, rhs } => {
                let left = operand_type(schema, lhs)?;
                let right = operand_type(schema, rhs)?;
                check_comparable(*op, left.as_ref(), right.as_ref())
            }
        }
    }

    /// Evaluate against one record; `check` must have passed first
    pub(crate) fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(record)),
            Filter::Or(children) => children.iter().any(|c| c.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
            Filter::Compare { op, lhs, rhs } => {
                let left = operand_value(record, lhs);
                let right = operand_value(record, rhs);
                match (left, right) {
                    (None, None) => matches!(
                        op,
                        CompareOp::Equal | CompareOp::LessEqual | CompareOp::GreaterEqual
                    ),
                    (l, r) => op.holds(compare_nullable(l, r)),
                }
            }
        }
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A filtered, sorted, paginated query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// (column, alias) pairs; empty selects every column under its own name
    pub projection: Vec<(String, String)>,
    pub order_by: Vec<OrderBy>,
    pub filter: Option<Filter>,
    /// Negative values clamp to 0
    pub start: i64,
    /// Negative means unbounded
    pub limit: i64,
    /// Include null and absent projected columns as `None`
    pub keep_none: bool,
    /// `false` renders every scalar as its string form
    pub raw: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            projection: Vec::new(),
            order_by: Vec::new(),
            filter: None,
            start: 0,
            limit: -1,
            keep_none: false,
            raw: true,
        }
    }
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project `column` under its own name
    pub fn select(self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.select_as(column.clone(), column)
    }

    pub fn select_as(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.projection.push((column.into(), alias.into()));
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn page(mut self, start: i64, limit: i64) -> Self {
        self.start = start;
        self.limit = limit;
        self
    }

    pub fn keep_none(mut self, keep: bool) -> Self {
        self.keep_none = keep;
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }
}

/// A key-ordered range scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub projection: Vec<(String, String)>,
    /// Missing bound means the first key, inclusive
    pub start_key: Option<Value>,
    pub start_inclusive: bool,
    /// Missing bound means the last key, inclusive
    pub end_key: Option<Value>,
    pub end_inclusive: bool,
    /// Negative means unbounded
    pub limit: i64,
    pub keep_none: bool,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            projection: Vec::new(),
            start_key: None,
            start_inclusive: true,
            end_key: None,
            end_inclusive: false,
            limit: -1,
            keep_none: false,
        }
    }
}

impl ScanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.projection.push((column.clone(), column));
        self
    }

    pub fn select_as(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.projection.push((column.into(), alias.into()));
        self
    }

    pub fn start(mut self, key: impl Into<Value>, inclusive: bool) -> Self {
        self.start_key = Some(key.into());
        self.start_inclusive = inclusive;
        self
    }

    pub fn end(mut self, key: impl Into<Value>, inclusive: bool) -> Self {
        self.end_key = Some(key.into());
        self.end_inclusive = inclusive;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn keep_none(mut self, keep: bool) -> Self {
        self.keep_none = keep;
        self
    }
}

/// One output row: the record key plus projected values by alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResult {
    pub key: Value,
    pub values: BTreeMap<String, Option<Value>>,
}

impl RecordResult {
    /// Non-null value under `alias`
    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.values.get(alias).and_then(|v| v.as_ref())
    }
}

// =============================================================================
// Evaluation Helpers
// =============================================================================

/// Resolve the projection against the schema; empty means every column
pub(crate) fn resolve_projection(
    schema: &TableSchema,
    projection: &[(String, String)],
) -> Result<Vec<(String, String)>> {
    if projection.is_empty() {
        return Ok(schema
            .columns()
            .into_iter()
            .map(|c| (c.name.clone(), c.name.clone()))
            .collect());
    }
    for (column, _) in projection {
        schema.require_column(column)?;
    }
    Ok(projection.to_vec())
}

/// Build the output row for `record`
pub(crate) fn project(
    key: &Value,
    record: &Record,
    projection: &[(String, String)],
    keep_none: bool,
    raw: bool,
) -> RecordResult {
    let render = |v: &Value| if raw { v.clone() } else { v.to_string_form() };

    let mut values = BTreeMap::new();
    for (column, alias) in projection {
        match record.get(column) {
            Some(v) => {
                values.insert(alias.clone(), Some(render(v)));
            }
            None if keep_none => {
                values.insert(alias.clone(), None);
            }
            None => {}
        }
    }
    RecordResult {
        key: render(key),
        values,
    }
}

/// Check order-by columns exist and are scalar
pub(crate) fn check_order_by(schema: &TableSchema, order_by: &[OrderBy]) -> Result<()> {
    for order in order_by {
        let column = schema.require_column(&order.column)?;
        if !column.data_type.is_scalar() {
            return Err(AtlasError::validation(format!(
                "cannot order by column {} of type {}",
                order.column, column.data_type
            )));
        }
    }
    Ok(())
}

/// Multi-key comparator; ties fall through to the next key
pub(crate) fn compare_records(a: &Record, b: &Record, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let ordering = compare_nullable(a.get(&order.column), b.get(&order.column));
        let ordering = if order.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// `[start, start + limit)` clamped to `len`
pub(crate) fn page_bounds(len: usize, start: i64, limit: i64) -> (usize, usize) {
    let start = usize::try_from(start.max(0)).unwrap_or(usize::MAX).min(len);
    let end = if limit < 0 {
        len
    } else {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        start.saturating_add(limit).min(len)
    };
    (start, end)
}

fn operand_type(schema: &TableSchema, operand: &Operand) -> Result<Option<DataType>> {
    match operand {
        Operand::Column(name) => Ok(Some(schema.require_column(name)?.data_type.clone())),
        Operand::Literal(None) => Ok(None),
        Operand::Literal(Some(value)) => DataType::of_scalar(value).map(Some).ok_or_else(|| {
            AtlasError::validation(format!(
                "filter literal must be a scalar, got {}",
                value.type_name()
            ))
        }),
    }
}

fn check_comparable(op: CompareOp, left: Option<&DataType>, right: Option<&DataType>) -> Result<()> {
    for side in [left, right].into_iter().flatten() {
        if op.is_ordering() && !side.is_scalar() {
            return Err(AtlasError::validation(format!(
                "{:?} is not defined for {} values",
                op, side
            )));
        }
    }
    if let (Some(l), Some(r)) = (left, right) {
        let compatible = if l.is_scalar() && r.is_scalar() {
            l.family() == r.family()
        } else {
            l == r
        };
        if !compatible {
            return Err(AtlasError::validation(format!(
                "cannot compare {} with {}",
                l, r
            )));
        }
    }
    Ok(())
}

fn operand_value<'a>(record: &'a Record, operand: &'a Operand) -> Option<&'a Value> {
    match operand {
        Operand::Column(name) => record.get(name),
        Operand::Literal(value) => value.as_ref(),
    }
}

/// Nulls first; values of one family compare numerically across widths
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if a.type_name() == b.type_name() {
        return a.cmp(b);
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}
