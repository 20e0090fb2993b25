//! Structured query model and row evaluation.
//!
//! Queries carry a parsed filter tree with positional parameter slots
//! instead of statement text, so nothing caller-supplied is ever spliced
//! into a statement. Parameters are bound in the order their placeholders
//! appeared.

use std::cmp::Ordering;

use crate::error::{EngineError, EngineResult};
use crate::value::{Row, Value};

/// Row key under which engines expose the storage identifier to filters
/// and sort keys. Shadows any stored column of the same name.
pub const ID_FIELD: &str = "id";

/// Comparison operator in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Text pattern match (`%` and `_` wildcards).
    Like,
}

/// A filter tree over row fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare a field against the positional parameter `param`.
    Cmp {
        /// Field name (validated by the layer above).
        field: String,
        /// Comparison operator.
        op: CmpOp,
        /// Zero-based positional parameter index.
        param: usize,
    },
    /// `field is null` / `field is not null`.
    IsNull {
        /// Field name.
        field: String,
        /// `true` for `is not null`.
        negated: bool,
    },
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
    /// Sub-filter must not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Evaluates the filter against one row.
    ///
    /// A field absent from the row behaves as `Null`. Comparing a stored
    /// value against a parameter of an incompatible type is an error;
    /// comparing against `Null` is simply false.
    pub fn matches(&self, row: &Row, params: &[Value]) -> EngineResult<bool> {
        match self {
            Filter::Cmp { field, op, param } => {
                let stored = row.get(field).unwrap_or(&Value::Null);
                let bound = params.get(*param).ok_or(EngineError::UnboundParameter {
                    index: *param,
                    supplied: params.len(),
                })?;
                compare(field, stored, *op, bound)
            }
            Filter::IsNull { field, negated } => {
                let stored = row.get(field).unwrap_or(&Value::Null);
                Ok(stored.is_null() != *negated)
            }
            Filter::And(parts) => {
                for part in parts {
                    if !part.matches(row, params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(parts) => {
                for part in parts {
                    if part.matches(row, params)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(inner) => Ok(!inner.matches(row, params)?),
        }
    }

    /// Number of parameter slots referenced by this filter.
    ///
    /// Slots are assigned densely in placeholder order, so this is one
    /// past the highest index.
    #[must_use]
    pub fn param_count(&self) -> usize {
        match self {
            Filter::Cmp { param, .. } => param + 1,
            Filter::IsNull { .. } => 0,
            Filter::And(parts) | Filter::Or(parts) => {
                parts.iter().map(Filter::param_count).max().unwrap_or(0)
            }
            Filter::Not(inner) => inner.param_count(),
        }
    }
}

fn compare(field: &str, stored: &Value, op: CmpOp, bound: &Value) -> EngineResult<bool> {
    if !stored.comparable_with(bound) {
        return Err(EngineError::FilterTypeMismatch {
            field: field.to_owned(),
            stored: stored.kind(),
            param: bound.kind(),
        });
    }
    if stored.is_null() || bound.is_null() {
        return Ok(false);
    }
    let result = match op {
        CmpOp::Like => stored.like(bound),
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match stored.compare(bound) {
                Some(ord) => ord == Ordering::Equal,
                None => stored == bound,
            };
            if op == CmpOp::Eq {
                equal
            } else {
                !equal
            }
        }
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => match stored.compare(bound) {
            Some(ord) => match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
                _ => unreachable!("ordering op"),
            },
            // NaN comparisons are never true.
            None => false,
        },
    };
    Ok(result)
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Field to sort by.
    pub field: String,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

impl Order {
    /// Creates an ascending order key.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Creates a descending order key.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A select over one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Entity name.
    pub entity: String,
    /// Optional filter; `None` selects everything.
    pub filter: Option<Filter>,
    /// Sort keys, applied in order.
    pub order: Vec<Order>,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Number of matching rows to skip.
    pub offset: usize,
}

impl Query {
    /// Creates an unfiltered query over `entity`.
    #[must_use]
    pub fn all(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Compares two rows according to the sort keys.
    #[must_use]
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.order {
            let va = a.get(&key.field).unwrap_or(&Value::Null);
            let vb = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = va.total_cmp(vb);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
