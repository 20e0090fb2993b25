//! Field values, rows, and record identifiers.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a stored record.
///
/// Identifiers are engine-assigned on insert, monotonically increasing,
/// and never reused. A record that has not been persisted yet has no
/// identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Creates a record ID from a raw value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// One stored record: field name to value.
///
/// The record identifier is not a row field; it is the storage key.
pub type Row = BTreeMap<String, Value>;

/// A dynamically typed field value.
///
/// `Map` carries embedded sub-objects, so dotted field paths can descend
/// an object graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Embedded sub-object.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the variant name, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Map(_) => "map",
        }
    }

    /// Returns `true` if the value is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text content, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if any.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the embedded map, if any.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Compares two values for filtering.
    ///
    /// Returns `None` when either side is `Null` (SQL-style: comparisons
    /// against NULL are never true) and when a float comparison involves
    /// NaN. Int and Float compare numerically across variants. Any other
    /// cross-variant comparison is a type error handled by the caller.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Returns `true` when the two variants cannot be compared at all.
    ///
    /// Distinguishes a type error from a NULL comparison, which is merely
    /// false.
    #[must_use]
    pub fn comparable_with(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => true,
            (Value::Bool(_), Value::Bool(_))
            | (Value::Text(_), Value::Text(_))
            | (Value::Map(_), Value::Map(_)) => true,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => true,
            _ => false,
        }
    }

    /// Total ordering for sorting (ORDER BY).
    ///
    /// Nulls sort first, then variants by rank, then by value. Floats use
    /// `f64::total_cmp` so NaN has a stable position.
    #[must_use]
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Text(_) => 3,
                Value::Map(_) => 4,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => {
                let mut ia = a.iter();
                let mut ib = b.iter();
                loop {
                    match (ia.next(), ib.next()) {
                        (None, None) => return Ordering::Equal,
                        (None, Some(_)) => return Ordering::Less,
                        (Some(_), None) => return Ordering::Greater,
                        (Some((ka, va)), Some((kb, vb))) => {
                            let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                            if ord != Ordering::Equal {
                                return ord;
                            }
                        }
                    }
                }
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Matches a text value against a `like` pattern.
    ///
    /// `%` matches any run of characters, `_` matches exactly one.
    /// Non-text operands never match.
    #[must_use]
    pub fn like(&self, pattern: &Value) -> bool {
        match (self, pattern) {
            (Value::Text(s), Value::Text(p)) => {
                let text: Vec<char> = s.chars().collect();
                let pat: Vec<char> = p.chars().collect();
                like_match(&text, &pat)
            }
            _ => false,
        }
    }
}

/// Recursive `%`/`_` pattern match over char slices.
fn like_match(text: &[char], pat: &[char]) -> bool {
    match pat.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => {
            // Empty match or consume one char and retry.
            (0..=text.len()).any(|skip| like_match(&text[skip..], rest))
        }
        Some(('_', rest)) => match text.split_first() {
            Some((_, text_rest)) => like_match(text_rest, rest),
            None => false,
        },
        Some((c, rest)) => match text.split_first() {
            Some((t, text_rest)) => t == c && like_match(text_rest, rest),
            None => false,
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::Int(id.as_i64())
    }
}
