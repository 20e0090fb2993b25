//! Per-type field registries.
//!
//! A [`FieldRegistry`] is the explicit replacement for accessor-method
//! guessing: each persistent field registers a typed getter/setter closure
//! pair once, at type-registration time. Generic tooling keeps the
//! "dynamic path string" ergonomics (`get_path(rec, "a.b.c")`) while every
//! field name used in queries and bulk updates is validated against the
//! registry before it reaches the engine.

use std::collections::{BTreeMap, HashMap};

use recordkit_engine::{RecordId, Row, Value};
use thiserror::Error;

use crate::record::Timestamp;

/// Row field names managed by the layer itself, not registrable.
pub const RESERVED_FIELDS: [&str; 3] = ["id", "created", "changed"];

/// A structured field-access failure.
///
/// These are distinct from "the value happens to be absent": they mean the
/// path itself does not resolve, and are propagated to the caller rather
/// than swallowed.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The field is not registered for the entity.
    #[error("{entity} has no field {field:?}")]
    UnknownField {
        /// Entity name.
        entity: &'static str,
        /// The field that was requested.
        field: String,
    },

    /// The value supplied to a setter has the wrong type.
    #[error("{entity}.{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Entity name.
        entity: &'static str,
        /// Field being set.
        field: String,
        /// Expected value kind.
        expected: &'static str,
        /// Actual value kind.
        actual: &'static str,
    },

    /// A dotted-path segment did not resolve.
    #[error("{entity}: path {path:?} has no segment {segment:?}")]
    UnresolvedSegment {
        /// Entity name.
        entity: &'static str,
        /// The full path being walked.
        path: String,
        /// The segment that failed to resolve.
        segment: String,
    },

    /// A dotted path descended into a non-composite value.
    #[error("{entity}: {path:?} is not a composite value")]
    NotComposite {
        /// Entity name.
        entity: &'static str,
        /// The path prefix that resolved to a scalar.
        path: String,
    },

    /// The supplied path was empty or had an empty segment.
    #[error("{entity}: empty field path")]
    EmptyPath {
        /// Entity name.
        entity: &'static str,
    },
}

/// Conversion between a typed field and the engine [`Value`] model.
pub trait FieldValue: Sized {
    /// Kind name used in type-mismatch diagnostics.
    const EXPECTED: &'static str;

    /// Converts the field into a value.
    fn into_value(self) -> Value;

    /// Converts a value back, or `None` on a type mismatch.
    fn from_value(value: Value) -> Option<Self>;
}

impl FieldValue for String {
    const EXPECTED: &'static str = "text";

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldValue for bool {
    const EXPECTED: &'static str = "bool";

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl FieldValue for i64 {
    const EXPECTED: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl FieldValue for f64 {
    const EXPECTED: &'static str = "float";

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(x),
            Value::Int(n) => Some(n as f64),
            _ => None,
        }
    }
}

impl FieldValue for Value {
    const EXPECTED: &'static str = "value";

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FieldValue for BTreeMap<String, Value> {
    const EXPECTED: &'static str = "map";

    fn into_value(self) -> Value {
        Value::Map(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl FieldValue for RecordId {
    const EXPECTED: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self.as_i64())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(RecordId::new(n)),
            _ => None,
        }
    }
}

impl FieldValue for Timestamp {
    const EXPECTED: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self.as_secs())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(Timestamp::from_secs(n)),
            _ => None,
        }
    }
}

impl<V: FieldValue> FieldValue for Option<V> {
    const EXPECTED: &'static str = V::EXPECTED;

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => V::from_value(other).map(Some),
        }
    }
}

type Getter<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Box<dyn Fn(&mut T, Value) -> Result<(), AccessError> + Send + Sync>;

struct FieldAccessor<T> {
    name: &'static str,
    get: Getter<T>,
    set: Setter<T>,
}

/// The persisted-field registry for one entity type.
///
/// Registered fields are exactly the persisted fields; everything else on
/// the struct is transient. `id`, `created` and `changed` flow through the
/// [`crate::record::Record`] contract and are reserved here.
pub struct FieldRegistry<T> {
    entity: &'static str,
    fields: Vec<FieldAccessor<T>>,
    by_name: HashMap<&'static str, usize>,
}

impl<T> FieldRegistry<T> {
    /// Starts building a registry for `entity`.
    #[must_use]
    pub fn builder(entity: &'static str) -> FieldRegistryBuilder<T> {
        FieldRegistryBuilder {
            entity,
            fields: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Returns the entity name.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Returns `true` when `field` is registered.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.by_name.contains_key(field)
    }

    /// Iterates the registered field names in registration order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    fn accessor(&self, field: &str) -> Result<&FieldAccessor<T>, AccessError> {
        self.by_name
            .get(field)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| AccessError::UnknownField {
                entity: self.entity,
                field: field.to_owned(),
            })
    }

    /// Reads one registered field.
    pub fn get(&self, rec: &T, field: &str) -> Result<Value, AccessError> {
        Ok((self.accessor(field)?.get)(rec))
    }

    /// Writes one registered field, type-checked.
    pub fn set(&self, rec: &mut T, field: &str, value: Value) -> Result<(), AccessError> {
        (self.accessor(field)?.set)(rec, value)
    }

    /// Resolves a dotted path against the record's object graph.
    ///
    /// The first segment goes through the registered getter; the rest
    /// descend embedded map values.
    pub fn get_path(&self, rec: &T, path: &str) -> Result<Value, AccessError> {
        let segments = self.split_path(path)?;
        let mut current = self.get(rec, segments[0])?;
        let mut walked = segments[0].to_owned();
        for segment in &segments[1..] {
            let Value::Map(map) = current else {
                return Err(AccessError::NotComposite {
                    entity: self.entity,
                    path: walked,
                });
            };
            current = map
                .get(*segment)
                .cloned()
                .ok_or_else(|| AccessError::UnresolvedSegment {
                    entity: self.entity,
                    path: path.to_owned(),
                    segment: (*segment).to_owned(),
                })?;
            walked.push('.');
            walked.push_str(segment);
        }
        Ok(current)
    }

    /// Sets the value at a dotted path.
    ///
    /// All segments but the last must resolve to composite values; the
    /// leaf itself is created or overwritten. The updated root value is
    /// written back through the typed setter.
    pub fn set_path(&self, rec: &mut T, path: &str, value: Value) -> Result<(), AccessError> {
        let segments = self.split_path(path)?;
        if segments.len() == 1 {
            return self.set(rec, segments[0], value);
        }
        let mut root = self.get(rec, segments[0])?;
        let mut walked = segments[0].to_owned();
        {
            let mut current = &mut root;
            for segment in &segments[1..segments.len() - 1] {
                let Value::Map(map) = current else {
                    return Err(AccessError::NotComposite {
                        entity: self.entity,
                        path: walked,
                    });
                };
                current =
                    map.get_mut(*segment)
                        .ok_or_else(|| AccessError::UnresolvedSegment {
                            entity: self.entity,
                            path: path.to_owned(),
                            segment: (*segment).to_owned(),
                        })?;
                walked.push('.');
                walked.push_str(segment);
            }
            let Value::Map(map) = current else {
                return Err(AccessError::NotComposite {
                    entity: self.entity,
                    path: walked,
                });
            };
            map.insert((*segments[segments.len() - 1]).to_owned(), value);
        }
        self.set(rec, segments[0], root)
    }

    /// Encodes the registered fields of a record into a row.
    #[must_use]
    pub fn to_row(&self, rec: &T) -> Row {
        let mut row = Row::new();
        for field in &self.fields {
            row.insert(field.name.to_owned(), (field.get)(rec));
        }
        row
    }

    /// Applies row values onto a record through the setters.
    ///
    /// Row keys without a registered field are ignored, so extra columns
    /// from newer writers do not break older readers.
    pub fn apply_row(&self, rec: &mut T, row: &Row) -> Result<(), AccessError> {
        for field in &self.fields {
            if let Some(value) = row.get(field.name) {
                (field.set)(rec, value.clone())?;
            }
        }
        Ok(())
    }

    fn split_path<'p>(&self, path: &'p str) -> Result<Vec<&'p str>, AccessError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(AccessError::EmptyPath {
                entity: self.entity,
            });
        }
        Ok(segments)
    }
}

impl<T> std::fmt::Debug for FieldRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRegistry")
            .field("entity", &self.entity)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`FieldRegistry`].
///
/// Reserved names and duplicates are rejected immediately; those are
/// registration-time programmer errors, not runtime conditions.
pub struct FieldRegistryBuilder<T> {
    entity: &'static str,
    fields: Vec<FieldAccessor<T>>,
    by_name: HashMap<&'static str, usize>,
}

impl<T> FieldRegistryBuilder<T> {
    /// Registers one persisted field with its getter and setter.
    #[must_use]
    pub fn field<V, G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        V: FieldValue,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        assert!(
            !RESERVED_FIELDS.contains(&name),
            "field name {name:?} is reserved"
        );
        assert!(
            !self.by_name.contains_key(name),
            "field {name:?} registered twice"
        );
        let entity = self.entity;
        let accessor = FieldAccessor {
            name,
            get: Box::new(move |rec| get(rec).into_value()),
            set: Box::new(move |rec, value| {
                let actual = value.kind();
                match V::from_value(value) {
                    Some(v) => {
                        set(rec, v);
                        Ok(())
                    }
                    None => Err(AccessError::TypeMismatch {
                        entity,
                        field: name.to_owned(),
                        expected: V::EXPECTED,
                        actual,
                    }),
                }
            }),
        };
        self.by_name.insert(name, self.fields.len());
        self.fields.push(accessor);
        self
    }

    /// Finishes the registry.
    #[must_use]
    pub fn build(self) -> FieldRegistry<T> {
        FieldRegistry {
            entity: self.entity,
            fields: self.fields,
            by_name: self.by_name,
        }
    }
}
