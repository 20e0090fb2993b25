//! The record contract: what every persistent entity type carries.
//!
//! Entity types embed a [`Meta`] (identifier, write timestamps, attribute
//! cache) and implement [`Record`] by delegating to it, composing the
//! uniform operation set from [`crate::repository::Repository`] rather
//! than inheriting it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use recordkit_engine::{RecordId, Value};
use tracing::error;

use crate::error::CoreResult;
use crate::registry::FieldRegistry;

/// Epoch-seconds timestamp set on the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from epoch seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the current time, at second resolution.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self(secs)
    }

    /// Returns the raw epoch seconds.
    #[must_use]
    pub const fn as_secs(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-instance cache of computed attributes.
///
/// Not persisted, not shared, and cleared on every write or delete; a
/// cloned record starts with an empty cache. The backing map is allocated
/// lazily on first use.
#[derive(Default)]
pub struct AttrCache {
    map: Option<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl AttrCache {
    /// Returns the cached value under `key`, if present with type `V`.
    #[must_use]
    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.map
            .as_ref()
            .and_then(|map| map.get(key))
            .and_then(|slot| slot.downcast_ref::<V>())
    }

    /// Stores a value under `key`, replacing any previous entry.
    pub fn put<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) {
        self.map
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), Box::new(value));
    }

    /// Returns the value under `key`, computing and caching it when
    /// absent (or cached with a different type).
    pub fn cache<V, F>(&mut self, key: &str, produce: F) -> &V
    where
        V: Any + Send + Sync,
        F: FnOnce() -> V,
    {
        let map = self.map.get_or_insert_with(HashMap::new);
        if !map.get(key).is_some_and(|slot| slot.is::<V>()) {
            map.insert(key.to_owned(), Box::new(produce()));
        }
        match map.get(key).and_then(|slot| slot.downcast_ref::<V>()) {
            Some(value) => value,
            None => unreachable!("slot was just filled with the requested type"),
        }
    }

    /// Drops every cached value.
    pub fn clear(&mut self) {
        if let Some(map) = self.map.as_mut() {
            map.clear();
        }
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.as_ref().is_none_or(HashMap::is_empty)
    }
}

impl Clone for AttrCache {
    /// Cached values do not follow copies of the record.
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for AttrCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.map.as_ref().map_or(0, HashMap::len);
        write!(f, "AttrCache({len})")
    }
}

/// Persistence metadata embedded in every entity type.
///
/// The identifier is `None` until first persisted; `created` and `changed`
/// are maintained by the write path.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// Engine-assigned identifier.
    pub id: Option<RecordId>,
    /// Set once, on first save.
    pub created: Option<Timestamp>,
    /// Refreshed on every write.
    pub changed: Option<Timestamp>,
    /// Transient computed-attribute cache.
    pub attrs: AttrCache,
}

/// A persistent entity type.
///
/// Implemented by embedding a [`Meta`] and registering the persisted
/// fields once:
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Default)]
/// struct Order {
///     meta: Meta,
///     status: String,
///     total: i64,
/// }
///
/// impl Record for Order {
///     const ENTITY: &'static str = "order";
///
///     fn meta(&self) -> &Meta { &self.meta }
///     fn meta_mut(&mut self) -> &mut Meta { &mut self.meta }
///
///     fn registry() -> &'static FieldRegistry<Self> {
///         static REGISTRY: OnceLock<FieldRegistry<Order>> = OnceLock::new();
///         REGISTRY.get_or_init(|| {
///             FieldRegistry::builder(Order::ENTITY)
///                 .field("status", |o: &Order| o.status.clone(), |o, v: String| o.status = v)
///                 .field("total", |o: &Order| o.total, |o, v: i64| o.total = v)
///                 .build()
///         })
///     }
/// }
/// ```
pub trait Record: Default + Clone + Send + 'static {
    /// Entity name registered with the engine.
    const ENTITY: &'static str;

    /// Returns the persistence metadata.
    fn meta(&self) -> &Meta;

    /// Returns the persistence metadata mutably.
    fn meta_mut(&mut self) -> &mut Meta;

    /// Returns the field registry for this type.
    fn registry() -> &'static FieldRegistry<Self>;

    /// Returns the identifier, `None` until first persisted.
    fn id(&self) -> Option<RecordId> {
        self.meta().id
    }

    /// Returns the creation timestamp, `None` until first persisted.
    fn created(&self) -> Option<Timestamp> {
        self.meta().created
    }

    /// Returns the last-modified timestamp, `None` until first persisted.
    fn changed(&self) -> Option<Timestamp> {
        self.meta().changed
    }

    /// Resolves a dotted field path against this record.
    ///
    /// Failures are logged with the entity and path, then propagated.
    fn get_field(&self, path: &str) -> CoreResult<Value> {
        Self::registry().get_path(self, path).map_err(|err| {
            error!(entity = Self::ENTITY, path, %err, "field get failed");
            err.into()
        })
    }

    /// Sets the value at a dotted field path.
    ///
    /// Failures are logged with the entity and path, then propagated.
    fn set_field(&mut self, path: &str, value: Value) -> CoreResult<()> {
        Self::registry()
            .set_path(self, path, value)
            .map_err(|err| {
                error!(entity = Self::ENTITY, path, %err, "field set failed");
                err.into()
            })
    }

    /// Reads a cached computed attribute.
    fn attribute<V: Any>(&self, key: &str) -> Option<&V> {
        self.meta().attrs.get(key)
    }

    /// Stores a computed attribute.
    fn put_attribute<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) {
        self.meta_mut().attrs.put(key, value);
    }

    /// Returns the computed attribute under `key`, producing it on first
    /// access. Recomputed after any write or delete clears the cache.
    fn memo<V, F>(&mut self, key: &str, produce: F) -> &V
    where
        V: Any + Send + Sync,
        F: FnOnce() -> V,
    {
        self.meta_mut().attrs.cache(key, produce)
    }

    /// Identity equality: equal non-null identifiers, or the very same
    /// instance when neither has been persisted yet.
    fn same_identity(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => std::ptr::eq(self, other),
            _ => false,
        }
    }
}
