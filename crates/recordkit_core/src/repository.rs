//! Per-type persistence operations.
//!
//! A [`Repository`] composes a [`Context`], a [`Record`] type and its
//! registry into the usual save/update/find surface. Every operation comes
//! in two forms: a plain method that runs in its own unit of work, and an
//! `*_in` variant that joins a unit the caller already holds, so several
//! operations can share one commit.

use std::marker::PhantomData;
use std::sync::Arc;

use recordkit_engine::{EngineError, Query, RecordId, Row, Value};

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::filter::{parse_filter, parse_order};
use crate::lazy::Lazy;
use crate::record::{Record, Timestamp};
use crate::registry::AccessError;
use crate::transaction::Unit;

/// Row column holding the creation timestamp.
const CREATED_COL: &str = "created";
/// Row column holding the last-modified timestamp.
const CHANGED_COL: &str = "changed";

/// Typed persistence operations for one record type.
pub struct Repository<T: Record> {
    ctx: Arc<Context>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Repository<T> {
    /// Creates a repository over the given context.
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            _marker: PhantomData,
        }
    }

    /// The context this repository runs against.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Stamps timestamps, drops cached attributes, and encodes the row.
    ///
    /// `created` is set once on first save; `changed` moves on every write.
    fn touch(rec: &mut T) -> Row {
        let now = Timestamp::now();
        let meta = rec.meta_mut();
        if meta.created.is_none() {
            meta.created = Some(now);
        }
        meta.changed = Some(now);
        meta.attrs.clear();

        let mut row = T::registry().to_row(rec);
        if let Some(created) = rec.meta().created {
            row.insert(CREATED_COL.to_owned(), Value::Int(created.as_secs()));
        }
        row.insert(CHANGED_COL.to_owned(), Value::Int(now.as_secs()));
        row
    }

    /// Decodes a stored row into a fresh record.
    fn from_row(id: RecordId, row: &Row) -> CoreResult<T> {
        let mut rec = T::default();
        let meta = rec.meta_mut();
        meta.id = Some(id);
        meta.created = row
            .get(CREATED_COL)
            .and_then(Value::as_int)
            .map(Timestamp::from_secs);
        meta.changed = row
            .get(CHANGED_COL)
            .and_then(Value::as_int)
            .map(Timestamp::from_secs);
        T::registry().apply_row(&mut rec, row)?;
        Ok(rec)
    }

    fn require_id(rec: &T) -> CoreResult<RecordId> {
        rec.id().ok_or(CoreError::MissingId { entity: T::ENTITY })
    }

    // ---- writes ----

    /// Inserts a new record and assigns its identifier.
    ///
    /// The record must not already have an id; use [`Repository::update`]
    /// or [`Repository::save_or_update`] for persisted records.
    pub fn save(&self, rec: &mut T) -> CoreResult<RecordId> {
        self.ctx.transaction(|unit| self.save_in(unit, rec))
    }

    /// [`Repository::save`] inside an existing unit of work.
    pub fn save_in(&self, unit: &mut Unit, rec: &mut T) -> CoreResult<RecordId> {
        if let Some(id) = rec.id() {
            return Err(CoreError::invalid_operation(format!(
                "{} {id} is already persisted",
                T::ENTITY
            )));
        }
        let row = Self::touch(rec);
        let id = unit.session_mut().insert(T::ENTITY, row)?;
        rec.meta_mut().id = Some(id);
        Ok(id)
    }

    /// Saves a new record, discarding the assigned id.
    pub fn persist(&self, rec: &mut T) -> CoreResult<()> {
        self.save(rec).map(|_| ())
    }

    /// Writes the current state of an already-persisted record.
    pub fn update(&self, rec: &mut T) -> CoreResult<()> {
        self.ctx.transaction(|unit| self.update_in(unit, rec))
    }

    /// [`Repository::update`] inside an existing unit of work.
    pub fn update_in(&self, unit: &mut Unit, rec: &mut T) -> CoreResult<()> {
        let id = Self::require_id(rec)?;
        let row = Self::touch(rec);
        unit.session_mut().update(T::ENTITY, id, row)?;
        Ok(())
    }

    /// Saves or updates depending on whether the record has an id.
    pub fn save_or_update(&self, rec: &mut T) -> CoreResult<RecordId> {
        self.ctx.transaction(|unit| self.save_or_update_in(unit, rec))
    }

    /// [`Repository::save_or_update`] inside an existing unit of work.
    pub fn save_or_update_in(&self, unit: &mut Unit, rec: &mut T) -> CoreResult<RecordId> {
        match rec.id() {
            Some(id) => {
                self.update_in(unit, rec)?;
                Ok(id)
            }
            None => self.save_in(unit, rec),
        }
    }

    /// Merges a detached record and returns the stored copy.
    ///
    /// Unlike [`Repository::update`] this accepts records whose id points
    /// at a row that no longer exists; the row is re-created under a fresh
    /// id in that case.
    pub fn merge(&self, rec: &T) -> CoreResult<T> {
        self.ctx.transaction(|unit| self.merge_in(unit, rec))
    }

    /// [`Repository::merge`] inside an existing unit of work.
    pub fn merge_in(&self, unit: &mut Unit, rec: &T) -> CoreResult<T> {
        let mut copy = rec.clone();
        let row = Self::touch(&mut copy);
        let (id, stored) = unit.session_mut().merge(T::ENTITY, rec.id(), row)?;
        Self::from_row(id, &stored)
    }

    /// Deletes the record's row and clears its persistence metadata.
    pub fn delete(&self, rec: &mut T) -> CoreResult<()> {
        self.ctx.transaction(|unit| self.delete_in(unit, rec))
    }

    /// [`Repository::delete`] inside an existing unit of work.
    pub fn delete_in(&self, unit: &mut Unit, rec: &mut T) -> CoreResult<()> {
        let id = Self::require_id(rec)?;
        unit.session_mut().delete(T::ENTITY, id)?;
        let meta = rec.meta_mut();
        meta.id = None;
        meta.created = None;
        meta.changed = None;
        meta.attrs.clear();
        Ok(())
    }

    /// Deletes a row by identifier.
    pub fn delete_by_id(&self, id: RecordId) -> CoreResult<()> {
        self.ctx.transaction(|unit| self.delete_by_id_in(unit, id))
    }

    /// [`Repository::delete_by_id`] inside an existing unit of work.
    pub fn delete_by_id_in(&self, unit: &mut Unit, id: RecordId) -> CoreResult<()> {
        unit.session_mut().delete(T::ENTITY, id)?;
        Ok(())
    }

    /// Assigns the named fields on a persisted record, in place and in
    /// the store, without rewriting the rest of the row.
    ///
    /// Field names are validated against the registry before anything is
    /// written. Returns the number of rows touched.
    pub fn update_fields(&self, rec: &mut T, sets: &[(&str, Value)]) -> CoreResult<u64> {
        self.ctx
            .transaction(|unit| self.update_fields_in(unit, rec, sets))
    }

    /// [`Repository::update_fields`] inside an existing unit of work.
    pub fn update_fields_in(
        &self,
        unit: &mut Unit,
        rec: &mut T,
        sets: &[(&str, Value)],
    ) -> CoreResult<u64> {
        let id = Self::require_id(rec)?;
        let registry = T::registry();
        for (field, _) in sets {
            if !registry.contains(field) {
                return Err(AccessError::UnknownField {
                    entity: T::ENTITY,
                    field: (*field).to_owned(),
                }
                .into());
            }
        }
        for (field, value) in sets {
            registry.set(rec, field, value.clone())?;
        }
        rec.meta_mut().attrs.clear();

        let owned: Vec<(String, Value)> = sets
            .iter()
            .map(|(f, v)| ((*f).to_owned(), v.clone()))
            .collect();
        let touched = unit.session_mut().update_fields(T::ENTITY, id, &owned)?;
        Ok(touched)
    }

    // ---- reads ----

    /// Fetches a record by optional identifier.
    ///
    /// `None` in means `None` out, without touching the engine, so a
    /// not-yet-assigned foreign reference reads as simply absent.
    pub fn by_id(&self, id: Option<RecordId>) -> CoreResult<Option<T>> {
        self.ctx.transaction(|unit| self.by_id_in(unit, id))
    }

    /// [`Repository::by_id`] inside an existing unit of work.
    pub fn by_id_in(&self, unit: &mut Unit, id: Option<RecordId>) -> CoreResult<Option<T>> {
        let Some(id) = id else {
            return Ok(None);
        };
        match unit.session_mut().fetch(T::ENTITY, id)? {
            Some(row) => Ok(Some(Self::from_row(id, &row)?)),
            None => Ok(None),
        }
    }

    /// Builds a deferred reference without querying anything.
    pub fn load(&self, id: Option<RecordId>) -> Lazy<T> {
        Lazy::from_id(id)
    }

    /// Resolves a deferred reference, fetching the row on first use.
    ///
    /// An absent reference resolves to `Ok(None)`. An unloaded reference
    /// whose row has since disappeared is an error, since the id was
    /// supposed to point at something.
    pub fn lazy<'a>(&self, lazy: &'a mut Lazy<T>) -> CoreResult<Option<&'a T>> {
        if let Lazy::Unloaded(id) = *lazy {
            let fetched = self
                .by_id(Some(id))?
                .ok_or_else(|| EngineError::row_not_found(T::ENTITY, id))?;
            lazy.set(fetched);
        }
        Ok(lazy.get())
    }

    /// First record matching the clause, under the entity's natural order.
    pub fn find_first(&self, clause: &str, params: &[Value]) -> CoreResult<Option<T>> {
        self.ctx
            .transaction(|unit| self.find_first_in(unit, clause, params))
    }

    /// [`Repository::find_first`] inside an existing unit of work.
    pub fn find_first_in(
        &self,
        unit: &mut Unit,
        clause: &str,
        params: &[Value],
    ) -> CoreResult<Option<T>> {
        let filter = parse_filter(T::registry(), clause, params.len())?;
        let query = Query::all(T::ENTITY).filter(filter).limit(1);
        let mut rows = unit.session_mut().select(&query, params)?;
        match rows.pop() {
            Some((id, row)) => Ok(Some(Self::from_row(id, &row)?)),
            None => Ok(None),
        }
    }

    /// All records matching the clause.
    pub fn find(&self, clause: &str, params: &[Value]) -> CoreResult<Vec<T>> {
        self.page(clause, "", None, 0, params)
    }

    /// Every record of this type.
    pub fn find_all(&self) -> CoreResult<Vec<T>> {
        self.ctx
            .transaction(|unit| self.select_in(unit, Query::all(T::ENTITY), &[]))
    }

    /// Every record of this type, sorted by the order clause.
    pub fn find_all_ordered(&self, order: &str) -> CoreResult<Vec<T>> {
        let keys = parse_order(T::registry(), order)?;
        let mut query = Query::all(T::ENTITY);
        for key in keys {
            query = query.order_by(key);
        }
        self.ctx.transaction(|unit| self.select_in(unit, query, &[]))
    }

    /// A filtered, ordered, windowed slice of records.
    ///
    /// Blank `order` keeps the entity's natural order; `limit` of `None`
    /// means unbounded.
    pub fn page(
        &self,
        clause: &str,
        order: &str,
        limit: Option<usize>,
        offset: usize,
        params: &[Value],
    ) -> CoreResult<Vec<T>> {
        let filter = parse_filter(T::registry(), clause, params.len())?;
        let keys = parse_order(T::registry(), order)?;
        let mut query = Query::all(T::ENTITY).filter(filter).offset(offset);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        for key in keys {
            query = query.order_by(key);
        }
        self.ctx
            .transaction(|unit| self.select_in(unit, query, params))
    }

    fn select_in(&self, unit: &mut Unit, query: Query, params: &[Value]) -> CoreResult<Vec<T>> {
        let rows = unit.session_mut().select(&query, params)?;
        rows.iter()
            .map(|(id, row)| Self::from_row(*id, row))
            .collect()
    }

    /// Total number of rows for this entity.
    pub fn count(&self) -> CoreResult<u64> {
        self.ctx
            .transaction(|unit| Ok(unit.session_mut().count(T::ENTITY, None, &[])?))
    }

    /// Number of rows matching the clause.
    pub fn count_where(&self, clause: &str, params: &[Value]) -> CoreResult<u64> {
        let filter = parse_filter(T::registry(), clause, params.len())?;
        self.ctx.transaction(|unit| {
            Ok(unit
                .session_mut()
                .count(T::ENTITY, Some(&filter), params)?)
        })
    }
}

impl<T: Record> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &T::ENTITY)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Meta;
    use crate::registry::FieldRegistry;
    use crate::settings::Settings;
    use recordkit_engine::MemoryEngine;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Default)]
    struct Invoice {
        meta: Meta,
        status: String,
        total: i64,
        note: Option<String>,
    }

    impl Record for Invoice {
        const ENTITY: &'static str = "invoice";

        fn meta(&self) -> &Meta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut Meta {
            &mut self.meta
        }

        fn registry() -> &'static FieldRegistry<Self> {
            static REGISTRY: OnceLock<FieldRegistry<Invoice>> = OnceLock::new();
            REGISTRY.get_or_init(|| {
                FieldRegistry::builder(Invoice::ENTITY)
                    .field(
                        "status",
                        |i: &Invoice| i.status.clone(),
                        |i, v: String| i.status = v,
                    )
                    .field("total", |i: &Invoice| i.total, |i, v: i64| i.total = v)
                    .field(
                        "note",
                        |i: &Invoice| i.note.clone(),
                        |i, v: Option<String>| i.note = v,
                    )
                    .build()
            })
        }
    }

    fn repo() -> Repository<Invoice> {
        let engine = Arc::new(MemoryEngine::new(["invoice"]));
        let ctx = Arc::new(Context::with_engine(
            Settings::from_map(std::collections::BTreeMap::new()),
            engine,
        ));
        Repository::new(ctx)
    }

    fn invoice(status: &str, total: i64) -> Invoice {
        Invoice {
            status: status.to_owned(),
            total,
            ..Invoice::default()
        }
    }

    #[test]
    fn save_assigns_id_and_timestamps() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        let id = repo.save(&mut inv).unwrap();
        assert_eq!(inv.id(), Some(id));
        assert!(inv.created().is_some());
        assert_eq!(inv.created(), inv.changed());
    }

    #[test]
    fn save_rejects_already_persisted() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        repo.save(&mut inv).unwrap();
        assert!(matches!(
            repo.save(&mut inv),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn by_id_round_trips_fields() {
        let repo = repo();
        let mut inv = invoice("OPEN", 25);
        inv.note = Some("rush".to_owned());
        let id = repo.save(&mut inv).unwrap();

        let loaded = repo.by_id(Some(id)).unwrap().unwrap();
        assert_eq!(loaded.status, "OPEN");
        assert_eq!(loaded.total, 25);
        assert_eq!(loaded.note.as_deref(), Some("rush"));
        assert_eq!(loaded.id(), Some(id));
        assert_eq!(loaded.created(), inv.created());
    }

    #[test]
    fn by_id_none_never_queries() {
        let repo = repo();
        assert!(repo.by_id(None).unwrap().is_none());
    }

    #[test]
    fn by_id_missing_row_is_none() {
        let repo = repo();
        assert!(repo.by_id(Some(RecordId::new(99))).unwrap().is_none());
    }

    #[test]
    fn update_requires_id() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        assert!(matches!(
            repo.update(&mut inv),
            Err(CoreError::MissingId { entity: "invoice" })
        ));
    }

    #[test]
    fn update_preserves_created() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        let id = repo.save(&mut inv).unwrap();
        // Paper over clock granularity so the preserved value is distinct.
        inv.meta.created = Some(Timestamp::from_secs(1_000));
        repo.update(&mut inv).unwrap();

        let loaded = repo.by_id(Some(id)).unwrap().unwrap();
        assert_eq!(loaded.created(), Some(Timestamp::from_secs(1_000)));
        assert!(loaded.changed().unwrap().as_secs() > 1_000);
    }

    #[test]
    fn save_or_update_dispatches_on_id() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        let id = repo.save_or_update(&mut inv).unwrap();
        inv.status = "PAID".to_owned();
        let again = repo.save_or_update(&mut inv).unwrap();
        assert_eq!(id, again);
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.by_id(Some(id)).unwrap().unwrap().status, "PAID");
    }

    #[test]
    fn merge_returns_stored_copy() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        let id = repo.save(&mut inv).unwrap();

        let mut detached = inv.clone();
        detached.status = "PAID".to_owned();
        let stored = repo.merge(&detached).unwrap();
        assert_eq!(stored.id(), Some(id));
        assert_eq!(stored.status, "PAID");
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn merge_without_id_inserts() {
        let repo = repo();
        let stored = repo.merge(&invoice("OPEN", 10)).unwrap();
        assert!(stored.id().is_some());
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn delete_clears_metadata() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        let id = repo.save(&mut inv).unwrap();
        repo.delete(&mut inv).unwrap();
        assert!(inv.id().is_none());
        assert!(inv.created().is_none());
        assert!(repo.by_id(Some(id)).unwrap().is_none());
    }

    #[test]
    fn update_fields_touches_named_fields_only() {
        let repo = repo();
        let mut inv = invoice("OPEN", 42);
        let id = repo.save(&mut inv).unwrap();

        let touched = repo
            .update_fields(
                &mut inv,
                &[
                    ("status", Value::Text("PAID".into())),
                    ("note", Value::Text("ok".into())),
                ],
            )
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(inv.status, "PAID");

        let loaded = repo.by_id(Some(id)).unwrap().unwrap();
        assert_eq!(loaded.status, "PAID");
        assert_eq!(loaded.note.as_deref(), Some("ok"));
        assert_eq!(loaded.total, 42);
    }

    #[test]
    fn update_fields_rejects_unknown_names() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        repo.save(&mut inv).unwrap();
        let before = inv.status.clone();
        let err = repo
            .update_fields(&mut inv, &[("password", Value::Text("x".into()))])
            .unwrap_err();
        assert!(matches!(err, CoreError::Access(_)));
        // Nothing applied locally either.
        assert_eq!(inv.status, before);
    }

    #[test]
    fn find_filters_and_orders() {
        let repo = repo();
        for (status, total) in [("OPEN", 30), ("PAID", 10), ("OPEN", 20)] {
            repo.save(&mut invoice(status, total)).unwrap();
        }

        let open = repo
            .find("status = ?", &[Value::Text("OPEN".into())])
            .unwrap();
        assert_eq!(open.len(), 2);

        let ordered = repo.find_all_ordered("total desc").unwrap();
        let totals: Vec<i64> = ordered.iter().map(|i| i.total).collect();
        assert_eq!(totals, [30, 20, 10]);
    }

    #[test]
    fn find_first_and_paging() {
        let repo = repo();
        for total in [1, 2, 3, 4, 5] {
            repo.save(&mut invoice("OPEN", total)).unwrap();
        }

        let first = repo
            .find_first("total > ?", &[Value::Int(3)])
            .unwrap()
            .unwrap();
        assert!(first.total > 3);

        let page = repo
            .page("total > ?", "total", Some(2), 1, &[Value::Int(0)])
            .unwrap();
        let totals: Vec<i64> = page.iter().map(|i| i.total).collect();
        assert_eq!(totals, [2, 3]);
    }

    #[test]
    fn count_and_count_where() {
        let repo = repo();
        for (status, total) in [("OPEN", 30), ("PAID", 10)] {
            repo.save(&mut invoice(status, total)).unwrap();
        }
        assert_eq!(repo.count().unwrap(), 2);
        assert_eq!(
            repo.count_where("status = ?", &[Value::Text("PAID".into())])
                .unwrap(),
            1
        );
    }

    #[test]
    fn write_timestamps_and_id_are_queryable() {
        let repo = repo();
        let mut first = invoice("OPEN", 10);
        let first_id = repo.save(&mut first).unwrap();
        repo.save(&mut invoice("PAID", 20)).unwrap();

        // Every saved row carries a positive changed timestamp.
        let touched = repo.find("changed > ?", &[Value::Int(0)]).unwrap();
        assert_eq!(touched.len(), 2);

        let by_key = repo
            .find("id = ?", &[Value::Int(first_id.as_i64())])
            .unwrap();
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].id(), Some(first_id));

        let newest_first = repo.find_all_ordered("created desc, id desc").unwrap();
        assert_eq!(newest_first.len(), 2);
        assert_ne!(newest_first[0].id(), Some(first_id));

        assert_eq!(
            repo.count_where("created <= ?", &[Value::Int(Timestamp::now().as_secs())])
                .unwrap(),
            2
        );
    }

    #[test]
    fn bad_clause_is_an_error_not_a_miss() {
        let repo = repo();
        assert!(matches!(
            repo.find("nope = ?", &[Value::Int(1)]),
            Err(CoreError::Filter(_))
        ));
    }

    #[test]
    fn lazy_resolves_once() {
        let repo = repo();
        let mut inv = invoice("OPEN", 10);
        let id = repo.save(&mut inv).unwrap();

        let mut lazy = repo.load(Some(id));
        assert!(!lazy.is_loaded());
        let loaded = repo.lazy(&mut lazy).unwrap().unwrap();
        assert_eq!(loaded.total, 10);
        assert!(lazy.is_loaded());
    }

    #[test]
    fn lazy_absent_is_none_dangling_is_error() {
        let repo = repo();
        let mut absent: Lazy<Invoice> = repo.load(None);
        assert!(repo.lazy(&mut absent).unwrap().is_none());

        let mut dangling = repo.load(Some(RecordId::new(404)));
        assert!(repo.lazy(&mut dangling).is_err());
    }

    #[test]
    fn shared_unit_commits_together() {
        let repo = repo();
        let ids = repo
            .context()
            .clone()
            .transaction(|unit| {
                let a = repo.save_in(unit, &mut invoice("OPEN", 1))?;
                let b = repo.save_in(unit, &mut invoice("OPEN", 2))?;
                Ok((a, b))
            })
            .unwrap();
        assert_ne!(ids.0, ids.1);
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn failed_unit_rolls_everything_back() {
        let repo = repo();
        let result: CoreResult<()> = repo.context().clone().transaction(|unit| {
            repo.save_in(unit, &mut invoice("OPEN", 1))?;
            Err(CoreError::invalid_operation("boom"))
        });
        assert!(result.is_err());
        assert_eq!(repo.count().unwrap(), 0);
    }
}
