//! In-memory reference engine.
//!
//! Suitable for tests and ephemeral data. Shared tables live behind one
//! lock; sessions buffer their writes and apply them atomically at commit,
//! so a rolled-back unit of work leaves zero rows changed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::query::{Filter, Query, ID_FIELD};
use crate::session::{Engine, Session, TxState};
use crate::value::{RecordId, Row, Value};

/// Properties key naming the comma-separated mapped entity list.
pub const ENTITIES_KEY: &str = "engine.entities";

/// Committed state shared by all sessions of one engine.
#[derive(Debug)]
struct Tables {
    /// Entity name -> id -> row.
    rows: HashMap<String, BTreeMap<RecordId, Row>>,
    /// Next identifier to assign. Ids are never reused, even after
    /// rollback (identity-column semantics).
    next_id: i64,
}

impl Tables {
    fn table(&self, entity: &str) -> EngineResult<&BTreeMap<RecordId, Row>> {
        self.rows
            .get(entity)
            .ok_or_else(|| EngineError::unknown_entity(entity))
    }
}

/// An in-memory persistence engine.
///
/// Entities must be registered up front; operations naming anything else
/// fail with [`EngineError::UnknownEntity`].
#[derive(Debug)]
pub struct MemoryEngine {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryEngine {
    /// Creates an engine with the given mapped entities.
    #[must_use]
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tables = Tables {
            rows: HashMap::new(),
            next_id: 1,
        };
        for entity in entities {
            tables.rows.entry(entity.into()).or_default();
        }
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Builds an engine from parsed engine properties.
    ///
    /// Requires a non-empty `engine.entities` list; anything else is a
    /// fatal misconfiguration.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> EngineResult<Self> {
        let listed = properties
            .get(ENTITIES_KEY)
            .ok_or_else(|| EngineError::invalid_properties(format!("missing {ENTITIES_KEY}")))?;
        let entities: Vec<String> = listed
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();
        if entities.is_empty() {
            return Err(EngineError::invalid_properties(format!(
                "empty {ENTITIES_KEY} list"
            )));
        }
        Ok(Self::new(entities))
    }

    /// Returns the number of committed rows for an entity.
    pub fn committed_count(&self, entity: &str) -> EngineResult<usize> {
        Ok(self.tables.read().table(entity)?.len())
    }
}

impl Engine for MemoryEngine {
    fn open_session(&self) -> EngineResult<Box<dyn Session>> {
        Ok(Box::new(MemorySession {
            tables: Arc::clone(&self.tables),
            state: TxState::None,
            pending: Vec::new(),
        }))
    }

    fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().rows.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A buffered write awaiting commit.
#[derive(Debug, Clone)]
enum Pending {
    Put {
        entity: String,
        id: RecordId,
        row: Row,
    },
    Delete {
        entity: String,
        id: RecordId,
    },
}

/// A session over a [`MemoryEngine`].
struct MemorySession {
    tables: Arc<RwLock<Tables>>,
    state: TxState,
    pending: Vec<Pending>,
}

impl MemorySession {
    fn ensure_active(&self) -> EngineResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(EngineError::invalid_transition(format!(
                "operation outside a transaction (state {})",
                self.state
            )))
        }
    }

    /// Resolves a row as this session sees it: the last pending write for
    /// the key wins, otherwise the committed version.
    fn effective_row(&self, entity: &str, id: RecordId) -> EngineResult<Option<Row>> {
        for op in self.pending.iter().rev() {
            match op {
                Pending::Put {
                    entity: e,
                    id: i,
                    row,
                } if e == entity && *i == id => return Ok(Some(row.clone())),
                Pending::Delete { entity: e, id: i } if e == entity && *i == id => {
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(self.tables.read().table(entity)?.get(&id).cloned())
    }

    /// The committed table with this session's pending writes applied.
    fn effective_table(&self, entity: &str) -> EngineResult<BTreeMap<RecordId, Row>> {
        let mut view = self.tables.read().table(entity)?.clone();
        for op in &self.pending {
            match op {
                Pending::Put {
                    entity: e,
                    id,
                    row,
                } if e == entity => {
                    view.insert(*id, row.clone());
                }
                Pending::Delete { entity: e, id } if e == entity => {
                    view.remove(id);
                }
                _ => {}
            }
        }
        Ok(view)
    }

    fn ensure_entity(&self, entity: &str) -> EngineResult<()> {
        self.tables.read().table(entity).map(|_| ())
    }
}

impl Session for MemorySession {
    fn begin(&mut self) -> EngineResult<()> {
        self.state.begin()
    }

    fn commit(&mut self) -> EngineResult<()> {
        self.state.commit()?;
        let mut tables = self.tables.write();
        for op in self.pending.drain(..) {
            match op {
                Pending::Put { entity, id, row } => {
                    if let Some(table) = tables.rows.get_mut(&entity) {
                        table.insert(id, row);
                    }
                }
                Pending::Delete { entity, id } => {
                    if let Some(table) = tables.rows.get_mut(&entity) {
                        table.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        self.state.rollback()?;
        self.pending.clear();
        Ok(())
    }

    fn state(&self) -> TxState {
        self.state
    }

    fn insert(&mut self, entity: &str, row: Row) -> EngineResult<RecordId> {
        self.ensure_active()?;
        self.ensure_entity(entity)?;
        // Reserve the identifier immediately so the caller can observe it
        // inside the transaction. A later rollback burns the id.
        let id = {
            let mut tables = self.tables.write();
            let id = RecordId::new(tables.next_id);
            tables.next_id += 1;
            id
        };
        self.pending.push(Pending::Put {
            entity: entity.to_owned(),
            id,
            row,
        });
        Ok(id)
    }

    fn update(&mut self, entity: &str, id: RecordId, row: Row) -> EngineResult<()> {
        self.ensure_active()?;
        if self.effective_row(entity, id)?.is_none() {
            return Err(EngineError::row_not_found(entity, id));
        }
        self.pending.push(Pending::Put {
            entity: entity.to_owned(),
            id,
            row,
        });
        Ok(())
    }

    fn upsert(&mut self, entity: &str, id: RecordId, row: Row) -> EngineResult<()> {
        self.ensure_active()?;
        self.ensure_entity(entity)?;
        {
            // Keep the id counter ahead of externally supplied ids.
            let mut tables = self.tables.write();
            if tables.next_id <= id.as_i64() {
                tables.next_id = id.as_i64() + 1;
            }
        }
        self.pending.push(Pending::Put {
            entity: entity.to_owned(),
            id,
            row,
        });
        Ok(())
    }

    fn merge(
        &mut self,
        entity: &str,
        id: Option<RecordId>,
        row: Row,
    ) -> EngineResult<(RecordId, Row)> {
        self.ensure_active()?;
        let id = match id {
            Some(id) => {
                self.upsert(entity, id, row.clone())?;
                id
            }
            None => self.insert(entity, row.clone())?,
        };
        Ok((id, row))
    }

    fn delete(&mut self, entity: &str, id: RecordId) -> EngineResult<()> {
        self.ensure_active()?;
        if self.effective_row(entity, id)?.is_none() {
            return Err(EngineError::row_not_found(entity, id));
        }
        self.pending.push(Pending::Delete {
            entity: entity.to_owned(),
            id,
        });
        Ok(())
    }

    fn update_fields(
        &mut self,
        entity: &str,
        id: RecordId,
        sets: &[(String, Value)],
    ) -> EngineResult<u64> {
        self.ensure_active()?;
        let Some(mut row) = self.effective_row(entity, id)? else {
            return Ok(0);
        };
        for (field, value) in sets {
            row.insert(field.clone(), value.clone());
        }
        self.pending.push(Pending::Put {
            entity: entity.to_owned(),
            id,
            row,
        });
        Ok(1)
    }

    fn fetch(&mut self, entity: &str, id: RecordId) -> EngineResult<Option<Row>> {
        self.ensure_active()?;
        self.effective_row(entity, id)
    }

    fn select(&mut self, query: &Query, params: &[Value]) -> EngineResult<Vec<(RecordId, Row)>> {
        self.ensure_active()?;
        let mut view = self.effective_table(&query.entity)?;
        // The storage key is visible to filters and sort keys as the `id`
        // column; it is stripped again before rows are returned.
        for (id, row) in view.iter_mut() {
            row.insert(ID_FIELD.to_owned(), Value::Int(id.as_i64()));
        }
        let mut matched: Vec<(RecordId, Row)> = Vec::new();
        for (id, row) in view {
            let keep = match &query.filter {
                Some(filter) => filter.matches(&row, params)?,
                None => true,
            };
            if keep {
                matched.push((id, row));
            }
        }
        if !query.order.is_empty() {
            // Stable sort: equal keys keep id order from the BTreeMap walk.
            matched.sort_by(|(_, a), (_, b)| query.compare_rows(a, b));
        }
        let iter = matched.into_iter().skip(query.offset);
        let mut result: Vec<(RecordId, Row)> = match query.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        };
        for (_, row) in &mut result {
            row.remove(ID_FIELD);
        }
        Ok(result)
    }

    fn count(
        &mut self,
        entity: &str,
        filter: Option<&Filter>,
        params: &[Value],
    ) -> EngineResult<u64> {
        self.ensure_active()?;
        let mut view = self.effective_table(entity)?;
        for (id, row) in view.iter_mut() {
            row.insert(ID_FIELD.to_owned(), Value::Int(id.as_i64()));
        }
        let mut total = 0u64;
        for row in view.values() {
            let keep = match filter {
                Some(filter) => filter.matches(row, params)?,
                None => true,
            };
            if keep {
                total += 1;
            }
        }
        Ok(total)
    }
}
