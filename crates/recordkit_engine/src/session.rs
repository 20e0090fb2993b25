//! Engine and session contracts.
//!
//! The engine is the opaque lower seam: it owns connections, identifier
//! generation, and statement execution. The layer above only ever talks to
//! these traits, so any engine that can honor them can sit underneath.

use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::query::{Filter, Query};
use crate::value::{RecordId, Row, Value};

/// Transaction state of a session.
///
/// Transitions: `None -> Active` on begin, `Active -> Committed` on
/// commit, `Active -> RolledBack` on rollback. Terminal states are never
/// reused; each unit of work gets a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    /// No transaction has been started.
    #[default]
    None,
    /// A transaction is in progress.
    Active,
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
}

impl TxState {
    /// Returns `true` while a transaction is in progress.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, TxState::Active)
    }

    /// Validates and performs the begin transition.
    pub fn begin(&mut self) -> EngineResult<()> {
        match self {
            TxState::None => {
                *self = TxState::Active;
                Ok(())
            }
            other => Err(EngineError::invalid_transition(format!(
                "begin from {other}"
            ))),
        }
    }

    /// Validates and performs the commit transition.
    pub fn commit(&mut self) -> EngineResult<()> {
        match self {
            TxState::Active => {
                *self = TxState::Committed;
                Ok(())
            }
            other => Err(EngineError::invalid_transition(format!(
                "commit from {other}"
            ))),
        }
    }

    /// Validates and performs the rollback transition.
    pub fn rollback(&mut self) -> EngineResult<()> {
        match self {
            TxState::Active => {
                *self = TxState::RolledBack;
                Ok(())
            }
            other => Err(EngineError::invalid_transition(format!(
                "rollback from {other}"
            ))),
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::None => "none",
            TxState::Active => "active",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled-back",
        };
        write!(f, "{name}")
    }
}

/// A persistence engine: builds sessions over its connection resources.
///
/// The engine is the one piece of shared process-wide state; it must be
/// safe to share across threads. Sessions are not.
pub trait Engine: Send + Sync {
    /// Opens a new session for one unit of work.
    fn open_session(&self) -> EngineResult<Box<dyn Session>>;

    /// Returns the entity names registered with this engine.
    fn entities(&self) -> Vec<String>;
}

/// A session bound to one unit of work.
///
/// Sessions are affine to the logical unit of work that opened them and
/// must not be shared across threads. Writes become visible to other
/// sessions only at commit; rollback discards them entirely.
pub trait Session {
    /// Begins a transaction.
    fn begin(&mut self) -> EngineResult<()>;

    /// Commits the active transaction.
    fn commit(&mut self) -> EngineResult<()>;

    /// Rolls back the active transaction.
    fn rollback(&mut self) -> EngineResult<()>;

    /// Returns the current transaction state.
    fn state(&self) -> TxState;

    /// Inserts a new row, assigning and returning its identifier.
    fn insert(&mut self, entity: &str, row: Row) -> EngineResult<RecordId>;

    /// Updates an existing row. Missing rows are an error.
    fn update(&mut self, entity: &str, id: RecordId, row: Row) -> EngineResult<()>;

    /// Inserts or updates a row under the given identifier.
    fn upsert(&mut self, entity: &str, id: RecordId, row: Row) -> EngineResult<()>;

    /// Merges a detached row: insert when `id` is absent or unknown,
    /// overwrite otherwise. Returns the identifier and the stored copy.
    fn merge(
        &mut self,
        entity: &str,
        id: Option<RecordId>,
        row: Row,
    ) -> EngineResult<(RecordId, Row)>;

    /// Deletes a row. Missing rows are an error.
    fn delete(&mut self, entity: &str, id: RecordId) -> EngineResult<()>;

    /// Assigns the given fields on one row, scoped to its identifier.
    ///
    /// Returns the number of rows touched (0 when the row is missing).
    fn update_fields(
        &mut self,
        entity: &str,
        id: RecordId,
        sets: &[(String, Value)],
    ) -> EngineResult<u64>;

    /// Fetches a row by identifier, seeing this session's pending writes.
    fn fetch(&mut self, entity: &str, id: RecordId) -> EngineResult<Option<Row>>;

    /// Runs a query, binding `params` positionally.
    ///
    /// The storage identifier is visible to the query's filter and sort
    /// keys as the [`crate::query::ID_FIELD`] column.
    fn select(&mut self, query: &Query, params: &[Value]) -> EngineResult<Vec<(RecordId, Row)>>;

    /// Counts rows matching the filter (all rows when `None`).
    fn count(
        &mut self,
        entity: &str,
        filter: Option<&Filter>,
        params: &[Value],
    ) -> EngineResult<u64>;
}
