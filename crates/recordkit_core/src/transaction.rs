//! The transactional boundary.
//!
//! [`Context::transaction`] is the sole place where begin, commit and
//! rollback happen. Work runs against a [`Unit`] owning one fresh session;
//! success commits exactly once, failure rolls back exactly once and the
//! error is returned as-is — never converted into an absent result, so
//! "operation failed" and "operation found nothing" stay distinguishable.
//! No nested transactions or savepoints are modeled.

use recordkit_engine::{Session, TxState};
use tracing::{debug, error};

use crate::context::Context;
use crate::error::CoreResult;

/// One unit of work: an owned session with an active transaction.
///
/// Units are affine to the logical unit of work that opened them; they
/// are handed to the work closure by value reference and never shared
/// across threads.
pub struct Unit {
    session: Box<dyn Session>,
}

impl Unit {
    /// Returns the transaction state of the underlying session.
    #[must_use]
    pub fn state(&self) -> TxState {
        self.session.state()
    }

    /// Returns the underlying engine session.
    ///
    /// For engine operations the repository layer does not cover.
    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit").field("state", &self.state()).finish()
    }
}

impl Context {
    /// Runs `work` inside a transaction.
    ///
    /// Opens a session, begins a transaction if the session does not
    /// already carry one, and executes the work. On success the
    /// transaction commits and the work's result is returned; on any
    /// failure (from the work or from the commit itself) the transaction
    /// rolls back, the error is logged, and it propagates to the caller.
    ///
    /// A failed unit leaves no partial writes behind, so re-invoking the
    /// same work afterwards is safe and independent.
    pub fn transaction<R, F>(&self, work: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Unit) -> CoreResult<R>,
    {
        let mut session = self.session()?;
        if !session.state().is_active() {
            session.begin()?;
        }
        let mut unit = Unit { session };
        match work(&mut unit) {
            Ok(result) => match unit.session.commit() {
                Ok(()) => {
                    debug!("unit of work committed");
                    Ok(result)
                }
                Err(err) => {
                    error!(%err, "commit failed, rolling back");
                    if let Err(rollback_err) = unit.session.rollback() {
                        error!(%rollback_err, "rollback after failed commit also failed");
                    }
                    Err(err.into())
                }
            },
            Err(err) => {
                error!(%err, "unit of work failed, rolling back");
                if let Err(rollback_err) = unit.session.rollback() {
                    error!(%rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
