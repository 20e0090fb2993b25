//! Error types for the recordkit core layer.

use std::io;
use thiserror::Error;

use crate::filter::FilterError;
use crate::registry::AccessError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the recordkit core layer.
///
/// Failure is always explicit: an operation that finds nothing returns
/// `Ok(None)` or an empty collection, never an error, and an error is
/// never collapsed into an absent result.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] recordkit_engine::EngineError),

    /// Field access error.
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// Filter or order-by parse error.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fatal startup misconfiguration (engine factory cannot be built).
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The record has no identifier but the operation requires one.
    #[error("{entity} record has no identifier")]
    MissingId {
        /// The entity being operated on.
        entity: &'static str,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
