//! Error types for the engine seam.

use thiserror::Error;

use crate::value::RecordId;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur inside a persistence engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The named entity is not registered with the engine.
    #[error("unknown entity: {entity}")]
    UnknownEntity {
        /// The entity name that was requested.
        entity: String,
    },

    /// No row exists for the given identifier.
    #[error("row not found: {entity} id {id}")]
    RowNotFound {
        /// The entity that was searched.
        entity: String,
        /// The identifier that was not found.
        id: RecordId,
    },

    /// Invalid transaction state transition.
    #[error("invalid transaction transition: {message}")]
    InvalidTransition {
        /// Description of the rejected transition.
        message: String,
    },

    /// A filter referenced a positional parameter that was not supplied.
    #[error("unbound parameter ?{index}: only {supplied} supplied")]
    UnboundParameter {
        /// Zero-based parameter index.
        index: usize,
        /// Number of parameters actually supplied.
        supplied: usize,
    },

    /// A filter compared values of incompatible types.
    #[error("type mismatch filtering on {field}: {stored} vs {param}")]
    FilterTypeMismatch {
        /// The field being compared.
        field: String,
        /// Variant name of the stored value.
        stored: &'static str,
        /// Variant name of the parameter value.
        param: &'static str,
    },

    /// Engine construction failed due to bad properties.
    #[error("invalid engine properties: {message}")]
    InvalidProperties {
        /// Description of the problem.
        message: String,
    },
}

impl EngineError {
    /// Creates an unknown entity error.
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity {
            entity: entity.into(),
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(entity: impl Into<String>, id: RecordId) -> Self {
        Self::RowNotFound {
            entity: entity.into(),
            id,
        }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    /// Creates an invalid properties error.
    pub fn invalid_properties(message: impl Into<String>) -> Self {
        Self::InvalidProperties {
            message: message.into(),
        }
    }
}
