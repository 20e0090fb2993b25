//! # recordkit engine seam
//!
//! Abstract persistence-engine contract for recordkit, plus an in-memory
//! reference engine.
//!
//! This crate provides:
//! - The dynamically typed [`Value`]/[`Row`] model records are stored as
//! - A parameterized query AST ([`Query`], [`Filter`]) with row evaluation
//! - The [`Engine`]/[`Session`] traits and the [`TxState`] state machine
//! - [`MemoryEngine`], a buffering apply-on-commit engine for tests and
//!   ephemeral data
//!
//! The convenience layer in `recordkit_core` sits on top of these traits
//! and never depends on a concrete engine.

pub mod error;
pub mod memory;
pub mod query;
pub mod session;
pub mod value;

pub use error::{EngineError, EngineResult};
pub use memory::{MemoryEngine, ENTITIES_KEY};
pub use query::{CmpOp, Filter, Order, Query, ID_FIELD};
pub use session::{Engine, Session, TxState};
pub use value::{RecordId, Row, Value};
