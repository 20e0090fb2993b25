//! High-level persistence layer over a pluggable row engine.
//!
//! The crate wires four pieces together:
//!
//! - [`Settings`] loads layered `key = value` properties from an explicit
//!   path, an environment variable, the executable directory, or the
//!   working directory, first non-empty source wins.
//! - [`Context`] owns the settings and lazily builds the engine from them,
//!   handing out sessions on demand.
//! - [`Record`] plus a [`FieldRegistry`] describe a persistent type: its
//!   entity name, its metadata, and typed accessors for every field.
//! - [`Repository`] puts them together into save/update/find operations,
//!   each runnable in its own unit of work or joined into a shared one via
//!   [`Context::transaction`].
//!
//! ```no_run
//! use recordkit_core::{Context, Repository, Settings};
//! # use recordkit_core::{CoreResult, Record, record::Meta, registry::FieldRegistry};
//! # use std::sync::{Arc, OnceLock};
//! # #[derive(Debug, Clone, Default)]
//! # struct Order { meta: Meta, status: String }
//! # impl Record for Order {
//! #     const ENTITY: &'static str = "order";
//! #     fn meta(&self) -> &Meta { &self.meta }
//! #     fn meta_mut(&mut self) -> &mut Meta { &mut self.meta }
//! #     fn registry() -> &'static FieldRegistry<Self> {
//! #         static R: OnceLock<FieldRegistry<Order>> = OnceLock::new();
//! #         R.get_or_init(|| {
//! #             FieldRegistry::builder("order")
//! #                 .field("status", |o: &Order| o.status.clone(), |o, v: String| o.status = v)
//! #                 .build()
//! #         })
//! #     }
//! # }
//! # fn main() -> CoreResult<()> {
//! let ctx = Arc::new(Context::new(Settings::load()));
//! let orders: Repository<Order> = Repository::new(ctx);
//!
//! let mut order = Order::default();
//! order.status = "OPEN".to_owned();
//! let id = orders.save(&mut order)?;
//! let found = orders.by_id(Some(id))?;
//! # let _ = found;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod filter;
pub mod lazy;
pub mod record;
pub mod registry;
pub mod repository;
pub mod settings;
pub mod transaction;

pub use context::{Context, ENGINE_KIND_KEY, ENGINE_PATH_KEY};
pub use error::{CoreError, CoreResult};
pub use filter::FilterError;
pub use lazy::Lazy;
pub use record::{Meta, Record, Timestamp};
pub use registry::{AccessError, FieldRegistry, FieldValue, RESERVED_FIELDS};
pub use repository::Repository;
pub use settings::{Settings, SettingsBuilder, SETTINGS_ENV, SETTINGS_FILE};
pub use transaction::Unit;

pub use recordkit_engine::{RecordId, Row, Value};
