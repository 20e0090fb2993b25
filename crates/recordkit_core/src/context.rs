//! Persistence context: settings plus the engine factory.
//!
//! The context replaces hidden global state: the caller constructs one,
//! owns it, and passes it down. The engine is built lazily on first use;
//! construction is serialized so concurrent first callers cannot race to
//! build two engines, and fails fast on misconfiguration — a layer that
//! cannot reach its engine has nothing to fall back on.

use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use recordkit_engine::{Engine, MemoryEngine, Session};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::settings::{parse_properties, Settings};

/// Settings key holding the path to the engine properties file.
pub const ENGINE_PATH_KEY: &str = "engine.path";

/// Engine-properties key selecting the engine implementation.
pub const ENGINE_KIND_KEY: &str = "engine.kind";

/// An explicitly owned persistence context.
///
/// Holds the settings store and the (lazily built) engine. Sharable
/// across threads behind an `Arc`; the engine slot is the only mutable
/// state and is lock-guarded.
pub struct Context {
    settings: Settings,
    engine: Mutex<Option<Arc<dyn Engine>>>,
}

impl Context {
    /// Creates a context over the given settings.
    ///
    /// The engine is not built yet; the first [`Context::engine`] call
    /// builds it from the settings.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            engine: Mutex::new(None),
        }
    }

    /// Creates a context with a pre-built engine.
    ///
    /// Useful for tests and for engines this crate does not know how to
    /// construct.
    #[must_use]
    pub fn with_engine(settings: Settings, engine: Arc<dyn Engine>) -> Self {
        Self {
            settings,
            engine: Mutex::new(Some(engine)),
        }
    }

    /// Returns the settings store.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the engine, building it on first call.
    ///
    /// Construction is serialized by the slot lock; later callers get the
    /// cached engine. Misconfiguration (missing `engine.path`, unreadable
    /// properties, unknown kind, empty entity list) is a fatal
    /// [`CoreError::Config`] — not retried, not recovered.
    pub fn engine(&self) -> CoreResult<Arc<dyn Engine>> {
        let mut slot = self.engine.lock();
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let engine = self.build_engine()?;
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Opens a fresh session for one unit of work.
    pub fn session(&self) -> CoreResult<Box<dyn Session>> {
        Ok(self.engine()?.open_session()?)
    }

    fn build_engine(&self) -> CoreResult<Arc<dyn Engine>> {
        let path = self.settings.get(ENGINE_PATH_KEY).ok_or_else(|| {
            CoreError::config(format!("setting {ENGINE_PATH_KEY} is not defined"))
        })?;
        let text = fs::read_to_string(&path).map_err(|err| {
            CoreError::config(format!("cannot read engine properties {path}: {err}"))
        })?;
        let properties = parse_properties(&text);
        let kind = properties
            .get(ENGINE_KIND_KEY)
            .map(String::as_str)
            .unwrap_or("memory");
        info!(path, kind, "building persistence engine");
        match kind {
            "memory" => {
                let engine = MemoryEngine::from_properties(&properties)?;
                info!(entities = ?engine.entities(), "engine ready");
                Ok(Arc::new(engine))
            }
            other => Err(CoreError::config(format!(
                "unknown {ENGINE_KIND_KEY} {other:?}"
            ))),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings.len())
            .field("engine_built", &self.engine.lock().is_some())
            .finish()
    }
}
