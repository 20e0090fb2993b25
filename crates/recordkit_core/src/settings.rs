//! Settings store with ordered source fallthrough.
//!
//! Settings come from the first non-empty candidate source: an explicit
//! override path, a properties file beside the running executable, the same
//! file in the process working directory, and finally defaults embedded in
//! the binary. A source that cannot be read or parses to nothing is skipped
//! without error; when every source is exhausted the store is empty and
//! every lookup returns its default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Environment variable naming an override settings path.
pub const SETTINGS_ENV: &str = "RECORDKIT_SETTINGS";

/// Default settings file name.
pub const SETTINGS_FILE: &str = "recordkit.properties";

/// Parses `key=value` properties text.
///
/// Blank lines and lines starting with `#` or `!` are ignored, as are
/// lines without a separator. Keys and values are trimmed.
#[must_use]
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                map.insert(key.to_owned(), value.trim().to_owned());
            }
        }
    }
    map
}

/// One candidate settings source.
#[derive(Debug, Clone)]
enum Source {
    /// Explicit path override supplied at construction.
    Path(PathBuf),
    /// Path named by an environment variable.
    EnvPath(String),
    /// File colocated with the running executable.
    ExeDir(String),
    /// File in the process working directory.
    WorkDir(String),
    /// Defaults embedded in the binary.
    Embedded(&'static str),
}

impl Source {
    /// Attempts to read and parse this source.
    fn read(&self) -> Option<BTreeMap<String, String>> {
        match self {
            Source::Path(path) => read_file(path),
            Source::EnvPath(var) => {
                let path = std::env::var_os(var)?;
                read_file(Path::new(&path))
            }
            Source::ExeDir(name) => {
                let exe = std::env::current_exe().ok()?;
                read_file(&exe.parent()?.join(name))
            }
            Source::WorkDir(name) => read_file(Path::new(name)),
            Source::Embedded(text) => Some(parse_properties(text)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Source::Path(path) => format!("path {}", path.display()),
            Source::EnvPath(var) => format!("env {var}"),
            Source::ExeDir(name) => format!("executable dir {name}"),
            Source::WorkDir(name) => format!("working dir {name}"),
            Source::Embedded(_) => "embedded defaults".to_owned(),
        }
    }
}

fn read_file(path: &Path) -> Option<BTreeMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(text) => Some(parse_properties(&text)),
        Err(err) => {
            debug!(path = %path.display(), %err, "settings source unreadable");
            None
        }
    }
}

/// Process-wide key/value settings store.
///
/// Lookups never fail: unknown keys return the caller's default or `None`.
/// [`Settings::reload`] rebuilds the store from the sources and swaps it in
/// one step, so concurrent readers never observe a partial overwrite.
#[derive(Debug)]
pub struct Settings {
    sources: Vec<Source>,
    values: RwLock<BTreeMap<String, String>>,
}

impl Settings {
    /// Loads settings from the default source chain.
    #[must_use]
    pub fn load() -> Self {
        Self::builder().load()
    }

    /// Returns a builder for customizing the source chain.
    #[must_use]
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Creates a sourceless store from fixed values (tests, embedding).
    ///
    /// `reload` on such a store empties it.
    #[must_use]
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            sources: Vec::new(),
            values: RwLock::new(values),
        }
    }

    /// Returns the value for `key`, if any source defined it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Returns the value for `key`, or `default` when absent.
    #[must_use]
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    /// Returns the value for `key` as an integer.
    ///
    /// A stored value that does not parse falls back to `default` with a
    /// warning; this never errors.
    #[must_use]
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(text) => match text.parse::<i64>() {
                Ok(value) => value,
                Err(err) => {
                    warn!(key, value = %text, %err, "non-numeric setting, using default");
                    default
                }
            },
            None => default,
        }
    }

    /// Returns the number of loaded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns `true` when no source defined anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Re-reads the sources and replaces the store.
    ///
    /// The first source that yields a non-empty map wins and loading
    /// stops. The new map is built completely before the swap.
    pub fn reload(&self) {
        let mut fresh = BTreeMap::new();
        for source in &self.sources {
            match source.read() {
                Some(map) if !map.is_empty() => {
                    info!(source = %source.describe(), entries = map.len(), "settings loaded");
                    fresh = map;
                    break;
                }
                Some(_) => debug!(source = %source.describe(), "settings source empty"),
                None => debug!(source = %source.describe(), "settings source unavailable"),
            }
        }
        if fresh.is_empty() {
            warn!("no settings source available, store is empty");
        }
        *self.values.write() = fresh;
    }
}

/// Builder for [`Settings`].
#[derive(Debug)]
pub struct SettingsBuilder {
    override_path: Option<PathBuf>,
    env_var: String,
    file_name: String,
    embedded: Option<&'static str>,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            override_path: None,
            env_var: SETTINGS_ENV.to_owned(),
            file_name: SETTINGS_FILE.to_owned(),
            embedded: None,
        }
    }
}

impl SettingsBuilder {
    /// Sets an explicit settings path tried before every other source.
    #[must_use]
    pub fn override_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    /// Changes the override environment variable name.
    #[must_use]
    pub fn env_var(mut self, var: impl Into<String>) -> Self {
        self.env_var = var.into();
        self
    }

    /// Changes the settings file name looked up in the executable and
    /// working directories.
    #[must_use]
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Supplies embedded default properties, tried last.
    #[must_use]
    pub fn embedded(mut self, text: &'static str) -> Self {
        self.embedded = Some(text);
        self
    }

    /// Builds the store and performs the initial load.
    #[must_use]
    pub fn load(self) -> Settings {
        let mut sources = Vec::new();
        if let Some(path) = self.override_path {
            sources.push(Source::Path(path));
        }
        sources.push(Source::EnvPath(self.env_var));
        sources.push(Source::ExeDir(self.file_name.clone()));
        sources.push(Source::WorkDir(self.file_name));
        if let Some(text) = self.embedded {
            sources.push(Source::Embedded(text));
        }
        let settings = Settings {
            sources,
            values: RwLock::new(BTreeMap::new()),
        };
        settings.reload();
        settings
    }
}
