//! Plugin bridge: runs a user script over aggregation results.
//!
//! A plugin is a script file `<plugins_dir>/<name>.<ext>` defining a global
//! `run` function. Every invocation gets a fresh interpreter from a
//! [`ScriptEngine`]; nothing survives between tasks. The pipeline is:
//!
//! ```text
//! load_script ─► prepare_environment ─► run ─► events::decode
//!   (fresh        (payload, checkName,    (call    (validate into
//!    state)        variables, config...)   `run`)    Vec<Event>)
//! ```
//!
//! Everything here is synchronous; callers on the async runtime go through
//! [`evaluate_blocking`].

pub mod events;
pub mod lua;
pub mod marshal;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use common::{AggregationResult, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{JugglerError, ScriptError};

pub use events::{Event, Level};
pub use lua::LuaEngine;

/// Name of the function every plugin must define.
pub const ENTRY_POINT: &str = "run";

/// Value crossing the boundary between Rust and a script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Table(ScriptTable),
}

/// Script table split into its sequence part and its named fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptTable {
    /// Values at keys `1..=n`
    pub seq: Vec<ScriptValue>,
    /// Every other key, stringified
    pub fields: BTreeMap<String, ScriptValue>,
}

impl ScriptTable {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.fields.get(key)
    }

    /// Entries as `(key, value)` pairs, sequence first.
    pub fn entries(&self) -> impl Iterator<Item = (String, &ScriptValue)> {
        self.seq
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), v))
            .chain(self.fields.iter().map(|(k, v)| (k.clone(), v)))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ScriptValue>) {
        self.fields.insert(key.into(), value.into());
    }
}

impl ScriptValue {
    #[must_use]
    pub fn as_table(&self) -> Option<&ScriptTable> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Textual form of a scalar the way the interpreter prints it.
    ///
    /// Nil and tables have no text form and yield `None`.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Nil | Self::Table(_) => None,
        }
    }

    /// Convert back into the tagged value model.
    ///
    /// Tables without named fields become sequences; mixed tables become
    /// maps with the sequence part keyed by position. Nils are dropped.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Nil => None,
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Number(n) => Some(Value::Float(*n)),
            Self::String(s) => Some(Value::Str(s.clone())),
            Self::Table(table) if table.fields.is_empty() => Some(Value::Seq(
                table.seq.iter().filter_map(Self::to_value).collect(),
            )),
            Self::Table(table) => Some(Value::Map(
                table
                    .entries()
                    .filter_map(|(k, v)| v.to_value().map(|v| (k, v)))
                    .collect(),
            )),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<ScriptTable> for ScriptValue {
    fn from(table: ScriptTable) -> Self {
        Self::Table(table)
    }
}

/// Factory of isolated interpreter instances.
pub trait ScriptEngine: Send + Sync {
    /// File extension of plugin sources, without the dot.
    fn extension(&self) -> &'static str;

    /// Compile and evaluate `source` in a brand new interpreter.
    fn load(&self, name: &str, source: &str) -> Result<Box<dyn ScriptHandle>, ScriptError>;
}

/// A loaded plugin. Dropping the handle closes the interpreter.
pub trait ScriptHandle {
    fn set_global(&mut self, name: &str, value: &ScriptValue) -> Result<(), ScriptError>;

    /// Call a global function with no arguments and return its first result.
    fn call(&mut self, function: &str) -> Result<ScriptValue, ScriptError>;
}

/// Read `<dir>/<name>.<ext>` and load it into a fresh interpreter.
pub fn load_script(
    engine: &dyn ScriptEngine,
    dir: &Path,
    name: &str,
) -> Result<Box<dyn ScriptHandle>, ScriptError> {
    let path = dir.join(format!("{name}.{}", engine.extension()));
    let source = std::fs::read_to_string(&path).map_err(|_| ScriptError::NotFound {
        path: path.display().to_string(),
    })?;
    debug!(plugin = %name, path = %path.display(), "Loading plugin");
    engine.load(name, &source)
}

/// Inject task data and configuration as plugin globals.
pub fn prepare_environment(
    handle: &mut dyn ScriptHandle,
    config: &Config,
    data: &[&AggregationResult],
) -> Result<(), ScriptError> {
    handle.set_global("payload", &marshal::payload(data)?)?;
    handle.set_global("checkName", &config.check_name.as_str().into())?;
    handle.set_global("checkDescription", &config.description.as_str().into())?;
    handle.set_global("variables", &marshal::string_map(&config.variables))?;
    handle.set_global("conditions", &marshal::conditions(&config.conditions()))?;
    handle.set_global("config", &marshal::plugin_config(&config.config)?)?;
    Ok(())
}

/// Call the plugin entry point.
///
/// Runtime faults are reported against the entry point; conversion errors
/// are returned as they are.
pub fn run(handle: &mut dyn ScriptHandle) -> Result<ScriptValue, ScriptError> {
    handle.call(ENTRY_POINT).map_err(|e| match e {
        ScriptError::Execution(msg) => ScriptError::Execution(format!(
            "Expected '{ENTRY_POINT}' function inside plugin: {msg}"
        )),
        other => other,
    })
}

/// Load, prepare and run the task's plugin, then decode its events.
pub fn evaluate(
    engine: &dyn ScriptEngine,
    config: &Config,
    data: &[AggregationResult],
) -> Result<Vec<Event>, ScriptError> {
    let mut handle = load_script(engine, config.plugins_dir(), &config.plugin)?;
    prepare_environment(handle.as_mut(), config, &config.select(data))?;
    let result = run(handle.as_mut())?;
    let events = events::decode(&result)?;
    info!(plugin = %config.plugin, events = events.len(), "Plugin produced events");
    Ok(events)
}

/// [`evaluate`] on the blocking pool, so no interpreter state crosses an await.
pub async fn evaluate_blocking(
    engine: Arc<dyn ScriptEngine>,
    config: Arc<Config>,
    data: Arc<[AggregationResult]>,
) -> Result<Vec<Event>, JugglerError> {
    let events =
        tokio::task::spawn_blocking(move || evaluate(engine.as_ref(), &config, &data)).await??;
    Ok(events)
}
