//! Error types for the juggler sender.

use common::{ContextError, HttpError};
use thiserror::Error;

/// Invalid or unreadable sender configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required option is absent or empty
    #[error("missing required option '{0}'")]
    Missing(&'static str),
}

/// Failures of the plugin pipeline: load, prepare, run and decode.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("plugin not found: {path}")]
    NotFound { path: String },

    /// Source could not be compiled or evaluated
    #[error("failed to load plugin: {0}")]
    Load(String),

    /// Runtime fault raised while running the plugin
    #[error("{0}")]
    Execution(String),

    /// A value could not be handed to the plugin
    #[error("failed to convert value for plugin: {0}")]
    Marshal(String),

    /// One or more plugin results are malformed
    #[error("invalid plugin result: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Top-level errors returned by [`crate::JugglerSender`].
#[derive(Debug, Error)]
pub enum JugglerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Check state for a host could not be fetched
    #[error("failed to get juggler checks for {host}: {source}")]
    Fetch {
        host: String,
        #[source]
        source: HttpError,
    },

    /// Check state response was not valid JSON
    #[error("failed to decode juggler checks for {host}: {source}")]
    Decode {
        host: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Cancelled(#[from] ContextError),

    /// Nothing was delivered
    #[error("failed to send {failed}/{total} events")]
    TotalFailure { failed: usize, total: usize },

    /// The plugin worker thread panicked or was cancelled
    #[error("plugin worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl JugglerError {
    /// Context error behind this failure, if the caller's deadline or cancellation caused it.
    #[must_use]
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Cancelled(err) => Some(*err),
            Self::Fetch { source, .. } => source.context_error(),
            _ => None,
        }
    }
}
