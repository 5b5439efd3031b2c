//! Error types shared by all senders.

use std::fmt;

use thiserror::Error;

/// Why a [`crate::CallContext`] stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly
    #[error("context canceled")]
    Canceled,

    /// The context deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A single host-level failure inside a multi-host request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    /// Host the request was sent to
    pub host: String,
    /// Transport error or rejected status with body
    pub reason: String,
}

impl HostError {
    #[must_use]
    pub fn new(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.reason)
    }
}

/// Errors returned by [`crate::MultiHostClient`].
///
/// Cloneable so that one failed fetch can be handed to every caller
/// waiting on the same cache entry.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The caller's context expired; remaining hosts were not tried
    #[error(transparent)]
    Cancelled(#[from] ContextError),

    /// Every host rejected the request or could not be reached
    #[error("all hosts failed: [{}]", join_host_errors(.0))]
    AllHostsFailed(Vec<HostError>),

    /// The host list was empty
    #[error("no hosts to send request to")]
    NoHosts,

    /// The request body could not be encoded
    #[error("failed to encode request body: {0}")]
    Encode(String),
}

impl HttpError {
    /// Whether this error came from the caller's context rather than the remote side.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Context error carried by this error, if any.
    #[must_use]
    pub const fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Cancelled(err) => Some(*err),
            _ => None,
        }
    }
}

fn join_host_errors(errors: &[HostError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors about malformed aggregation result tags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A required tag is absent
    #[error("missing tag '{tag}' in {tags}")]
    MissingTag { tag: &'static str, tags: String },
}
