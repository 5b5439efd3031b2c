//! Error types for the agave sender.

use common::ContextError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgaveError {
    #[error("missing required option '{0}'")]
    Missing(&'static str),

    #[error(transparent)]
    Cancelled(#[from] ContextError),

    /// Every host rejected every subgroup
    #[error("failed to send {failed}/{total} points: {}", .errors.join("; "))]
    TotalFailure {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },
}
