//! Error types for autopress.
//!
//! Library crates use [`AutopressError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all autopress operations.
#[derive(Debug, thiserror::Error)]
pub enum AutopressError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The backing store could not be reached or opened.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A query or row decode failed inside the store.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record addressed by id does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An article was asked to move along an edge its lifecycle does not have.
    #[error("invalid transition for article {article_id}: {message}")]
    InvalidTransition { article_id: String, message: String },

    /// A job was triggered while a previous execution still holds its flag.
    #[error("job {job_id} is already running")]
    AlreadyRunning { job_id: String },

    /// A collaborator failed in a way that may succeed on a later try.
    #[error("transient collaborator error ({kind}): {message}")]
    TransientCollaborator { kind: String, message: String },

    /// A collaborator failed in a way retrying cannot fix.
    #[error("permanent collaborator error ({kind}): {message}")]
    PermanentCollaborator { kind: String, message: String },

    /// A compensating delete after a partial publish did not succeed.
    #[error("rollback incomplete for article {article_id}: {message}")]
    RollbackIncomplete { article_id: String, message: String },

    /// Network/HTTP error in a connector.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad schedule, malformed payload, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AutopressError>;

impl AutopressError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given entity type and id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create an invalid-transition error for an article.
    pub fn invalid_transition(article_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTransition {
            article_id: article_id.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the failure came from the store itself. A run that hits one
    /// of these stops instead of carrying on with the next unit.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Storage(_))
    }

    /// True for failures a later retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientCollaborator { .. } | Self::Network(_) | Self::StoreUnavailable(_)
        )
    }
}
