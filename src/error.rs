//! Error types for canvas-runtime.
//!
//! Every failure is scoped to a single workspace. Nothing here is
//! process-fatal; callers decide whether to surface or retry.

use std::sync::Arc;

use thiserror::Error;

use crate::model::{Lifecycle, Version, WorkspaceId};

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed geometry or payload, rejected before it reaches a ledger.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("version conflict on workspace {id}: expected {expected}, store has {actual}")]
    VersionConflict {
        id: WorkspaceId,
        expected: Version,
        actual: Version,
    },

    /// Store unreachable or the request did not complete.
    #[error("store unreachable: {0}")]
    Transport(String),

    #[error("workspace not found: {0}")]
    NotFound(String),

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },

    #[error("workspace {0} is not hot")]
    NotHot(WorkspaceId),

    #[error("workspace {0} holds protected background operations")]
    Protected(WorkspaceId),

    #[error("default workspace {0} cannot be deleted")]
    DefaultWorkspace(WorkspaceId),

    /// A shared hydration failed. Every caller waiting on it sees the same cause.
    #[error("hydration of workspace {id} failed: {source}")]
    Hydration {
        id: WorkspaceId,
        #[source]
        source: Arc<Error>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Error::Hydration { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Database(sqlx::Error::RowNotFound) => true,
            Error::Hydration { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hydration_error_inherits_retryability() {
        let id = WorkspaceId::new();
        let err = Error::Hydration {
            id,
            source: Arc::new(Error::Transport("connection reset".into())),
        };
        assert!(err.is_retryable());
        assert!(!err.is_not_found());

        let gone = Error::Hydration {
            id,
            source: Arc::new(Error::NotFound(id.to_string())),
        };
        assert!(!gone.is_retryable());
        assert!(gone.is_not_found());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!Error::Validation("x is NaN".into()).is_retryable());
    }
}
