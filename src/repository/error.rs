use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Repository operation cancelled")]
    Cancelled,
    #[error("Repository lock was not issued by this coordinator")]
    LockNotHeld,
    #[error("Git {operation} failed: {details}")]
    Operation {
        operation: &'static str,
        details: String,
    },
    #[error("Push of {sha} to {remote}/{branch} rejected: {reason}")]
    PushRejected {
        remote: String,
        branch: String,
        sha: String,
        reason: String,
    },
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Repository task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RepositoryError {
    pub(crate) fn operation(operation: &'static str, details: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            details: details.into(),
        }
    }

    /// Map a libgit2 failure, reporting aborts caused by `cancel` as cancellation
    pub(crate) fn from_git(
        operation: &'static str,
        err: git2::Error,
        cancel: &CancellationToken,
    ) -> Self {
        if cancel.is_cancelled() {
            Self::Cancelled
        } else {
            Self::operation(operation, err.message())
        }
    }
}
