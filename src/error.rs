use std::time::Duration;
use thiserror::Error;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("execution record {0} already exists")]
    KeyCollision(String),

    #[error("invalid group id: {0}")]
    InvalidGroup(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outcome of a throttled execution that did not end in a recorded success.
///
/// `Query` and `LimitExceeded` mean the action did not run. `Action` carries
/// the action's own error verbatim. `Save` means the action ran but the
/// execution was not recorded, so the window may under-count it.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error("error querying the storage: {0}")]
    Query(#[source] StorageError),

    #[error("too many actions executed")]
    LimitExceeded,

    #[error(transparent)]
    Action(E),

    #[error("error while storing successful execution: {0}")]
    Save(#[source] StorageError),
}

impl<E> ExecuteError<E> {
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, ExecuteError::LimitExceeded)
    }

    /// Whether the action was invoked before this error was produced.
    pub fn action_ran(&self) -> bool {
        matches!(self, ExecuteError::Action(_) | ExecuteError::Save(_))
    }

    pub fn into_action_error(self) -> Option<E> {
        match self {
            ExecuteError::Action(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid throttler configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("failed to parse throttler configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
