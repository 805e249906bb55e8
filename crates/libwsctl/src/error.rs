use thiserror::Error;

use crate::backend::BackendError;

pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Unreadable or corrupt metadata is reported to callers as an unknown task.
    pub(crate) fn persistence_as_not_found(self, task_id: &str) -> Self {
        match self {
            TaskError::Persistence(_) => TaskError::NotFound(task_id.to_string()),
            other => other,
        }
    }
}

impl From<BackendError> for TaskError {
    fn from(err: BackendError) -> Self {
        TaskError::BackendUnavailable(err.to_string())
    }
}
