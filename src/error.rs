use thiserror::Error;

use crate::backend::types::BackendError;
use crate::collaborators::types::CollaboratorError;
use crate::exchanger::types::ExchangeError;

/// Terminal error reported by a lifecycle step, a sequence or the task handler.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("sequence cancelled")]
    Cancelled,

    #[error("sequence already performed")]
    AlreadyPerformed,

    #[error("no container available for task {0}")]
    MissingContainer(String),

    #[error("action {action} failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("task run aborted: {0}")]
    Aborted(String),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

impl ExecutorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
