use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tasks::types::{RunResult, Task};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("insufficient {resource}: requested {requested}, available {available}")]
    InsufficientResources {
        resource: String,
        requested: u64,
        available: u64,
    },

    #[error("task {guid} already claimed by {owner}")]
    AlreadyClaimed { guid: String, owner: String },

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {guid} cannot move from {from} to {to}")]
    InvalidTransition {
        guid: String,
        from: String,
        to: String,
    },

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Reserves executor capacity for tasks.
#[async_trait]
pub trait CapacityRegistry: Send + Sync {
    async fn reserve(&self, task: &Task) -> Result<(), CollaboratorError>;

    async fn release(&self, guid: &str) -> Result<(), CollaboratorError>;
}

/// Shared record of which executor owns a task and how it ended.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn claim(&self, task: &Task, executor_id: &str) -> Result<(), CollaboratorError>;

    async fn start(
        &self,
        task: &Task,
        executor_id: &str,
        container_handle: &str,
    ) -> Result<(), CollaboratorError>;

    async fn complete(&self, task: &Task, result: &RunResult) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRecordState {
    Claimed,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub guid: String,
    pub state: TaskRecordState,
    pub executor_id: String,
    pub container_handle: Option<String>,
    pub result: Option<RunResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub containers: u64,
}
