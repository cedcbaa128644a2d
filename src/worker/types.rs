use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
};

use crate::handler::types::TaskHandler;

/// Supervises the background runs of submitted tasks, one per guid.
pub struct Worker {
    pub(super) handler: TaskHandler,
    pub(super) runs: Arc<Mutex<HashMap<String, RunningTask>>>,
}

pub(super) struct RunningTask {
    /// Taken on the first cancel.
    pub cancel: Option<oneshot::Sender<()>>,
    pub handle: JoinHandle<()>,
}

pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub address: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("task {0} is already running")]
    AlreadyRunning(String),

    #[error("task {0} is not running")]
    NotRunning(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
