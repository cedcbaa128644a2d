use std::sync::Arc;

use crate::backend::types::BackendClient;
use crate::collaborators::types::{CapacityRegistry, TaskStore};
use crate::exchanger::types::Exchanger;
use crate::steps::types::TaskTransformer;

/// Runs one task at a time through the fixed executor lifecycle:
/// register, claim, create, limit, start, then execute the task body.
///
/// Each call to `run_task` builds a fresh sequence; the handler itself keeps
/// no per-task state and can be shared between concurrent runs.
#[derive(Clone)]
pub struct TaskHandler {
    pub(super) client: Arc<dyn BackendClient>,
    pub(super) registry: Arc<dyn CapacityRegistry>,
    pub(super) store: Arc<dyn TaskStore>,
    pub(super) exchanger: Exchanger,
    pub(super) transformer: TaskTransformer,
    pub(super) executor_id: String,
    pub(super) container_inode_limit: u64,
}
