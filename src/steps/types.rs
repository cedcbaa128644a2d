use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::backend::types::{BackendClient, ContainerRef, ProcessSpec};
use crate::collaborators::types::{CapacityRegistry, TaskStore};
use crate::exchanger::types::Exchanger;
use crate::log_streamer::types::{LogSink, LogStreamer};
use crate::sequence::types::{BoxedStep, CancelSignal};
use crate::tasks::types::{Container, Task};

/// Largest result file a task may hand back, in bytes.
pub const MAX_RESULT_SIZE: usize = 10 * 1024;

/// State threaded through one task's steps; later steps read what earlier ones wrote.
pub struct TaskContext {
    pub task: Task,
    pub container: Container,
    pub backend_container: Option<ContainerRef>,
}

pub type SharedContext = Arc<Mutex<TaskContext>>;

pub struct RegisterStep {
    pub(super) context: SharedContext,
    pub(super) registry: Arc<dyn CapacityRegistry>,
    pub(super) signal: CancelSignal,
}

pub struct ClaimStep {
    pub(super) context: SharedContext,
    pub(super) store: Arc<dyn TaskStore>,
    pub(super) executor_id: String,
    pub(super) signal: CancelSignal,
}

pub struct CreateContainerStep {
    pub(super) context: SharedContext,
    pub(super) client: Arc<dyn BackendClient>,
    pub(super) exchanger: Exchanger,
    pub(super) signal: CancelSignal,
}

pub struct LimitContainerStep {
    pub(super) context: SharedContext,
    pub(super) container_inode_limit: u64,
    pub(super) signal: CancelSignal,
}

pub struct StartStep {
    pub(super) context: SharedContext,
    pub(super) store: Arc<dyn TaskStore>,
    pub(super) executor_id: String,
    pub(super) signal: CancelSignal,
}

/// Runs the task body, then records how it ended in the task store.
pub struct ExecuteStep {
    pub(super) context: SharedContext,
    pub(super) body: BoxedStep,
    pub(super) store: Arc<dyn TaskStore>,
}

pub struct RunStep {
    pub(super) container: ContainerRef,
    pub(super) spec: ProcessSpec,
    pub(super) timeout: Option<Duration>,
    pub(super) streamer: LogStreamer,
    pub(super) signal: CancelSignal,
}

pub struct FetchResultStep {
    pub(super) context: SharedContext,
    pub(super) container: ContainerRef,
    pub(super) file: String,
    pub(super) signal: CancelSignal,
}

/// Swallows the inner step's failure.
pub struct TryStep {
    pub(super) inner: BoxedStep,
}

pub struct EmitProgressStep {
    pub(super) inner: BoxedStep,
    pub(super) streamer: LogStreamer,
    pub(super) start_message: String,
    pub(super) success_message: String,
    pub(super) failure_message: String,
}

/// Turns a task's action graph into steps against its container.
#[derive(Clone)]
pub struct TaskTransformer {
    pub(super) sink: Arc<dyn LogSink>,
}
