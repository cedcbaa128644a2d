use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::types::*;
use crate::backend::types::{BackendClient, ContainerRef, DiskLimits, MemoryLimits};
use crate::collaborators::types::{CapacityRegistry, TaskStore};
use crate::error::{ExecutorError, Result};
use crate::exchanger::types::{BYTES_PER_MB, Exchanger};
use crate::sequence::types::{BoxedStep, CancelSignal, Step};
use crate::tasks::types::{Container, RunResult, State, Task};

impl TaskContext {
    pub fn new(task: Task) -> Self {
        TaskContext {
            container: Container::for_task(&task),
            task,
            backend_container: None,
        }
    }

    pub fn shared(task: Task) -> SharedContext {
        Arc::new(Mutex::new(Self::new(task)))
    }

    pub fn require_container(&self) -> Result<ContainerRef> {
        self.backend_container
            .clone()
            .ok_or_else(|| ExecutorError::MissingContainer(self.task.guid.clone()))
    }
}

async fn snapshot(context: &SharedContext) -> Task {
    context.lock().await.task.clone()
}

impl RegisterStep {
    pub fn new(context: SharedContext, registry: Arc<dyn CapacityRegistry>) -> Self {
        RegisterStep {
            context,
            registry,
            signal: CancelSignal::new(),
        }
    }
}

#[async_trait]
impl Step for RegisterStep {
    async fn perform(&self) -> Result<()> {
        let task = snapshot(&self.context).await;
        info!(guid = %task.guid, "registering task");

        if let Err(err) = self.signal.guard(self.registry.reserve(&task)).await? {
            error!(guid = %task.guid, error = %err, "failed to register task");
            return Err(err.into());
        }
        Ok(())
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl ClaimStep {
    pub fn new(context: SharedContext, store: Arc<dyn TaskStore>, executor_id: &str) -> Self {
        ClaimStep {
            context,
            store,
            executor_id: executor_id.to_string(),
            signal: CancelSignal::new(),
        }
    }
}

#[async_trait]
impl Step for ClaimStep {
    async fn perform(&self) -> Result<()> {
        let task = snapshot(&self.context).await;
        info!(guid = %task.guid, executor = %self.executor_id, "claiming task");

        if let Err(err) = self
            .signal
            .guard(self.store.claim(&task, &self.executor_id))
            .await?
        {
            error!(guid = %task.guid, error = %err, "failed to claim task");
            return Err(err.into());
        }
        Ok(())
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl CreateContainerStep {
    pub fn new(context: SharedContext, client: Arc<dyn BackendClient>, exchanger: Exchanger) -> Self {
        CreateContainerStep {
            context,
            client,
            exchanger,
            signal: CancelSignal::new(),
        }
    }
}

/// Backend calls are never dropped partway: the handle and container
/// reference reach the context as soon as `create` returns, and a cancel is
/// only honoured once port and limit setup has finished.
#[async_trait]
impl Step for CreateContainerStep {
    async fn perform(&self) -> Result<()> {
        if self.signal.is_fired() {
            return Err(ExecutorError::Cancelled);
        }

        let container = {
            let mut context = self.context.lock().await;
            context.container.advance(State::Initializing);
            context.container.clone()
        };
        info!(guid = %container.guid, "creating container");

        let created = match self.exchanger.create_backend(self.client.as_ref(), &container).await {
            Ok(created) => created,
            Err(err) => {
                error!(guid = %container.guid, error = %err, "failed to create container");
                return Err(err.into());
            }
        };

        let handle = created.handle();
        {
            let mut context = self.context.lock().await;
            context.container.container_handle = handle.clone();
            context.backend_container = Some(created.clone());
        }

        if let Err(err) = self
            .exchanger
            .configure_backend(created.as_ref(), &container)
            .await
        {
            error!(guid = %container.guid, handle = %handle, error = %err, "failed to configure container");
            return Err(err.into());
        }

        self.context.lock().await.container.advance(State::Created);
        info!(guid = %container.guid, handle = %handle, "container created");

        if self.signal.is_fired() {
            warn!(guid = %container.guid, handle = %handle, "cancelled while creating container");
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl LimitContainerStep {
    pub fn new(context: SharedContext, container_inode_limit: u64) -> Self {
        LimitContainerStep {
            context,
            container_inode_limit,
            signal: CancelSignal::new(),
        }
    }

    async fn apply(&self, container: &ContainerRef, memory_mb: u64, disk_mb: u64) -> Result<()> {
        if memory_mb != 0 {
            container
                .limit_memory(MemoryLimits {
                    limit_in_bytes: memory_mb.saturating_mul(BYTES_PER_MB),
                })
                .await?;
        }

        container
            .limit_disk(DiskLimits {
                byte_hard: disk_mb.saturating_mul(BYTES_PER_MB),
                inode_hard: self.container_inode_limit,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Step for LimitContainerStep {
    async fn perform(&self) -> Result<()> {
        let (guid, container, memory_mb, disk_mb) = {
            let context = self.context.lock().await;
            (
                context.task.guid.clone(),
                context.require_container()?,
                context.container.memory_mb,
                context.container.disk_mb,
            )
        };
        info!(guid = %guid, handle = %container.handle(), "limiting container");

        let result = self
            .signal
            .guard(self.apply(&container, memory_mb, disk_mb))
            .await?;
        if let Err(err) = &result {
            error!(guid = %guid, error = %err, "failed to limit container");
        }
        result
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl StartStep {
    pub fn new(context: SharedContext, store: Arc<dyn TaskStore>, executor_id: &str) -> Self {
        StartStep {
            context,
            store,
            executor_id: executor_id.to_string(),
            signal: CancelSignal::new(),
        }
    }
}

#[async_trait]
impl Step for StartStep {
    async fn perform(&self) -> Result<()> {
        let (task, handle) = {
            let context = self.context.lock().await;
            (context.task.clone(), context.container.container_handle.clone())
        };
        info!(guid = %task.guid, handle = %handle, "starting task");

        if let Err(err) = self
            .signal
            .guard(self.store.start(&task, &self.executor_id, &handle))
            .await?
        {
            error!(guid = %task.guid, error = %err, "failed to mark task started");
            return Err(err.into());
        }
        Ok(())
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl ExecuteStep {
    pub fn new(context: SharedContext, body: BoxedStep, store: Arc<dyn TaskStore>) -> Self {
        ExecuteStep {
            context,
            body,
            store,
        }
    }
}

#[async_trait]
impl Step for ExecuteStep {
    async fn perform(&self) -> Result<()> {
        let outcome = self.body.perform().await;

        let (task, result) = {
            let mut context = self.context.lock().await;
            let result = match outcome {
                Ok(()) => RunResult {
                    failed: false,
                    failure_reason: String::new(),
                    result: context.container.run_result.result.clone(),
                },
                Err(ExecutorError::Cancelled) => {
                    warn!(guid = %context.task.guid, "task body cancelled");
                    return Err(ExecutorError::Cancelled);
                }
                Err(err) => {
                    warn!(guid = %context.task.guid, error = %err, "task body failed");
                    RunResult {
                        failed: true,
                        failure_reason: err.to_string(),
                        result: String::new(),
                    }
                }
            };
            context.container.run_result = result.clone();
            context.container.advance(State::Completed);
            (context.task.clone(), result)
        };

        info!(guid = %task.guid, failed = result.failed, "completing task");
        if let Err(err) = self.store.complete(&task, &result).await {
            error!(guid = %task.guid, error = %err, "failed to mark task completed");
            return Err(err.into());
        }
        Ok(())
    }

    fn cancel(&self) {
        self.body.cancel();
    }
}
