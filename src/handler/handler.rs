use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::types::TaskHandler;
use crate::backend::types::BackendClient;
use crate::collaborators::types::{CapacityRegistry, TaskStore};
use crate::config::types::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::exchanger::types::Exchanger;
use crate::log_streamer::types::LogSink;
use crate::sequence::types::{LazySequence, Sequence, Step};
use crate::steps::types::*;
use crate::tasks::types::Task;

impl TaskHandler {
    pub fn new(
        config: &ExecutorConfig,
        client: Arc<dyn BackendClient>,
        registry: Arc<dyn CapacityRegistry>,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        TaskHandler {
            client,
            registry,
            store,
            exchanger: Exchanger::from_config(config),
            transformer: TaskTransformer::new(sink),
            executor_id: config.executor_id.clone(),
            container_inode_limit: config.container_inode_limit,
        }
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    pub fn registry(&self) -> Arc<dyn CapacityRegistry> {
        self.registry.clone()
    }

    /// Runs `task` to completion in the background and waits for it.
    ///
    /// A message on `cancel` cancels the run; the call still returns only once
    /// the running step has unwound.
    ///
    /// Only an explicit send cancels. Dropping or closing the sender without
    /// sending leaves the run alone, so callers that signal by closing the
    /// channel must call `send(())` instead.
    pub async fn run_task(&self, task: Task, cancel: oneshot::Receiver<()>) -> Result<()> {
        let guid = task.guid.clone();
        let context = TaskContext::shared(task);
        let sequence = Arc::new(self.sequence_for(&context));

        let (done_tx, mut done) = oneshot::channel();
        let runner = sequence.clone();
        tokio::spawn(async move {
            let _ = done_tx.send(runner.perform().await);
        });
        debug!(guid = %guid, "task sequence started");

        let mut trigger = Some(cancel);
        loop {
            tokio::select! {
                finished = &mut done => {
                    let result = finished
                        .unwrap_or_else(|_| Err(ExecutorError::Aborted(guid.clone())));
                    match &result {
                        Ok(()) => info!(guid = %guid, "task finished"),
                        Err(err) => warn!(guid = %guid, error = %err, "task did not finish"),
                    }
                    return result;
                }
                requested = cancel_requested(&mut trigger), if trigger.is_some() => {
                    trigger = None;
                    if requested {
                        info!(guid = %guid, "cancelling task");
                        sequence.cancel();
                    }
                }
            }
        }
    }

    fn sequence_for(&self, context: &SharedContext) -> Sequence {
        let transformer = self.transformer.clone();
        let shared = context.clone();
        let body = LazySequence::new(context.clone(), move |current: &TaskContext| {
            transformer.steps_for(current, &shared)
        });

        Sequence::new(vec![
            Box::new(RegisterStep::new(context.clone(), self.registry.clone())),
            Box::new(ClaimStep::new(context.clone(), self.store.clone(), &self.executor_id)),
            Box::new(CreateContainerStep::new(
                context.clone(),
                self.client.clone(),
                self.exchanger.clone(),
            )),
            Box::new(LimitContainerStep::new(context.clone(), self.container_inode_limit)),
            Box::new(StartStep::new(context.clone(), self.store.clone(), &self.executor_id)),
            Box::new(ExecuteStep::new(context.clone(), Box::new(body), self.store.clone())),
        ])
    }
}

/// Resolves once the trigger fires (true) or its sender goes away (false).
async fn cancel_requested(trigger: &mut Option<oneshot::Receiver<()>>) -> bool {
    match trigger {
        Some(receiver) => receiver.await.is_ok(),
        None => std::future::pending().await,
    }
}
