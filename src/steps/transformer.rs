use std::{sync::Arc, time::Duration};

use tracing::debug;

use super::types::*;
use crate::backend::types::{ContainerRef, ProcessSpec};
use crate::error::Result;
use crate::log_streamer::types::{LogSink, LogStreamer};
use crate::sequence::types::BoxedStep;
use crate::tasks::types::{Action, EnvironmentVariable};

impl TaskTransformer {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        TaskTransformer { sink }
    }

    /// Steps running every action of the task, in order, inside its container.
    ///
    /// Fails when the container has not been created yet.
    pub fn steps_for(&self, context: &TaskContext, shared: &SharedContext) -> Result<Vec<BoxedStep>> {
        let container = context.require_container()?;
        let log = &context.task.log;
        let streamer = LogStreamer::new(
            &log.guid,
            &log.source_name,
            log.index.unwrap_or(0),
            self.sink.clone(),
        );

        debug!(
            guid = %context.task.guid,
            actions = context.task.actions.len(),
            "transforming task actions"
        );

        Ok(context
            .task
            .actions
            .iter()
            .map(|action| {
                self.step_for(action, &context.task.env, &container, &streamer, shared)
            })
            .collect())
    }

    fn step_for(
        &self,
        action: &Action,
        task_env: &[EnvironmentVariable],
        container: &ContainerRef,
        streamer: &LogStreamer,
        shared: &SharedContext,
    ) -> BoxedStep {
        debug!(action = action.name(), "building step");
        match action {
            Action::Run {
                path,
                args,
                env,
                timeout_secs,
            } => Box::new(RunStep::new(
                container.clone(),
                ProcessSpec {
                    path: path.clone(),
                    args: args.clone(),
                    env: task_env.iter().chain(env).map(env_pair).collect(),
                },
                timeout_secs.map(Duration::from_secs),
                streamer.clone(),
            )),
            Action::FetchResult { file } => {
                Box::new(FetchResultStep::new(shared.clone(), container.clone(), file))
            }
            Action::Try { action } => Box::new(TryStep::new(
                self.step_for(action, task_env, container, streamer, shared),
            )),
            Action::EmitProgress {
                start_message,
                success_message,
                failure_message,
                action,
            } => Box::new(EmitProgressStep::new(
                self.step_for(action, task_env, container, streamer, shared),
                streamer.clone(),
                start_message,
                success_message,
                failure_message,
            )),
        }
    }
}

fn env_pair(variable: &EnvironmentVariable) -> String {
    format!("{}={}", variable.name, variable.value)
}
