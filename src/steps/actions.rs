use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::types::*;
use crate::backend::types::{ContainerRef, ProcessOutcome, ProcessSpec};
use crate::error::{ExecutorError, Result};
use crate::log_streamer::types::LogStreamer;
use crate::sequence::types::{BoxedStep, CancelSignal, Step};
use crate::tasks::types::{FETCH_RESULT_ACTION, RUN_ACTION};

impl RunStep {
    pub fn new(
        container: ContainerRef,
        spec: ProcessSpec,
        timeout: Option<Duration>,
        streamer: LogStreamer,
    ) -> Self {
        RunStep {
            container,
            spec,
            timeout,
            streamer,
            signal: CancelSignal::new(),
        }
    }

    async fn run(&self) -> Result<ProcessOutcome> {
        let process = self.container.run(self.spec.clone());
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, process).await.map_err(|_| {
                ExecutorError::ActionFailed {
                    action: RUN_ACTION.to_string(),
                    message: format!("timed out after {:?}", limit),
                }
            })??,
            None => process.await?,
        };
        Ok(outcome)
    }
}

#[async_trait]
impl Step for RunStep {
    async fn perform(&self) -> Result<()> {
        debug!(handle = %self.container.handle(), path = %self.spec.path, "running process");

        let outcome = self.signal.guard(self.run()).await??;
        self.streamer.write_stdout(&outcome.stdout);
        self.streamer.write_stderr(&outcome.stderr);
        self.streamer.flush();

        if outcome.exit_status != 0 {
            return Err(ExecutorError::ActionFailed {
                action: RUN_ACTION.to_string(),
                message: format!("process exited with status {}", outcome.exit_status),
            });
        }
        Ok(())
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl FetchResultStep {
    pub fn new(context: SharedContext, container: ContainerRef, file: &str) -> Self {
        FetchResultStep {
            context,
            container,
            file: file.to_string(),
            signal: CancelSignal::new(),
        }
    }
}

#[async_trait]
impl Step for FetchResultStep {
    async fn perform(&self) -> Result<()> {
        let contents = self
            .signal
            .guard(self.container.stream_out(&self.file))
            .await??;

        if contents.len() > MAX_RESULT_SIZE {
            return Err(ExecutorError::ActionFailed {
                action: FETCH_RESULT_ACTION.to_string(),
                message: format!(
                    "result file size exceeds allowed limit (got {} bytes > {} bytes)",
                    contents.len(),
                    MAX_RESULT_SIZE
                ),
            });
        }

        let mut context = self.context.lock().await;
        context.container.run_result.result = String::from_utf8_lossy(&contents).into_owned();
        Ok(())
    }

    fn cancel(&self) {
        self.signal.fire();
    }
}

impl TryStep {
    pub fn new(inner: BoxedStep) -> Self {
        TryStep { inner }
    }
}

#[async_trait]
impl Step for TryStep {
    async fn perform(&self) -> Result<()> {
        match self.inner.perform().await {
            Err(ExecutorError::Cancelled) => Err(ExecutorError::Cancelled),
            Err(err) => {
                warn!(error = %err, "ignoring failed step");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

impl EmitProgressStep {
    pub fn new(
        inner: BoxedStep,
        streamer: LogStreamer,
        start_message: &str,
        success_message: &str,
        failure_message: &str,
    ) -> Self {
        EmitProgressStep {
            inner,
            streamer,
            start_message: start_message.to_string(),
            success_message: success_message.to_string(),
            failure_message: failure_message.to_string(),
        }
    }

    fn emit(&self, message: &str, to_stderr: bool) {
        if message.is_empty() {
            return;
        }
        let line = format!("{}\n", message);
        if to_stderr {
            self.streamer.write_stderr(line.as_bytes());
        } else {
            self.streamer.write_stdout(line.as_bytes());
        }
    }
}

#[async_trait]
impl Step for EmitProgressStep {
    async fn perform(&self) -> Result<()> {
        self.emit(&self.start_message, false);

        let result = self.inner.perform().await;
        match &result {
            Ok(()) => self.emit(&self.success_message, false),
            Err(ExecutorError::Cancelled) => {}
            Err(err) => {
                info!(error = %err, "step failed, emitting failure message");
                self.emit(&self.failure_message, true);
            }
        }
        result
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}
