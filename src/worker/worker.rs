use std::{collections::HashMap, sync::Arc};

use futures_util::future::join_all;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

use super::types::{RunningTask, Worker, WorkerError, WorkerResult};
use crate::collaborators::types::CollaboratorError;
use crate::handler::types::TaskHandler;
use crate::tasks::types::Task;

impl Worker {
    pub fn new(handler: TaskHandler) -> Self {
        Worker {
            handler,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts `task` in the background. Capacity reserved for it is released
    /// once the run ends, however it ends.
    pub async fn submit(&self, task: Task) -> WorkerResult<()> {
        let guid = task.guid.clone();
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&guid) {
            return Err(WorkerError::AlreadyRunning(guid));
        }

        let (cancel, trigger) = oneshot::channel();
        let handler = self.handler.clone();
        let registry = self.handler.registry();
        let all_runs = self.runs.clone();
        let run_guid = guid.clone();

        let handle = tokio::spawn(async move {
            match handler.run_task(task, trigger).await {
                Ok(()) => info!(guid = %run_guid, "task run ended"),
                Err(err) if err.is_cancelled() => info!(guid = %run_guid, "task run cancelled"),
                Err(err) => error!(guid = %run_guid, error = %err, "task run failed"),
            }

            match registry.release(&run_guid).await {
                Ok(()) => debug!(guid = %run_guid, "capacity released"),
                Err(CollaboratorError::NotFound(_)) => {}
                Err(err) => warn!(guid = %run_guid, error = %err, "failed to release capacity"),
            }
            all_runs.lock().await.remove(&run_guid);
        });

        runs.insert(
            guid.clone(),
            RunningTask {
                cancel: Some(cancel),
                handle,
            },
        );
        info!(guid = %guid, executor = %self.handler.executor_id(), "task submitted");
        Ok(())
    }

    /// Cancelling a task twice is a no-op.
    pub async fn cancel(&self, guid: &str) -> WorkerResult<()> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .get_mut(guid)
            .ok_or_else(|| WorkerError::NotRunning(guid.to_string()))?;

        if let Some(cancel) = run.cancel.take() {
            info!(guid = %guid, "cancel requested");
            let _ = cancel.send(());
        }
        Ok(())
    }

    pub async fn running(&self) -> Vec<String> {
        let mut guids: Vec<String> = self.runs.lock().await.keys().cloned().collect();
        guids.sort();
        guids
    }

    /// Cancels every run and waits for all of them to unwind.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RunningTask)> = self.runs.lock().await.drain().collect();
        info!(tasks = drained.len(), "shutting down worker");

        let handles = drained.into_iter().map(|(guid, mut run)| {
            if let Some(cancel) = run.cancel.take() {
                let _ = cancel.send(());
            }
            debug!(guid = %guid, "waiting for task run");
            run.handle
        });

        for result in join_all(handles).await {
            if let Err(err) = result {
                error!(error = %err, "task run panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::collaborators::memory::{InMemoryCapacityRegistry, InMemoryTaskStore};
    use crate::collaborators::types::{Capacity, TaskRecordState};
    use crate::config::types::ExecutorConfig;
    use crate::log_streamer::sink::CollectingSink;
    use crate::tasks::types::Action;
    use std::time::Duration;

    struct Fixture {
        backend: InMemoryBackend,
        registry: Arc<InMemoryCapacityRegistry>,
        store: Arc<InMemoryTaskStore>,
        worker: Worker,
    }

    fn fixture() -> Fixture {
        let backend = InMemoryBackend::new();
        let registry = Arc::new(InMemoryCapacityRegistry::new(Capacity {
            memory_mb: 1024,
            disk_mb: 1024,
            containers: 8,
        }));
        let store = Arc::new(InMemoryTaskStore::new());
        let handler = TaskHandler::new(
            &ExecutorConfig::default(),
            Arc::new(backend.clone()),
            registry.clone(),
            store.clone(),
            Arc::new(CollectingSink::new()),
        );
        Fixture {
            backend,
            registry,
            store,
            worker: Worker::new(handler),
        }
    }

    fn task(guid: &str, path: &str) -> Task {
        Task {
            guid: guid.to_string(),
            memory_mb: 16,
            actions: vec![Action::Run {
                path: path.to_string(),
                args: vec![],
                env: vec![],
                timeout_secs: None,
            }],
            ..Default::default()
        }
    }

    async fn wait_until_idle(worker: &Worker) {
        for _ in 0..200 {
            if worker.running().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker still running {:?}", worker.running().await);
    }

    #[tokio::test]
    async fn test_submitted_task_completes_and_releases_capacity() {
        let f = fixture();
        f.worker.submit(task("t1", "/bin/app")).await.unwrap();
        wait_until_idle(&f.worker).await;

        assert_eq!(
            f.store.record("t1").await.unwrap().state,
            TaskRecordState::Completed
        );
        assert!(!f.registry.reserved("t1").await);
        assert_eq!(f.registry.available().await.memory_mb, 1024);
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let f = fixture();
        f.backend.hang("/bin/sleep").await;
        f.worker.submit(task("t1", "/bin/sleep")).await.unwrap();

        assert_eq!(
            f.worker.submit(task("t1", "/bin/sleep")).await,
            Err(WorkerError::AlreadyRunning("t1".to_string()))
        );
        assert_eq!(f.worker.running().await, vec!["t1".to_string()]);
        f.worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel() {
        let f = fixture();
        f.backend.hang("/bin/sleep").await;
        f.worker.submit(task("t1", "/bin/sleep")).await.unwrap();

        assert_eq!(
            f.worker.cancel("nope").await,
            Err(WorkerError::NotRunning("nope".to_string()))
        );
        f.worker.cancel("t1").await.unwrap();
        f.worker.cancel("t1").await.unwrap();
        wait_until_idle(&f.worker).await;

        assert!(!f.registry.reserved("t1").await);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_every_run() {
        let f = fixture();
        f.backend.hang("/bin/sleep").await;
        f.worker.submit(task("t1", "/bin/sleep")).await.unwrap();
        f.worker.submit(task("t2", "/bin/sleep")).await.unwrap();

        f.worker.shutdown().await;

        assert!(f.worker.running().await.is_empty());
        assert!(!f.registry.reserved("t1").await);
        assert!(!f.registry.reserved("t2").await);
    }
}
