//! In-process capacity registry and task store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::{
    Capacity, CapacityRegistry, CollaboratorError, TaskRecord, TaskRecordState, TaskStore,
};
use crate::tasks::types::{RunResult, Task};

pub struct InMemoryCapacityRegistry {
    total: Capacity,
    reservations: Mutex<HashMap<String, Capacity>>,
}

impl InMemoryCapacityRegistry {
    pub fn new(total: Capacity) -> Self {
        InMemoryCapacityRegistry {
            total,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn available(&self) -> Capacity {
        let reservations = self.reservations.lock().await;
        self.remaining(&reservations)
    }

    fn remaining(&self, reservations: &HashMap<String, Capacity>) -> Capacity {
        let mut available = self.total;
        for reserved in reservations.values() {
            available.memory_mb = available.memory_mb.saturating_sub(reserved.memory_mb);
            available.disk_mb = available.disk_mb.saturating_sub(reserved.disk_mb);
            available.containers = available.containers.saturating_sub(reserved.containers);
        }
        available
    }

    pub async fn reserved(&self, guid: &str) -> bool {
        self.reservations.lock().await.contains_key(guid)
    }
}

fn check(resource: &str, requested: u64, available: u64) -> Result<(), CollaboratorError> {
    if requested > available {
        return Err(CollaboratorError::InsufficientResources {
            resource: resource.to_string(),
            requested,
            available,
        });
    }
    Ok(())
}

#[async_trait]
impl CapacityRegistry for InMemoryCapacityRegistry {
    async fn reserve(&self, task: &Task) -> Result<(), CollaboratorError> {
        let mut reservations = self.reservations.lock().await;
        let available = self.remaining(&reservations);

        check("containers", 1, available.containers)?;
        check("memory", task.memory_mb, available.memory_mb)?;
        check("disk", task.disk_mb, available.disk_mb)?;

        reservations.insert(
            task.guid.clone(),
            Capacity {
                memory_mb: task.memory_mb,
                disk_mb: task.disk_mb,
                containers: 1,
            },
        );
        debug!(guid = %task.guid, "capacity reserved");
        Ok(())
    }

    async fn release(&self, guid: &str) -> Result<(), CollaboratorError> {
        self.reservations
            .lock()
            .await
            .remove(guid)
            .map(|_| ())
            .ok_or_else(|| CollaboratorError::NotFound(guid.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
    unavailable: Mutex<Option<String>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call fails with `reason` until cleared with `None`.
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.lock().await = reason.map(str::to_string);
    }

    pub async fn record(&self, guid: &str) -> Option<TaskRecord> {
        self.records.lock().await.get(guid).cloned()
    }

    async fn ensure_available(&self) -> Result<(), CollaboratorError> {
        match self.unavailable.lock().await.as_ref() {
            Some(reason) => Err(CollaboratorError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

fn transition(
    record: &mut TaskRecord,
    from: TaskRecordState,
    to: TaskRecordState,
) -> Result<(), CollaboratorError> {
    if record.state != from {
        return Err(CollaboratorError::InvalidTransition {
            guid: record.guid.clone(),
            from: format!("{:?}", record.state),
            to: format!("{:?}", to),
        });
    }
    record.state = to;
    Ok(())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn claim(&self, task: &Task, executor_id: &str) -> Result<(), CollaboratorError> {
        self.ensure_available().await?;
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(&task.guid) {
            return Err(CollaboratorError::AlreadyClaimed {
                guid: task.guid.clone(),
                owner: existing.executor_id.clone(),
            });
        }

        records.insert(
            task.guid.clone(),
            TaskRecord {
                guid: task.guid.clone(),
                state: TaskRecordState::Claimed,
                executor_id: executor_id.to_string(),
                container_handle: None,
                result: None,
            },
        );
        info!(guid = %task.guid, executor = %executor_id, "task claimed");
        Ok(())
    }

    async fn start(
        &self,
        task: &Task,
        executor_id: &str,
        container_handle: &str,
    ) -> Result<(), CollaboratorError> {
        self.ensure_available().await?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&task.guid)
            .ok_or_else(|| CollaboratorError::NotFound(task.guid.clone()))?;

        if record.executor_id != executor_id {
            return Err(CollaboratorError::AlreadyClaimed {
                guid: task.guid.clone(),
                owner: record.executor_id.clone(),
            });
        }
        transition(record, TaskRecordState::Claimed, TaskRecordState::Running)?;
        record.container_handle = Some(container_handle.to_string());
        Ok(())
    }

    async fn complete(&self, task: &Task, result: &RunResult) -> Result<(), CollaboratorError> {
        self.ensure_available().await?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&task.guid)
            .ok_or_else(|| CollaboratorError::NotFound(task.guid.clone()))?;

        transition(record, TaskRecordState::Running, TaskRecordState::Completed)?;
        record.result = Some(result.clone());
        Ok(())
    }
}
