//! In-memory container backend.
//!
//! Keeps every container in a map behind a shared lock, records the most
//! recent calls in order, and can be told to fail or stall individual
//! operations. Used for local runs and as the test double for the exchanger,
//! the steps and the task handler.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::types::{
    BackendClient, BackendContainer, BackendError, ContainerInfo, ContainerRef, ContainerSpec,
    CpuLimits, DiskLimits, MemoryLimits, PortMapping, ProcessOutcome, ProcessSpec, Properties,
};

const FIRST_HOST_PORT: u32 = 61000;

/// Calls and process runs kept for inspection; older entries are dropped.
pub const MAX_RECORDED: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Create,
    Destroy,
    Lookup,
    Containers,
    Info,
    CurrentMemoryLimits,
    CurrentDiskLimits,
    CurrentCpuLimits,
    LimitMemory,
    LimitDisk,
    LimitCpu,
    NetIn,
    Run,
    StreamOut,
}

#[derive(Debug, Clone, Default)]
struct StoredContainer {
    properties: Properties,
    memory: MemoryLimits,
    disk: DiskLimits,
    cpu: CpuLimits,
    ports: Vec<PortMapping>,
}

#[derive(Default)]
struct Shared {
    containers: HashMap<String, StoredContainer>,
    failures: HashMap<BackendOp, String>,
    delays: HashMap<BackendOp, Duration>,
    outcomes: HashMap<String, ProcessOutcome>,
    hanging: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    calls: VecDeque<BackendOp>,
    runs: VecDeque<ProcessSpec>,
    next_port: u32,
}

impl Shared {
    fn enter(&mut self, op: BackendOp) -> Result<(), BackendError> {
        record(&mut self.calls, op);
        match self.failures.get(&op) {
            Some(message) => Err(BackendError::Operation(message.clone())),
            None => Ok(()),
        }
    }

    fn container_mut(&mut self, handle: &str) -> Result<&mut StoredContainer, BackendError> {
        self.containers
            .get_mut(handle)
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))
    }
}

fn record<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == MAX_RECORDED {
        log.pop_front();
    }
    log.push_back(entry);
}

/// Sleeps for the delay configured for `op`, without holding the lock.
async fn stall(shared: &Mutex<Shared>, op: BackendOp) {
    let delay = shared.lock().await.delays.get(&op).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail with `message`.
    pub async fn fail(&self, op: BackendOp, message: &str) {
        self.shared
            .lock()
            .await
            .failures
            .insert(op, message.to_string());
    }

    /// Make every later call of `op` take at least `delay`.
    pub async fn delay(&self, op: BackendOp, delay: Duration) {
        self.shared.lock().await.delays.insert(op, delay);
    }

    pub async fn clear_failures(&self) {
        self.shared.lock().await.failures.clear();
    }

    /// Outcome returned by runs of `path`; unknown paths exit 0 silently.
    pub async fn set_outcome(&self, path: &str, outcome: ProcessOutcome) {
        self.shared
            .lock()
            .await
            .outcomes
            .insert(path.to_string(), outcome);
    }

    /// Runs of `path` never return.
    pub async fn hang(&self, path: &str) {
        self.shared.lock().await.hanging.insert(path.to_string());
    }

    pub async fn put_file(&self, path: &str, contents: &[u8]) {
        self.shared
            .lock()
            .await
            .files
            .insert(path.to_string(), contents.to_vec());
    }

    pub async fn calls(&self) -> Vec<BackendOp> {
        self.shared.lock().await.calls.iter().copied().collect()
    }

    pub async fn runs(&self) -> Vec<ProcessSpec> {
        self.shared.lock().await.runs.iter().cloned().collect()
    }

    pub async fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.shared.lock().await.containers.keys().cloned().collect();
        handles.sort();
        handles
    }

    fn container_ref(&self, handle: String) -> ContainerRef {
        Arc::new(InMemoryContainer {
            handle,
            shared: self.shared.clone(),
        })
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerRef, BackendError> {
        stall(&self.shared, BackendOp::Create).await;
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::Create)?;

        let handle = if spec.handle.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            spec.handle
        };
        if shared.containers.contains_key(&handle) {
            return Err(BackendError::Operation(format!(
                "handle already exists: {}",
                handle
            )));
        }

        shared.containers.insert(
            handle.clone(),
            StoredContainer {
                properties: spec.properties,
                ..Default::default()
            },
        );
        drop(shared);

        debug!(handle = %handle, root_fs_path = %spec.root_fs_path, "created in-memory container");
        Ok(self.container_ref(handle))
    }

    async fn destroy(&self, handle: &str) -> Result<(), BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::Destroy)?;
        shared
            .containers
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))
    }

    async fn lookup(&self, handle: &str) -> Result<ContainerRef, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::Lookup)?;
        if !shared.containers.contains_key(handle) {
            return Err(BackendError::NotFound(handle.to_string()));
        }
        drop(shared);
        Ok(self.container_ref(handle.to_string()))
    }

    async fn containers(&self, filter: &Properties) -> Result<Vec<ContainerRef>, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::Containers)?;

        let mut handles: Vec<String> = shared
            .containers
            .iter()
            .filter(|(_, container)| {
                filter
                    .iter()
                    .all(|(key, value)| container.properties.get(key) == Some(value))
            })
            .map(|(handle, _)| handle.clone())
            .collect();
        handles.sort();
        drop(shared);

        Ok(handles
            .into_iter()
            .map(|handle| self.container_ref(handle))
            .collect())
    }
}

pub struct InMemoryContainer {
    handle: String,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl BackendContainer for InMemoryContainer {
    fn handle(&self) -> String {
        self.handle.clone()
    }

    async fn info(&self) -> Result<ContainerInfo, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::Info)?;
        let container = shared.container_mut(&self.handle)?;
        Ok(ContainerInfo {
            handle: self.handle.clone(),
            mapped_ports: container.ports.clone(),
            properties: container.properties.clone(),
        })
    }

    async fn current_memory_limits(&self) -> Result<MemoryLimits, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::CurrentMemoryLimits)?;
        Ok(shared.container_mut(&self.handle)?.memory)
    }

    async fn current_disk_limits(&self) -> Result<DiskLimits, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::CurrentDiskLimits)?;
        Ok(shared.container_mut(&self.handle)?.disk)
    }

    async fn current_cpu_limits(&self) -> Result<CpuLimits, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::CurrentCpuLimits)?;
        Ok(shared.container_mut(&self.handle)?.cpu)
    }

    async fn limit_memory(&self, limits: MemoryLimits) -> Result<(), BackendError> {
        stall(&self.shared, BackendOp::LimitMemory).await;
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::LimitMemory)?;
        shared.container_mut(&self.handle)?.memory = limits;
        Ok(())
    }

    async fn limit_disk(&self, limits: DiskLimits) -> Result<(), BackendError> {
        stall(&self.shared, BackendOp::LimitDisk).await;
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::LimitDisk)?;
        shared.container_mut(&self.handle)?.disk = limits;
        Ok(())
    }

    async fn limit_cpu(&self, limits: CpuLimits) -> Result<(), BackendError> {
        stall(&self.shared, BackendOp::LimitCpu).await;
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::LimitCpu)?;
        shared.container_mut(&self.handle)?.cpu = limits;
        Ok(())
    }

    async fn net_in(&self, host_port: u32, container_port: u32) -> Result<(u32, u32), BackendError> {
        stall(&self.shared, BackendOp::NetIn).await;
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::NetIn)?;

        let host_port = if host_port == 0 {
            shared.next_port = shared.next_port.max(FIRST_HOST_PORT) + 1;
            shared.next_port
        } else {
            host_port
        };
        let container_port = if container_port == 0 {
            host_port
        } else {
            container_port
        };

        shared.container_mut(&self.handle)?.ports.push(PortMapping {
            host_port,
            container_port,
        });
        Ok((host_port, container_port))
    }

    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutcome, BackendError> {
        let (hangs, outcome) = {
            let mut shared = self.shared.lock().await;
            shared.enter(BackendOp::Run)?;
            shared.container_mut(&self.handle)?;
            record(&mut shared.runs, spec.clone());
            (
                shared.hanging.contains(&spec.path),
                shared.outcomes.get(&spec.path).cloned().unwrap_or_default(),
            )
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(outcome)
    }

    async fn stream_out(&self, path: &str) -> Result<Vec<u8>, BackendError> {
        let mut shared = self.shared.lock().await;
        shared.enter(BackendOp::StreamOut)?;
        shared.container_mut(&self.handle)?;
        shared
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::Operation(format!("no such file: {}", path)))
    }
}
