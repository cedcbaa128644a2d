use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

/// Flat string property bag the backend stores per container.
pub type Properties = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Operation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Empty lets the backend choose a handle.
    pub handle: String,
    pub root_fs_path: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u32,
    pub container_port: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub handle: String,
    pub mapped_ports: Vec<PortMapping>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryLimits {
    pub limit_in_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskLimits {
    pub byte_hard: u64,
    pub inode_hard: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuLimits {
    pub limit_in_shares: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub path: String,
    pub args: Vec<String>,
    /// `NAME=value` pairs.
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub type ContainerRef = Arc<dyn BackendContainer>;

/// Client side of the container backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerRef, BackendError>;

    async fn destroy(&self, handle: &str) -> Result<(), BackendError>;

    async fn lookup(&self, handle: &str) -> Result<ContainerRef, BackendError>;

    /// Containers whose properties contain every entry of `filter`.
    async fn containers(&self, filter: &Properties) -> Result<Vec<ContainerRef>, BackendError>;
}

/// A physical container owned by the backend.
#[async_trait]
pub trait BackendContainer: Send + Sync {
    fn handle(&self) -> String;

    async fn info(&self) -> Result<ContainerInfo, BackendError>;

    async fn current_memory_limits(&self) -> Result<MemoryLimits, BackendError>;

    async fn current_disk_limits(&self) -> Result<DiskLimits, BackendError>;

    async fn current_cpu_limits(&self) -> Result<CpuLimits, BackendError>;

    async fn limit_memory(&self, limits: MemoryLimits) -> Result<(), BackendError>;

    async fn limit_disk(&self, limits: DiskLimits) -> Result<(), BackendError>;

    async fn limit_cpu(&self, limits: CpuLimits) -> Result<(), BackendError>;

    /// Forwards `host_port` to `container_port`; zero ports are backend-assigned.
    async fn net_in(&self, host_port: u32, container_port: u32) -> Result<(u32, u32), BackendError>;

    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutcome, BackendError>;

    async fn stream_out(&self, path: &str) -> Result<Vec<u8>, BackendError>;
}
