use std::{collections::HashMap, fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Lifecycle state of an executor container. Advances strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Reserved,
    Initializing,
    Created,
    Completed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Reserved => "reserved",
            State::Initializing => "initializing",
            State::Created => "created",
            State::Completed => "completed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl FromStr for State {
    type Err = UnknownState;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reserved" => Ok(State::Reserved),
            "initializing" => Ok(State::Initializing),
            "created" => Ok(State::Created),
            "completed" => Ok(State::Completed),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

pub type Tags = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u32,
    pub container_port: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn new(name: &str, value: &str) -> Self {
        EnvironmentVariable {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Where a task's output is streamed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub guid: String,
    pub source_name: String,
    pub index: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub failed: bool,
    pub failure_reason: String,
    pub result: String,
}

/// One node of a task's action graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run {
        path: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: Vec<EnvironmentVariable>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    FetchResult {
        file: String,
    },
    Try {
        action: Box<Action>,
    },
    EmitProgress {
        start_message: String,
        success_message: String,
        failure_message: String,
        action: Box<Action>,
    },
}

pub const RUN_ACTION: &str = "run";
pub const FETCH_RESULT_ACTION: &str = "fetch_result";
pub const TRY_ACTION: &str = "try";
pub const EMIT_PROGRESS_ACTION: &str = "emit_progress";

impl Action {
    /// Label used in logs and in `ActionFailed` errors; matches the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Run { .. } => RUN_ACTION,
            Action::FetchResult { .. } => FETCH_RESULT_ACTION,
            Action::Try { .. } => TRY_ACTION,
            Action::EmitProgress { .. } => EMIT_PROGRESS_ACTION,
        }
    }
}

/// A unit of work submitted to the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub guid: String,
    #[serde(default)]
    pub root_fs_path: String,
    #[serde(default)]
    pub complete_url: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub env: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub disk_mb: u64,
    #[serde(default)]
    pub cpu_weight: u32,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub tags: Tags,
}

/// The executor's typed view of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub guid: String,
    pub container_handle: String,
    pub state: State,
    /// Nanoseconds since the unix epoch.
    pub allocated_at: i64,
    pub root_fs_path: String,
    pub complete_url: String,
    pub actions: Vec<Action>,
    pub env: Vec<EnvironmentVariable>,
    pub log: LogConfig,
    pub run_result: RunResult,
    pub tags: Tags,
    pub memory_mb: u64,
    pub disk_mb: u64,
    /// Percentage of the configured maximum CPU shares.
    pub cpu_weight: u32,
    pub ports: Vec<PortMapping>,
}

impl Container {
    /// Reserved container mirroring `task`, allocated now.
    pub fn for_task(task: &Task) -> Self {
        Container {
            guid: task.guid.clone(),
            container_handle: String::new(),
            state: State::Reserved,
            allocated_at: now_nanos(),
            root_fs_path: task.root_fs_path.clone(),
            complete_url: task.complete_url.clone(),
            actions: task.actions.clone(),
            env: task.env.clone(),
            log: task.log.clone(),
            run_result: RunResult::default(),
            tags: task.tags.clone(),
            memory_mb: task.memory_mb,
            disk_mb: task.disk_mb,
            cpu_weight: task.cpu_weight.min(100),
            ports: task.ports.clone(),
        }
    }
}

pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or_default()
}
