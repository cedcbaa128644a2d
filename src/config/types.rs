use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTAINER_MAX_CPU_SHARES: u64 = 1024;
pub const DEFAULT_CONTAINER_INODE_LIMIT: u64 = 200_000;
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:1700";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Identity used when claiming tasks.
    pub executor_id: String,
    /// Written to every container this executor creates.
    pub container_owner_name: String,
    /// CPU weights are percentages of this pool.
    pub container_max_cpu_shares: u64,
    pub container_inode_limit: u64,
    pub listen_address: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let executor_id = uuid::Uuid::new_v4().to_string();
        ExecutorConfig {
            container_owner_name: format!("executor-{}", executor_id),
            executor_id,
            container_max_cpu_shares: DEFAULT_CONTAINER_MAX_CPU_SHARES,
            container_inode_limit: DEFAULT_CONTAINER_INODE_LIMIT,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}
