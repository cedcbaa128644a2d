use std::{collections::HashMap, path::Path};

use tracing_subscriber::EnvFilter;

use super::types::ExecutorConfig;
use crate::error::{ExecutorError, Result};

const ENV_PREFIX: &str = "EXECUTOR_";

impl ExecutorConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            ExecutorError::ConfigError(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config: ExecutorConfig = serde_json::from_str(&contents).map_err(|err| {
            ExecutorError::ConfigError(format!("failed to parse {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `EXECUTOR_*` process environment variables.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::default().with_overrides(&vars)
    }

    pub fn with_overrides(mut self, vars: &HashMap<String, String>) -> Result<Self> {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "ID" => self.executor_id = value.clone(),
                "CONTAINER_OWNER_NAME" => self.container_owner_name = value.clone(),
                "CONTAINER_MAX_CPU_SHARES" => {
                    self.container_max_cpu_shares = parse_number(name, value)?
                }
                "CONTAINER_INODE_LIMIT" => self.container_inode_limit = parse_number(name, value)?,
                "LISTEN_ADDRESS" => self.listen_address = value.clone(),
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_owner_name.is_empty() {
            return Err(ExecutorError::ConfigError(
                "container owner name must not be empty".to_string(),
            ));
        }
        if self.container_max_cpu_shares == 0 {
            return Err(ExecutorError::ConfigError(
                "container max cpu shares must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| ExecutorError::ConfigError(format!("{} is not a number: {}", name, value)))
}

/// Installs the global `tracing` subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
