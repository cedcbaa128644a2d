use thiserror::Error;

use crate::backend::types::BackendError;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

pub const TAG_PROPERTY_PREFIX: &str = "tag:";
pub const EXECUTOR_PROPERTY_PREFIX: &str = "executor:";

pub const CONTAINER_OWNER_PROPERTY: &str = "executor:owner";
pub const CONTAINER_GUID_PROPERTY: &str = "executor:guid";
pub const CONTAINER_STATE_PROPERTY: &str = "executor:state";
pub const CONTAINER_ALLOCATED_AT_PROPERTY: &str = "executor:allocated-at";
pub const CONTAINER_ROOTFS_PROPERTY: &str = "executor:rootfs";
pub const CONTAINER_COMPLETE_URL_PROPERTY: &str = "executor:complete-url";
pub const CONTAINER_ACTIONS_PROPERTY: &str = "executor:actions";
pub const CONTAINER_ENV_PROPERTY: &str = "executor:env";
pub const CONTAINER_LOG_PROPERTY: &str = "executor:log";
pub const CONTAINER_RESULT_PROPERTY: &str = "executor:result";

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("invalid state: {state}")]
    InvalidState { state: String },

    #[error("invalid timestamp: {timestamp}")]
    InvalidTimestamp { timestamp: String },

    #[error("invalid JSON in property {property}: {source}\n\nvalue: {value}")]
    InvalidJson {
        property: String,
        value: String,
        source: serde_json::Error,
    },

    #[error("failed to encode property {property}: {source}")]
    Encode {
        property: String,
        source: serde_json::Error,
    },

    #[error("lookup container with handle {handle} failed: {source}")]
    Lookup {
        handle: String,
        source: BackendError,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Translates between executor containers and backend containers.
///
/// CPU weights are always relative to `container_max_cpu_shares`; changing it
/// reinterprets the shares of every container encoded before the change.
#[derive(Debug, Clone)]
pub struct Exchanger {
    pub container_owner_name: String,
    pub container_max_cpu_shares: u64,
    pub container_inode_limit: u64,
}
