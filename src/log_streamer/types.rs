use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Largest payload a single log message may carry, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 61440;

pub const DEFAULT_LOG_SOURCE: &str = "LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Out,
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub app_id: String,
    pub source_name: String,
    pub source_instance: String,
    pub message_type: MessageType,
    pub message: String,
    pub timestamp: i64,
}

/// Log transport towards the ingestion service.
pub trait LogSink: Send + Sync {
    fn emit(&self, message: LogMessage);
}

/// Line-buffering writer for a task's stdout and stderr.
///
/// A streamer built for an empty guid drops everything.
#[derive(Clone)]
pub struct LogStreamer {
    pub(super) streams: Option<Streams>,
}

#[derive(Clone)]
pub(super) struct Streams {
    pub stdout: Arc<StreamDestination>,
    pub stderr: Arc<StreamDestination>,
}

pub(super) struct StreamDestination {
    pub guid: String,
    pub source_name: String,
    pub source_instance: String,
    pub message_type: MessageType,
    pub sink: Arc<dyn LogSink>,
    pub buffer: Mutex<Vec<u8>>,
}
