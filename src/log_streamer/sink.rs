use std::sync::{Mutex, PoisonError};

use tracing::info;

use super::types::{LogMessage, LogSink, MessageType};

/// Forwards task output to the process's own `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, message: LogMessage) {
        let stream = match message.message_type {
            MessageType::Out => "stdout",
            MessageType::Err => "stderr",
        };
        info!(
            app_id = %message.app_id,
            source = %message.source_name,
            instance = %message.source_instance,
            stream,
            "{}",
            message.message
        );
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<LogMessage>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<LogMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for CollectingSink {
    fn emit(&self, message: LogMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}
