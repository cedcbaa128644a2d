//! Step doubles shared by the engine, step and handler tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::types::{CancelSignal, Step};
use crate::error::{ExecutorError, Result};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn failure(name: &str) -> ExecutorError {
    ExecutorError::ActionFailed {
        action: name.to_string(),
        message: "boom".to_string(),
    }
}

/// Appends its name to the journal, optionally failing afterwards.
pub struct RecordingStep {
    pub name: String,
    pub journal: Journal,
    pub fail: bool,
    pub cancels: Arc<AtomicUsize>,
}

impl RecordingStep {
    pub fn new(name: &str, journal: &Journal) -> Self {
        RecordingStep {
            name: name.to_string(),
            journal: journal.clone(),
            fail: false,
            cancels: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str, journal: &Journal) -> Self {
        RecordingStep {
            fail: true,
            ..Self::new(name, journal)
        }
    }
}

#[async_trait]
impl Step for RecordingStep {
    async fn perform(&self) -> Result<()> {
        self.journal.lock().unwrap().push(self.name.clone());
        if self.fail {
            return Err(failure(&self.name));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Blocks until cancelled, counting how often `cancel` reaches it.
pub struct BlockingStep {
    pub started: Arc<Notify>,
    pub cancels: Arc<AtomicUsize>,
    signal: CancelSignal,
}

impl BlockingStep {
    pub fn new() -> Self {
        BlockingStep {
            started: Arc::new(Notify::new()),
            cancels: Arc::new(AtomicUsize::new(0)),
            signal: CancelSignal::new(),
        }
    }
}

#[async_trait]
impl Step for BlockingStep {
    async fn perform(&self) -> Result<()> {
        self.started.notify_one();
        self.signal.fired().await;
        Err(ExecutorError::Cancelled)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.signal.fire();
    }
}
