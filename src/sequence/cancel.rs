use std::{future::Future, sync::Arc};

use tokio::sync::watch;

use super::types::CancelSignal;
use crate::error::{ExecutorError, Result};

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        CancelSignal {
            sender: Arc::new(sender),
        }
    }

    /// Returns true only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        self.sender.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn fired(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|fired| *fired).await;
    }

    /// Drives `future` unless the signal fires first.
    pub async fn guard<F: Future>(&self, future: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.fired() => Err(ExecutorError::Cancelled),
            output = future => Ok(output),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
