use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::types::{BoxedStep, Sequence, SequenceControl, SequenceState, Step};
use crate::error::{ExecutorError, Result};

impl Sequence {
    pub fn new(steps: Vec<BoxedStep>) -> Self {
        Sequence {
            steps,
            control: Mutex::new(SequenceControl {
                state: SequenceState::NotStarted,
                current: None,
                cancelled: false,
            }),
        }
    }

    pub fn state(&self) -> SequenceState {
        self.control().state
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn control(&self) -> MutexGuard<'_, SequenceControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims step `index` for execution unless the sequence was cancelled.
    fn enter(&self, index: usize) -> Result<()> {
        let mut control = self.control();
        if control.cancelled {
            control.state = SequenceState::Cancelled;
            return Err(ExecutorError::Cancelled);
        }
        control.current = Some(index);
        Ok(())
    }

    fn leave(&self, result: &Result<()>) {
        let mut control = self.control();
        control.current = None;
        if let Err(err) = result {
            control.state = if control.cancelled || err.is_cancelled() {
                SequenceState::Cancelled
            } else {
                SequenceState::Failed
            };
        }
    }
}

#[async_trait]
impl Step for Sequence {
    async fn perform(&self) -> Result<()> {
        {
            let mut control = self.control();
            if control.cancelled {
                control.state = SequenceState::Cancelled;
                return Err(ExecutorError::Cancelled);
            }
            if control.state != SequenceState::NotStarted {
                return Err(ExecutorError::AlreadyPerformed);
            }
            control.state = SequenceState::Running;
        }

        for (index, step) in self.steps.iter().enumerate() {
            self.enter(index)?;

            let result = step.perform().await;
            self.leave(&result);
            if let Err(err) = result {
                if !err.is_cancelled() {
                    warn!(step = index, error = %err, "sequence step failed");
                }
                return Err(err);
            }
        }

        let mut control = self.control();
        control.state = SequenceState::Succeeded;
        debug!(steps = self.steps.len(), "sequence succeeded");
        Ok(())
    }

    fn cancel(&self) {
        let mut control = self.control();
        if control.cancelled {
            return;
        }
        control.cancelled = true;
        if control.state == SequenceState::NotStarted {
            control.state = SequenceState::Cancelled;
        }

        if let Some(index) = control.current {
            debug!(step = index, "cancelling running step");
            self.steps[index].cancel();
        }
    }
}
