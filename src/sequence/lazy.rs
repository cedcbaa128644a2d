use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::types::{BoxedStep, LazyControl, LazySequence, Sequence, Step};
use crate::error::{ExecutorError, Result};

impl<C: Send + 'static> LazySequence<C> {
    pub fn new<F>(context: Arc<tokio::sync::Mutex<C>>, build: F) -> Self
    where
        F: Fn(&C) -> Result<Vec<BoxedStep>> + Send + Sync + 'static,
    {
        LazySequence {
            context,
            build: Box::new(build),
            inner: Mutex::new(LazyControl::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, LazyControl> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<C: Send + 'static> Step for LazySequence<C> {
    async fn perform(&self) -> Result<()> {
        if self.inner().cancelled {
            return Err(ExecutorError::Cancelled);
        }

        let steps = {
            let context = self.context.lock().await;
            (self.build)(&*context)?
        };
        debug!(steps = steps.len(), "built lazy sequence");
        let sequence = Arc::new(Sequence::new(steps));

        {
            let mut inner = self.inner();
            if inner.sequence.is_some() {
                return Err(ExecutorError::AlreadyPerformed);
            }
            if inner.cancelled {
                return Err(ExecutorError::Cancelled);
            }
            inner.sequence = Some(sequence.clone());
        }

        sequence.perform().await
    }

    fn cancel(&self) {
        let mut inner = self.inner();
        inner.cancelled = true;
        if let Some(sequence) = &inner.sequence {
            sequence.cancel();
        }
    }
}
