use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

/// One cancellable stage of a task's lifecycle.
///
/// `cancel` may be called from another task while `perform` is in flight;
/// steps that block must watch for it themselves.
#[async_trait]
pub trait Step: Send + Sync {
    async fn perform(&self) -> Result<()>;

    fn cancel(&self);
}

pub type BoxedStep = Box<dyn Step>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceState::Succeeded | SequenceState::Failed | SequenceState::Cancelled
        )
    }
}

/// Single-use, fail-fast, ordered composition of steps.
pub struct Sequence {
    pub(super) steps: Vec<BoxedStep>,
    pub(super) control: Mutex<SequenceControl>,
}

pub(super) struct SequenceControl {
    pub state: SequenceState,
    pub current: Option<usize>,
    pub cancelled: bool,
}

pub type StepBuilder<C> = Box<dyn Fn(&C) -> Result<Vec<BoxedStep>> + Send + Sync>;

/// Step whose inner steps are built from the shared context when it starts.
pub struct LazySequence<C> {
    pub(super) context: Arc<tokio::sync::Mutex<C>>,
    pub(super) build: StepBuilder<C>,
    pub(super) inner: Mutex<LazyControl>,
}

#[derive(Default)]
pub(super) struct LazyControl {
    pub cancelled: bool,
    pub sequence: Option<Arc<Sequence>>,
}

/// Fire-once cancellation flag that blocking steps can await.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    pub(super) sender: Arc<watch::Sender<bool>>,
}
