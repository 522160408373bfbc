//! Step lifecycle status: a small state machine guarded by a reentrant lock
//! so that a step's own status-check callback can safely re-enter its own
//! mutators (`set_running`, `set_finished`, ...) while the check is in
//! flight.

use std::fmt;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;

/// The subset of [`Stage`] a step can legitimately be "checked" from, and
/// the stage [`CheckStatusException`] reverts back to on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnableStage {
    Pending,
    Validated,
    Running,
}

impl From<RunnableStage> for Stage {
    fn from(r: RunnableStage) -> Self {
        match r {
            RunnableStage::Pending => Stage::Pending,
            RunnableStage::Validated => Stage::Validated,
            RunnableStage::Running => Stage::Running,
        }
    }
}

/// A step's lifecycle stage. `Failed` carries the error that caused it,
/// wrapped in an `Arc` so a snapshot can be cloned out of the lock cheaply.
#[derive(Debug, Clone)]
pub enum Stage {
    Pending,
    Validated,
    Running,
    Finished,
    Failed(StepFailure),
}

impl PartialEq for Stage {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Stage::Pending, Stage::Pending)
                | (Stage::Validated, Stage::Validated)
                | (Stage::Running, Stage::Running)
                | (Stage::Finished, Stage::Finished)
        ) || matches!((self, other), (Stage::Failed(_), Stage::Failed(_)))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pending => write!(f, "pending"),
            Stage::Validated => write!(f, "validated"),
            Stage::Running => write!(f, "running"),
            Stage::Finished => write!(f, "finished"),
            Stage::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// The error that put a step into [`Stage::Failed`], either raised directly
/// by the step or wrapping a panic-equivalent error from a status check
/// callback.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub error: Arc<anyhow::Error>,
    /// Set when the failure came from a status-check callback rather than
    /// the step itself, so the stage it interrupted can be recovered.
    pub previous_stage: Option<RunnableStage>,
}

impl StepFailure {
    pub fn new(error: anyhow::Error) -> Self {
        Self { error: Arc::new(error), previous_stage: None }
    }

    pub fn from_check(error: anyhow::Error, previous_stage: RunnableStage) -> Self {
        Self { error: Arc::new(error), previous_stage: Some(previous_stage) }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

struct StatusInner {
    stage: Stage,
}

/// Thread-safe lifecycle status for a single step.
///
/// The lock is reentrant: a status-check callback invoked from [`Status::check`]
/// is free to call `set_running`/`set_finished`/`set_failed` on this same
/// `Status` without deadlocking, because no borrow is held across the call
/// into the callback.
pub struct Status {
    label: String,
    inner: ReentrantMutex<RefCell<StatusInner>>,
}

impl Status {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            inner: ReentrantMutex::new(RefCell::new(StatusInner { stage: Stage::Pending })),
        }
    }

    fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<StatusInner>> {
        self.inner.lock()
    }

    pub fn stage(&self) -> Stage {
        self.lock().borrow().stage.clone()
    }

    pub fn set_pending(&self) {
        let guard = self.lock();
        guard.borrow_mut().stage = Stage::Pending;
        tracing::info!(step = %self.label, "set to pending");
    }

    pub fn set_validated(&self) {
        let guard = self.lock();
        guard.borrow_mut().stage = Stage::Validated;
        tracing::info!(step = %self.label, "set to validated");
    }

    pub fn set_running(&self) {
        let guard = self.lock();
        guard.borrow_mut().stage = Stage::Running;
        tracing::info!(step = %self.label, "set to running");
    }

    pub fn set_finished(&self) {
        let guard = self.lock();
        guard.borrow_mut().stage = Stage::Finished;
        tracing::info!(step = %self.label, "set to finished");
    }

    pub fn set_failed(&self, error: anyhow::Error) {
        let guard = self.lock();
        guard.borrow_mut().stage = Stage::Failed(StepFailure::new(error));
        tracing::error!(step = %self.label, "step failed");
    }

    fn set_failed_from_check(&self, error: anyhow::Error, previous: RunnableStage) {
        let guard = self.lock();
        guard.borrow_mut().stage = Stage::Failed(StepFailure::from_check(error, previous));
        tracing::error!(step = %self.label, "status check callback failed");
    }

    pub fn pending(&self) -> bool {
        matches!(self.stage(), Stage::Pending)
    }

    pub fn running(&self) -> bool {
        matches!(self.stage(), Stage::Running)
    }

    pub fn validated(&self) -> bool {
        matches!(self.stage(), Stage::Validated)
    }

    pub fn finished(&self) -> bool {
        matches!(self.stage(), Stage::Finished)
    }

    pub fn failed(&self) -> bool {
        matches!(self.stage(), Stage::Failed(_))
    }

    pub fn runnable_stage(&self) -> Option<RunnableStage> {
        match self.stage() {
            Stage::Pending => Some(RunnableStage::Pending),
            Stage::Validated => Some(RunnableStage::Validated),
            Stage::Running => Some(RunnableStage::Running),
            _ => None,
        }
    }

    /// Force the stage back to `stage`, bypassing the normal transition
    /// methods. Used by the prompt-based recovery path to implement
    /// `CheckStatusException::revert`.
    pub fn revert_to(&self, stage: RunnableStage) {
        let guard = self.lock();
        guard.borrow_mut().stage = stage.into();
        tracing::info!(step = %self.label, stage = %Stage::from(stage), "reverted");
    }

    /// Invoke `f` if this status is still runnable (pending, validated, or
    /// running). If `f` errors, the status moves to `Failed`, recording the
    /// stage it was in so the caller could in principle revert.
    ///
    /// `f` is called with no lock held, so it may freely call back into this
    /// `Status`'s own mutators.
    pub fn check<F>(&self, f: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let previous = self.runnable_stage();
        let Some(previous) = previous else { return };
        tracing::debug!(step = %self.label, "checking status");
        if let Err(e) = f() {
            self.set_failed_from_check(e, previous);
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status").field("label", &self.label).field("stage", &self.stage()).finish()
    }
}
