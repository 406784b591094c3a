use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Progress and cooperative cancellation shared by every worker of a run.
#[derive(Debug, Default)]
pub struct ProgressVisitor {
    canceled: AtomicBool,
    steps_done: AtomicUsize,
}

impl ProgressVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    /// Asks every worker to stop before its next receiver.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// Marks one receiver as done.
    pub fn end_step(&self) {
        self.steps_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn steps_done(&self) -> usize {
        self.steps_done.load(Ordering::Relaxed)
    }
}
