use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The single execution slot of a worker process.
///
/// Acquisition never waits: `try_acquire` returns `None` when another job
/// holds the slot, which callers report as busy. Dropping the returned
/// [`ExecutionGuard`] frees the slot.
#[derive(Debug, Clone)]
pub struct ExecutionPermit {
    slot: Arc<Semaphore>,
}

/// Proof of holding the execution slot.
#[derive(Debug)]
pub struct ExecutionGuard {
    _permit: OwnedSemaphorePermit,
}

impl Default for ExecutionPermit {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPermit {
    /// Create a permit that starts out available.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn try_acquire(&self) -> Option<ExecutionGuard> {
        Arc::clone(&self.slot)
            .try_acquire_owned()
            .ok()
            .map(|permit| ExecutionGuard { _permit: permit })
    }

    pub fn is_available(&self) -> bool {
        self.slot.available_permits() > 0
    }
}
