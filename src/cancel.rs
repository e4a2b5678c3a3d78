//! Cooperative cancellation for a running job.
//!
//! The scheduler polls the token at the top of every chunk and every batch.
//! A generation call already in flight runs to its own deadline first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable, one-shot cancellation flag.
///
/// Clones share the flag: cancel from a signal handler or UI thread, observe
/// from the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next checkpoint.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested and not yet observed.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Observe and clear the flag. Returns true exactly once per `cancel()`.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}
