//! Cooperative cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{LodeError, LodeResult};

/// Cooperative cancellation.
///
/// Long-running operations (pipeline drives, index scans, embedding
/// calls) check the token at step boundaries and unwind without partial
/// writes beyond the current step.
pub trait Cancellable {
    /// Check if cancellation has been requested.
    fn is_cancelled(&self) -> bool;

    /// Request cancellation.
    fn cancel(&self);
}

/// Default implementation of a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> LodeResult<()> {
        if self.is_cancelled() {
            Err(LodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Cancellable for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
