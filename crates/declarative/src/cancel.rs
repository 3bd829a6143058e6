//! Cooperative cancellation
//!
//! A [`CancellationToken`] is threaded through every apply call via the
//! [`Scope`](crate::scope::Scope). The reconciler checks it before each
//! resource; long-running content producers check it between chunks.

use crate::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag
///
/// Clones observe the same flag, so a token handed to another thread (for
/// example a signal handler) can stop an in-flight apply.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Error::Cancelled` if cancellation has been requested
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
