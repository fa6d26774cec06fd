//! Cooperative cancellation for long-running validations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BundleValidatorError, Result};

/// Cancellation token shared between a caller and a running validation.
///
/// Checked between pipeline stages and inside the per-element loops of the
/// grammar walker and rule engine. Cancelling discards the output; nothing
/// partial is ever returned.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BundleValidatorError::Cancelled)
        } else {
            Ok(())
        }
    }
}
