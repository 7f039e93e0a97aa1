//! Cooperative cancellation for in-flight asynchronous work.
//!
//! Tokens are cloned into translation fetches and checked at suspension
//! points. Cancelling a token never interrupts work mid-step; the holder
//! notices at its next check and unwinds with [`Error::Cancelled`].

use crate::error::{Error, Result};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Bail out of the named stage if this token was cancelled.
    pub fn check_cancelled(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(stage));
        }
        Ok(())
    }
}
