//! Disposal guard

use crate::error::{ChannelError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Rejects every operation once the owning object is disposed
#[derive(Debug)]
pub struct StateGuard {
    target: String,
    disposed: AtomicBool,
}

impl StateGuard {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Fails with [`ChannelError::Disposed`] naming `operation`
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(ChannelError::disposed(self.target.clone(), operation));
        }
        Ok(())
    }

    /// Mark disposed; true only for the first call
    pub fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}
