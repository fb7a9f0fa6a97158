//! Channel ownership capability

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SENTINEL: AtomicU64 = AtomicU64::new(1);

/// Unforgeable ownership token.
///
/// Every sentinel carries a process-unique id and cannot be cloned, so only
/// the component that created it can present it to [`crate::Channel::publish`].
#[derive(Debug, PartialEq, Eq)]
pub struct Sentinel {
    id: u64,
}

impl Sentinel {
    pub fn new() -> Self {
        Self {
            id: NEXT_SENTINEL.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new()
    }
}
