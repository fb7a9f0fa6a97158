//! Cancellation primitives
//!
//! A [`CancellationSource`] controls cancellation; any number of cloned
//! [`CancellationToken`]s observe it, either by polling or by awaiting
//! [`CancellationToken::cancelled`].

use std::fmt;
use tokio::sync::watch;

/// Why an operation was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    /// Caller asked for cancellation
    UserCancel,
    /// Owning object was disposed
    Disposed,
    /// Owner moved on to a newer operation
    Superseded,
    /// Custom reason with description
    Custom(String),
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::UserCancel => write!(f, "user cancelled"),
            CancellationReason::Disposed => write!(f, "disposed"),
            CancellationReason::Superseded => write!(f, "superseded"),
            CancellationReason::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

/// Controller that triggers cancellation
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<Option<CancellationReason>>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel with `reason`; returns false if already cancelled
    pub fn cancel(&self, reason: CancellationReason) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable observer of a [`CancellationSource`]
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<Option<CancellationReason>>,
}

impl CancellationToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CancellationReason> {
        self.rx.borrow().clone()
    }

    /// Resolves once cancelled; pends forever if the source is dropped uncancelled
    pub async fn cancelled(&self) -> CancellationReason {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
