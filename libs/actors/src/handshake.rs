//! Startup handshake
//!
//! One `handshake` request per attempt, sent on a scheduled tick. Only
//! timeouts are retried, and only while fewer than `max_tries` attempts were
//! made; every other failure is final.

use crate::error::HandshakeError;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warden_config::HandshakeSettings;
use warden_exchange::Requester;
use warden_types::{
    mtype, CancellationReason, CancellationSource, CancellationToken, Message, SharedScheduler,
    TaskHandle,
};

/// Final outcome: the handshake reply payload or the reason it failed
pub type HandshakeOutcome = std::result::Result<Value, HandshakeError>;

struct Shared {
    attempts: AtomicU32,
    outcome: watch::Sender<Option<HandshakeOutcome>>,
}

impl Shared {
    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// First outcome wins
    fn settle(&self, outcome: HandshakeOutcome) -> bool {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }
}

/// One-shot startup negotiation over a [`Requester`]
pub struct Handshake {
    name: String,
    requester: Arc<dyn Requester>,
    settings: HandshakeSettings,
    payload: Value,
    scheduler: SharedScheduler,
    shared: Arc<Shared>,
    started: AtomicBool,
    cancel: CancellationSource,
    task: Mutex<Option<TaskHandle>>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("name", &self.name)
            .field("attempts", &self.attempts())
            .field("settled", &self.outcome().is_some())
            .finish()
    }
}

impl Handshake {
    pub fn new(
        name: impl Into<String>,
        requester: Arc<dyn Requester>,
        settings: HandshakeSettings,
        scheduler: SharedScheduler,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            name: name.into(),
            requester,
            settings,
            payload: Value::Null,
            scheduler,
            shared: Arc::new(Shared {
                attempts: AtomicU32::new(0),
                outcome,
            }),
            started: AtomicBool::new(false),
            cancel: CancellationSource::new(),
            task: Mutex::new(None),
        }
    }

    /// Payload sent with every `handshake` request
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Begin negotiating; may be called once
    pub fn start(&self) -> Result<(), HandshakeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HandshakeError::AlreadyStarted);
        }

        let attempt = Attempt {
            name: self.name.clone(),
            requester: Arc::clone(&self.requester),
            timeout: self.settings.timeout(),
            max_tries: self.settings.max_tries.max(1),
            retry_delay: self.settings.retry_delay(),
            payload: self.payload.clone(),
            scheduler: self.scheduler.clone(),
            shared: Arc::clone(&self.shared),
            token: self.cancel.token(),
        };
        debug!(handshake = %self.name, max_tries = attempt.max_tries, "Handshake started");
        *self.task.lock() = Some(self.scheduler.spawn(Box::pin(attempt.run())));
        Ok(())
    }

    /// Reject with [`HandshakeError::Cancelled`]; the attempt count is kept
    pub fn cancel(&self) {
        if self.cancel.cancel(CancellationReason::UserCancel) {
            let attempts = self.shared.attempts();
            if self.shared.settle(Err(HandshakeError::Cancelled { attempts })) {
                info!(handshake = %self.name, attempts, "Handshake cancelled");
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.shared.attempts()
    }

    pub fn outcome(&self) -> Option<HandshakeOutcome> {
        self.shared.outcome.borrow().clone()
    }

    /// Wait for the final outcome
    pub async fn wait(&self) -> HandshakeOutcome {
        let mut rx = self.shared.outcome.subscribe();
        let settled = rx.wait_for(Option::is_some).await.ok().and_then(|o| (*o).clone());
        settled.unwrap_or(Err(HandshakeError::Cancelled {
            attempts: self.shared.attempts(),
        }))
    }
}

impl Drop for Handshake {
    fn drop(&mut self) {
        self.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

struct Attempt {
    name: String,
    requester: Arc<dyn Requester>,
    timeout: Duration,
    max_tries: u32,
    retry_delay: Duration,
    payload: Value,
    scheduler: SharedScheduler,
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl Attempt {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.scheduler.tick() => {}
                _ = self.token.cancelled() => return,
            }
            let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let request = Message::new(mtype::HANDSHAKE, self.payload.clone());

            let result = tokio::select! {
                result = self.requester.send_and_receive(request, self.timeout) => result,
                _ = self.token.cancelled() => return,
            };

            match result {
                Ok(reply) => {
                    info!(handshake = %self.name, attempts = attempt, "Handshake complete");
                    self.shared.settle(Ok(reply.payload));
                    return;
                }
                Err(e) if e.is_timeout() && attempt < self.max_tries => {
                    warn!(
                        handshake = %self.name,
                        attempt,
                        max_tries = self.max_tries,
                        "Handshake timed out, retrying"
                    );
                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            _ = self.scheduler.sleep(self.retry_delay) => {}
                            _ = self.token.cancelled() => return,
                        }
                    }
                }
                Err(e) => {
                    warn!(handshake = %self.name, attempts = attempt, error = %e, "Handshake failed");
                    self.shared.settle(Err(HandshakeError::Failed {
                        attempts: attempt,
                        source: e,
                    }));
                    return;
                }
            }
        }
    }
}
