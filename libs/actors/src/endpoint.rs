//! Child side of a supervised process

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use warden_exchange::{DispatchContext, Reply, Responder};
use warden_types::{mtype, ErrorValue};

/// Answers the supervisor's system messages (`handshake`, `healthCheck`,
/// `willTerm`, `term`) and hands every other request to the application
/// responder.
///
/// Individual message types can be silenced at runtime; a silenced request
/// is never answered, which is how an unresponsive unit looks from outside.
pub struct ProcessEndpoint {
    name: String,
    app: Option<Arc<dyn Responder>>,
    silenced: Mutex<HashSet<String>>,
    terminating: AtomicBool,
    terminated: AtomicBool,
    handshakes: AtomicU64,
    health_checks: AtomicU64,
}

impl std::fmt::Debug for ProcessEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEndpoint")
            .field("name", &self.name)
            .field("terminating", &self.is_terminating())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl ProcessEndpoint {
    pub fn new(name: impl Into<String>, app: Option<Arc<dyn Responder>>) -> Self {
        Self {
            name: name.into(),
            app,
            silenced: Mutex::new(HashSet::new()),
            terminating: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            handshakes: AtomicU64::new(0),
            health_checks: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop answering `m_type`
    pub fn silence(&self, m_type: &str) {
        self.silenced.lock().insert(m_type.to_string());
    }

    pub fn unsilence(&self, m_type: &str) {
        self.silenced.lock().remove(m_type);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> u64 {
        self.health_checks.load(Ordering::SeqCst)
    }
}

impl Responder for ProcessEndpoint {
    fn invoke(&self, ctx: &DispatchContext, m_type: &str, payload: Value, reply: Reply) {
        if self.silenced.lock().contains(m_type) {
            debug!(endpoint = %self.name, m_type = %m_type, "Silenced, not answering");
            return;
        }

        match m_type {
            mtype::HANDSHAKE => {
                self.handshakes.fetch_add(1, Ordering::SeqCst);
                reply.ok(json!({ "name": self.name, "ready": true }));
            }
            mtype::HEALTH_CHECK => {
                self.health_checks.fetch_add(1, Ordering::SeqCst);
                reply.ok(json!({ "healthy": !self.is_terminated() }));
            }
            mtype::WILL_TERM => {
                self.terminating.store(true, Ordering::SeqCst);
                reply.ok(Value::Null);
            }
            mtype::TERM => {
                self.terminated.store(true, Ordering::SeqCst);
                info!(endpoint = %self.name, "Terminated by supervisor");
                reply.ok(Value::Null);
            }
            _ if self.is_terminated() => {
                reply.err(ErrorValue::new("terminated", format!("{} is terminated", self.name)));
            }
            _ => match &self.app {
                Some(app) => app.invoke(ctx, m_type, payload, reply),
                None => reply.err(ErrorValue::new(
                    ErrorValue::UNHANDLED,
                    format!("{} has no handler for {}", self.name, m_type),
                )),
            },
        }
    }
}
