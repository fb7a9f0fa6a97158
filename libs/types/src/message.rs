//! Message Model
//!
//! In-memory message representation shared by channels, exchanges and
//! transports. Transports own the mapping to real wire formats; the
//! `serde` derives here only describe the portable subset of a message
//! (the reply continuation never leaves the realm that created it).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Well-known message types used by the core itself
pub mod mtype {
    /// Envelope produced by transports for incoming requests
    pub const LOCAL_DISPATCH: &str = "localDispatch";
    /// Startup negotiation request
    pub const HANDSHAKE: &str = "handshake";
    /// Liveness probe
    pub const HEALTH_CHECK: &str = "healthCheck";
    /// Announces an upcoming termination
    pub const WILL_TERM: &str = "willTerm";
    /// Requests termination
    pub const TERM: &str = "term";
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Portable error carried by reply messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorValue {
    pub code: String,
    pub message: String,
}

impl ErrorValue {
    pub const TIMEOUT: &'static str = "timeout";
    pub const UNHANDLED: &'static str = "unhandled";
    pub const HANDLER: &'static str = "handler";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error reported by a remote unit that itself timed out
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Self::TIMEOUT, message)
    }

    /// Error raised by a handler on the remote side
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(Self::HANDLER, message)
    }
}

/// Outcome a responder hands back for a dispatched request
pub type ReplyOutcome = std::result::Result<Value, ErrorValue>;

/// Opaque reply continuation embedded in `localDispatch` envelopes
#[derive(Clone)]
pub struct ReplyHandle {
    inner: Arc<dyn Fn(ReplyOutcome) + Send + Sync>,
}

impl ReplyHandle {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ReplyOutcome) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Reply handle that discards every outcome
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn reply(&self, outcome: ReplyOutcome) {
        (self.inner)(outcome)
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReplyHandle(..)")
    }
}

/// Body of a `localDispatch` envelope: the original request's type and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchBody {
    #[serde(rename = "mType")]
    pub m_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Core message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub msg_id: MessageId,
    pub m_type: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_msg_id: Option<MessageId>,
    #[serde(skip)]
    pub reply_handle: Option<ReplyHandle>,
}

impl Message {
    /// Create a new message with a freshly generated id
    pub fn new(m_type: impl Into<String>, payload: Value) -> Self {
        Self {
            msg_id: MessageId::new(),
            m_type: m_type.into(),
            payload,
            timestamp: current_timestamp_ms(),
            in_reply_to: None,
            error: None,
            original_msg_id: None,
            reply_handle: None,
        }
    }

    /// Successful reply to `original`
    pub fn reply_to(original: &Message, payload: Value) -> Self {
        let mut reply = Self::new(original.m_type.clone(), payload);
        reply.in_reply_to = Some(original.msg_id);
        reply
    }

    /// Failed reply to `original`
    pub fn error_reply(original: &Message, error: ErrorValue) -> Self {
        let mut reply = Self::new(original.m_type.clone(), Value::Null);
        reply.in_reply_to = Some(original.msg_id);
        reply.error = Some(error);
        reply
    }

    /// Reply built from a responder outcome
    pub fn from_outcome(original: &Message, outcome: ReplyOutcome) -> Self {
        match outcome {
            Ok(payload) => Self::reply_to(original, payload),
            Err(error) => Self::error_reply(original, error),
        }
    }

    /// Wrap an incoming request into a `localDispatch` envelope
    pub fn local_dispatch(original: &Message, reply: ReplyHandle) -> Self {
        let mut envelope = Self::new(
            mtype::LOCAL_DISPATCH,
            json!({
                "mType": original.m_type,
                "payload": original.payload,
            }),
        );
        envelope.original_msg_id = Some(original.msg_id);
        envelope.reply_handle = Some(reply);
        envelope
    }

    /// Unwrap the body of a `localDispatch` envelope
    pub fn dispatch_body(&self) -> Option<DispatchBody> {
        if !self.is_local_dispatch() {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Replace the message id, returning the new one
    pub fn regenerate_id(&mut self) -> MessageId {
        self.msg_id = MessageId::new();
        self.msg_id
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }

    pub fn is_local_dispatch(&self) -> bool {
        self.m_type == mtype::LOCAL_DISPATCH
    }
}
