//! Name-based request routing onto a delegate

use crate::dispatcher::{DispatchContext, Reply, Responder};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use warden_types::ReplyOutcome;

/// Name of the fallback handler
pub const UNHANDLED: &str = "onMsgUnhandled";

/// Handler name for a message type: `"onMsg" + Capitalize(m_type)`
pub fn handler_name(m_type: &str) -> String {
    let mut chars = m_type.chars();
    match chars.next() {
        Some(first) => format!("onMsg{}{}", first.to_uppercase(), chars.as_str()),
        None => "onMsg".to_string(),
    }
}

/// Handler bound to a message type
pub type Handler<D> = Arc<dyn Fn(&D, &DispatchContext, Value, Reply) + Send + Sync>;

/// Fallback handler; also receives the message type
pub type UnhandledHandler<D> = Arc<dyn Fn(&D, &DispatchContext, &str, Value, Reply) + Send + Sync>;

/// Cross-cutting hooks around every routed request
pub trait DispatchObserver: Send + Sync {
    fn before_dispatch(&self, _ctx: &DispatchContext, _m_type: &str, _payload: &Value) {}

    /// Sees the handler's reply before it is sent
    fn after_dispatch(&self, _ctx: &DispatchContext, _m_type: &str, _outcome: &ReplyOutcome) {}
}

/// [`Responder`] that calls `onMsg<Type>` handlers registered for a delegate.
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use warden_exchange::{handler_name, InvocationRouter};
///
/// struct Greeter;
///
/// let router = InvocationRouter::new(Arc::new(Greeter))
///     .handle("hello", |_greeter, _ctx, _payload, reply| reply.ok(json!("hi")));
/// assert!(router.has_handler(&handler_name("hello")));
/// assert_eq!(handler_name("fetchTitle"), "onMsgFetchTitle");
/// ```
pub struct InvocationRouter<D> {
    delegate: Arc<D>,
    handlers: HashMap<String, Handler<D>>,
    unhandled: Option<UnhandledHandler<D>>,
    observer: Option<Arc<dyn DispatchObserver>>,
}

impl<D: Send + Sync + 'static> InvocationRouter<D> {
    pub fn new(delegate: Arc<D>) -> Self {
        Self {
            delegate,
            handlers: HashMap::new(),
            unhandled: None,
            observer: None,
        }
    }

    /// Register the handler for `m_type` under its derived name
    pub fn handle<F>(mut self, m_type: &str, handler: F) -> Self
    where
        F: Fn(&D, &DispatchContext, Value, Reply) + Send + Sync + 'static,
    {
        self.handlers.insert(handler_name(m_type), Arc::new(handler));
        self
    }

    /// Register the `onMsgUnhandled` fallback
    pub fn unhandled<F>(mut self, handler: F) -> Self
    where
        F: Fn(&D, &DispatchContext, &str, Value, Reply) + Send + Sync + 'static,
    {
        self.unhandled = Some(Arc::new(handler));
        self
    }

    pub fn observe(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn delegate(&self) -> &Arc<D> {
        &self.delegate
    }

    pub fn has_handler(&self, name: &str) -> bool {
        if name == UNHANDLED {
            return self.unhandled.is_some();
        }
        self.handlers.contains_key(name)
    }

    fn bracket(&self, ctx: &DispatchContext, m_type: &str, payload: &Value, reply: Reply) -> Reply {
        let Some(observer) = &self.observer else {
            return reply;
        };
        observer.before_dispatch(ctx, m_type, payload);

        let observer = Arc::clone(observer);
        let ctx = ctx.clone();
        let m_type = m_type.to_string();
        reply.observed(move |outcome| observer.after_dispatch(&ctx, &m_type, outcome))
    }
}

impl<D: Send + Sync + 'static> Responder for InvocationRouter<D> {
    fn invoke(&self, ctx: &DispatchContext, m_type: &str, payload: Value, reply: Reply) {
        let name = handler_name(m_type);
        if let Some(handler) = self.handlers.get(&name) {
            trace!(handler = %name, "Routing to handler");
            let reply = self.bracket(ctx, m_type, &payload, reply);
            handler(&self.delegate, ctx, payload, reply);
        } else if let Some(fallback) = &self.unhandled {
            trace!(handler = UNHANDLED, m_type = %m_type, "Routing to fallback");
            let reply = self.bracket(ctx, m_type, &payload, reply);
            fallback(&self.delegate, ctx, m_type, payload, reply);
        } else {
            debug!(m_type = %m_type, "No handler, message dropped");
        }
    }
}
