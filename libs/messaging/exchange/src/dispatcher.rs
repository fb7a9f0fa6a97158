//! Incoming request dispatch

use crate::exchange::Exchange;
use crate::error::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use warden_channels::{CompositeChannel, Sentinel, SubscriberRef};
use warden_types::{ErrorValue, Message, MessageId, ReplyHandle, ReplyOutcome};

/// Where a dispatched request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Dispatcher that delivered the request
    pub dispatcher: String,
    /// Id of the `localDispatch` envelope
    pub envelope_id: MessageId,
    /// Id of the request as the remote side sent it
    pub original_msg_id: Option<MessageId>,
}

/// Single-use reply continuation handed to a [`Responder`].
///
/// Dropping it without answering leaves the requester to time out.
#[derive(Debug)]
pub struct Reply {
    handle: ReplyHandle,
}

impl Reply {
    pub fn new(handle: ReplyHandle) -> Self {
        Self { handle }
    }

    /// Reply that goes nowhere
    pub fn detached() -> Self {
        Self::new(ReplyHandle::noop())
    }

    pub fn send(self, outcome: ReplyOutcome) {
        self.handle.reply(outcome)
    }

    pub fn ok(self, payload: Value) {
        self.send(Ok(payload))
    }

    pub fn err(self, error: ErrorValue) {
        self.send(Err(error))
    }

    /// Run `observe` on the outcome before it is sent
    pub fn observed<F>(self, observe: F) -> Reply
    where
        F: Fn(&ReplyOutcome) + Send + Sync + 'static,
    {
        let inner = self.handle;
        Reply::new(ReplyHandle::new(move |outcome| {
            observe(&outcome);
            inner.reply(outcome);
        }))
    }
}

/// Handles unwrapped requests
pub trait Responder: Send + Sync {
    fn invoke(&self, ctx: &DispatchContext, m_type: &str, payload: Value, reply: Reply);
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub dropped: u64,
}

struct DispatcherInner {
    name: String,
    sentinel: Arc<Sentinel>,
    inbox: CompositeChannel<Message>,
    responder: Arc<dyn Responder>,
    enabled: AtomicBool,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

/// Fans in the dispatch channels of one or more exchanges and hands every
/// `localDispatch` envelope to a [`Responder`] while enabled.
///
/// A new dispatcher starts disabled; envelopes arriving while disabled are
/// dropped, not queued.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    subscriber: SubscriberRef<Message>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.inner.name)
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, responder: Arc<dyn Responder>) -> Self {
        let name = name.into();
        let sentinel = Arc::new(Sentinel::new());
        let inner = Arc::new(DispatcherInner {
            inbox: CompositeChannel::new(format!("{}.inbox", name), &sentinel),
            name,
            sentinel,
            responder,
            enabled: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let weak: Weak<DispatcherInner> = Arc::downgrade(&inner);
        let subscriber: SubscriberRef<Message> = Arc::new(move |envelope: &Message| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(envelope);
            }
        });
        // Fresh composite, fresh subscriber
        let _ = inner.inbox.subscribe(Arc::clone(&subscriber));

        Self { inner, subscriber }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Start receiving envelopes from `exchange`
    pub fn attach(&self, exchange: &Exchange) -> Result<()> {
        self.inner.inbox.join(exchange.dispatch_channel())?;
        debug!(dispatcher = %self.inner.name, exchange = %exchange.name(), "Attached");
        Ok(())
    }

    /// Stop receiving from `exchange`; false if it was not attached
    pub fn detach(&self, exchange: &Exchange) -> bool {
        self.inner.inbox.leave(exchange.dispatch_channel())
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Detach from every exchange and stop dispatching
    pub fn dispose(&self) {
        self.disable();
        self.inner.inbox.unsubscribe(&self.subscriber);
        let _ = self.inner.inbox.dispose(&self.inner.sentinel);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl DispatcherInner {
    fn dispatch(&self, envelope: &Message) {
        if !self.enabled.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(dispatcher = %self.name, msg_id = %envelope.msg_id, "Disabled, envelope dropped");
            return;
        }
        let Some(body) = envelope.dispatch_body() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                dispatcher = %self.name,
                msg_id = %envelope.msg_id,
                m_type = %envelope.m_type,
                "Not a dispatch envelope, dropped"
            );
            return;
        };

        let ctx = DispatchContext {
            dispatcher: self.name.clone(),
            envelope_id: envelope.msg_id,
            original_msg_id: envelope.original_msg_id,
        };
        let reply = envelope
            .reply_handle
            .clone()
            .map_or_else(Reply::detached, Reply::new);

        debug!(dispatcher = %self.name, m_type = %body.m_type, "Dispatching");
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.responder.invoke(&ctx, &body.m_type, body.payload, reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use warden_channels::MessageBus;
    use warden_types::default_scheduler;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl Responder for Recorder {
        fn invoke(&self, _ctx: &DispatchContext, m_type: &str, payload: Value, reply: Reply) {
            self.calls.lock().push((m_type.to_string(), payload.clone()));
            reply.ok(payload);
        }
    }

    fn envelope(m_type: &str, replies: &Arc<Mutex<Vec<ReplyOutcome>>>) -> Message {
        let sink = Arc::clone(replies);
        Message::local_dispatch(
            &Message::new(m_type, json!({"from": m_type})),
            ReplyHandle::new(move |outcome| sink.lock().push(outcome)),
        )
    }

    #[tokio::test]
    async fn test_dispatch_only_while_enabled() {
        let ingress = MessageBus::new("ingress");
        let exchange = Exchange::new("x", default_scheduler());
        exchange.listen(ingress.channel()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new("d", recorder.clone());
        dispatcher.attach(&exchange).unwrap();
        let replies = Arc::new(Mutex::new(Vec::new()));

        ingress.publish(&envelope("early", &replies)).unwrap();
        dispatcher.enable();
        ingress.publish(&envelope("ping", &replies)).unwrap();
        dispatcher.disable();
        ingress.publish(&envelope("late", &replies)).unwrap();

        assert_eq!(*recorder.calls.lock(), vec![("ping".to_string(), json!({"from": "ping"}))]);
        assert_eq!(*replies.lock(), vec![Ok(json!({"from": "ping"}))]);
        assert_eq!(dispatcher.stats(), DispatchStats { dispatched: 1, dropped: 2 });
    }

    #[tokio::test]
    async fn test_fan_in_and_detach() {
        let ingress_a = MessageBus::new("a");
        let ingress_b = MessageBus::new("b");
        let a = Exchange::new("a", default_scheduler());
        let b = Exchange::new("b", default_scheduler());
        a.listen(ingress_a.channel()).unwrap();
        b.listen(ingress_b.channel()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new("d", recorder.clone());
        dispatcher.attach(&a).unwrap();
        dispatcher.attach(&b).unwrap();
        assert!(dispatcher.attach(&a).is_err());
        dispatcher.enable();

        let replies = Arc::new(Mutex::new(Vec::new()));
        ingress_a.publish(&envelope("one", &replies)).unwrap();
        ingress_b.publish(&envelope("two", &replies)).unwrap();
        assert!(dispatcher.detach(&a));
        assert!(!dispatcher.detach(&a));
        ingress_a.publish(&envelope("three", &replies)).unwrap();

        let types: Vec<String> = recorder.calls.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(types, vec!["one", "two"]);
    }

    #[test]
    fn test_observed_reply_sees_outcome_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let sent = Arc::clone(&order);
        let seen = Arc::clone(&order);

        let reply = Reply::new(ReplyHandle::new(move |_| sent.lock().push("sent")))
            .observed(move |outcome| {
                assert!(outcome.is_err());
                seen.lock().push("observed");
            });
        reply.err(ErrorValue::handler("x"));

        assert_eq!(*order.lock(), vec!["observed", "sent"]);
    }
}
