//! Transport strategies
//!
//! A transport sits between an [`Exchange`](crate::Exchange) and whatever
//! carries messages to the other side. Inbound, it publishes replies as-is
//! and wraps every other message into a `localDispatch` envelope whose reply
//! handle routes the answer back. Outbound, it forwards everything published
//! on the exchange's egress channel.

use crate::error::{ExchangeError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use warden_channels::{Channel, MessageBus, Sentinel, SubscriberRef};
use warden_types::{Message, ReplyHandle, SharedScheduler};

/// Pluggable bridge between an exchange and an external channel
pub trait TransportStrategy: Send + Sync {
    /// Inbound side: replies and `localDispatch` envelopes
    fn dispatch_channel(&self) -> Channel<Message>;

    /// Outbound side: carry everything published on `egress` to the peer
    fn forward(&self, egress: &Channel<Message>) -> Result<()>;

    /// Stop carrying `egress`; false if it was not forwarded
    fn unforward(&self, egress: &Channel<Message>) -> bool;

    /// Stop forwarding in both directions
    fn close(&self);

    fn is_closed(&self) -> bool;
}

struct Forwarded {
    egress: Channel<Message>,
    forwarder: SubscriberRef<Message>,
}

/// One end of an in-memory transport pair.
///
/// Each direction is a [`MessageBus`]; every hop is delivered on its own
/// scheduled task, never inline with the publish that caused it.
pub struct InMemoryTransport {
    name: String,
    sentinel: Arc<Sentinel>,
    inbound: Channel<Message>,
    outgoing: MessageBus<Message>,
    incoming: MessageBus<Message>,
    receiver: SubscriberRef<Message>,
    forwarded: Mutex<Vec<Forwarded>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl InMemoryTransport {
    /// Two connected ends named `<name>.a` and `<name>.b`
    pub fn pair(name: &str, scheduler: SharedScheduler) -> (Self, Self) {
        let a_to_b = MessageBus::new(format!("{}.a->b", name));
        let b_to_a = MessageBus::new(format!("{}.b->a", name));

        let a = Self::end(format!("{}.a", name), a_to_b.clone(), b_to_a.clone(), scheduler.clone());
        let b = Self::end(format!("{}.b", name), b_to_a, a_to_b, scheduler);
        (a, b)
    }

    fn end(
        name: String,
        outgoing: MessageBus<Message>,
        incoming: MessageBus<Message>,
        scheduler: SharedScheduler,
    ) -> Self {
        let sentinel = Arc::new(Sentinel::new());
        let inbound = Channel::new(format!("{}.dispatch", name), &sentinel);
        let closed = Arc::new(AtomicBool::new(false));

        let receiver: SubscriberRef<Message> = {
            let name = name.clone();
            let sentinel = Arc::clone(&sentinel);
            let inbound = inbound.clone();
            let replies = outgoing.clone();
            let closed = Arc::clone(&closed);
            Arc::new(move |message: &Message| {
                let message = message.clone();
                let name = name.clone();
                let sentinel = Arc::clone(&sentinel);
                let inbound = inbound.clone();
                let replies = replies.clone();
                let closed = Arc::clone(&closed);
                scheduler.spawn(Box::pin(async move {
                    if closed.load(Ordering::SeqCst) {
                        trace!(transport = %name, msg_id = %message.msg_id, "Closed, message dropped");
                        return;
                    }
                    let delivered = if message.is_reply() {
                        message
                    } else {
                        Self::wrap(&message, replies, Arc::clone(&closed))
                    };
                    let _ = inbound.publish(&sentinel, &delivered);
                }));
            })
        };
        // Fresh bus, fresh subscriber: cannot collide
        let _ = incoming.subscribe(Arc::clone(&receiver));

        Self {
            name,
            sentinel,
            inbound,
            outgoing,
            incoming,
            receiver,
            forwarded: Mutex::new(Vec::new()),
            closed,
        }
    }

    /// Envelope for an incoming request; answering it sends the reply back
    fn wrap(request: &Message, replies: MessageBus<Message>, closed: Arc<AtomicBool>) -> Message {
        let original = request.clone();
        Message::local_dispatch(
            request,
            ReplyHandle::new(move |outcome| {
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                let reply = Message::from_outcome(&original, outcome);
                let _ = replies.publish(&reply);
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Egress channels currently carried to the peer
    pub fn forwarding_count(&self) -> usize {
        self.forwarded.lock().len()
    }
}

impl TransportStrategy for InMemoryTransport {
    fn dispatch_channel(&self) -> Channel<Message> {
        self.inbound.clone()
    }

    fn forward(&self, egress: &Channel<Message>) -> Result<()> {
        if self.is_closed() {
            return Err(ExchangeError::transport(format!("{} is closed", self.name)));
        }
        let outgoing = self.outgoing.clone();
        let closed = Arc::clone(&self.closed);
        let forwarder: SubscriberRef<Message> = Arc::new(move |message: &Message| {
            if !closed.load(Ordering::SeqCst) {
                let _ = outgoing.publish(message);
            }
        });
        egress.subscribe(Arc::clone(&forwarder))?;
        let mut forwarded = self.forwarded.lock();
        // Disposed exchanges never unsubscribe on their own
        forwarded.retain(|entry| !entry.egress.is_disposed());
        forwarded.push(Forwarded {
            egress: egress.clone(),
            forwarder,
        });
        drop(forwarded);
        debug!(transport = %self.name, egress = %egress.name(), "Forwarding egress");
        Ok(())
    }

    fn unforward(&self, egress: &Channel<Message>) -> bool {
        let removed = {
            let mut forwarded = self.forwarded.lock();
            forwarded
                .iter()
                .position(|entry| entry.egress.same_channel(egress))
                .map(|index| forwarded.remove(index))
        };
        match removed {
            Some(entry) => {
                entry.egress.unsubscribe(&entry.forwarder);
                true
            }
            None => false,
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in std::mem::take(&mut *self.forwarded.lock()) {
            entry.egress.unsubscribe(&entry.forwarder);
        }
        self.incoming.unsubscribe(&self.receiver);
        let _ = self.inbound.dispose(&self.sentinel);
        debug!(transport = %self.name, "Transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
