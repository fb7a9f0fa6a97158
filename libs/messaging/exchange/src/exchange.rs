//! Correlated request/reply over a pair of channels

use crate::error::{ExchangeError, Result};
use crate::transport::{InMemoryTransport, TransportStrategy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_channels::{Channel, CompositeChannel, Sentinel, StateGuard, SubscriberRef};
use warden_config::defaults;
use warden_types::{CancellationReason, Message, MessageId, SharedScheduler};

/// Anything that can carry a request and hand back its reply
#[async_trait]
pub trait Requester: Send + Sync {
    async fn send_and_receive(&self, message: Message, timeout: Duration) -> Result<Message>;
}

type PendingReply = oneshot::Sender<Result<Message>>;

struct Listening {
    ingress: Channel<Message>,
    listener: SubscriberRef<Message>,
}

struct Twine {
    peer: Uuid,
    transports: [Arc<InMemoryTransport>; 2],
}

struct ExchangeInner {
    id: Uuid,
    name: String,
    sentinel: Arc<Sentinel>,
    egress: CompositeChannel<Message>,
    dispatch: Channel<Message>,
    pending: Mutex<HashMap<MessageId, PendingReply>>,
    listening: Mutex<Vec<Listening>>,
    twine: Mutex<Option<Twine>>,
    guard: StateGuard,
    scheduler: SharedScheduler,
    default_timeout: Duration,
}

/// Request/reply endpoint.
///
/// Outgoing messages are published on the egress composite; a transport
/// forwards them. Incoming traffic arrives through [`Exchange::listen`]:
/// replies settle pending requests, `localDispatch` envelopes are
/// republished on the dispatch channel for a
/// [`Dispatcher`](crate::Dispatcher).
///
/// Cloning yields another handle to the same exchange.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("name", &self.inner.name)
            .field("pending", &self.pending_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Exchange {
    pub fn new(name: impl Into<String>, scheduler: SharedScheduler) -> Self {
        Self::with_timeout(
            name,
            scheduler,
            Duration::from_millis(defaults::exchange::REMOTE_REPLY_TIMEOUT_MS),
        )
    }

    /// Exchange whose [`Exchange::request`] uses `default_timeout`
    pub fn with_timeout(
        name: impl Into<String>,
        scheduler: SharedScheduler,
        default_timeout: Duration,
    ) -> Self {
        let name = name.into();
        let sentinel = Arc::new(Sentinel::new());
        Self {
            inner: Arc::new(ExchangeInner {
                id: Uuid::new_v4(),
                egress: CompositeChannel::new(format!("{}.egress", name), &sentinel),
                dispatch: Channel::new(format!("{}.dispatch", name), &sentinel),
                guard: StateGuard::new(format!("exchange '{}'", name)),
                name,
                sentinel,
                pending: Mutex::new(HashMap::new()),
                listening: Mutex::new(Vec::new()),
                twine: Mutex::new(None),
                scheduler,
                default_timeout,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Outgoing channel a transport forwards to the remote side
    pub fn egress_channel(&self) -> &CompositeChannel<Message> {
        &self.inner.egress
    }

    /// Incoming `localDispatch` envelopes
    pub fn dispatch_channel(&self) -> &Channel<Message> {
        &self.inner.dispatch
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.guard.is_disposed()
    }

    /// Send `message` and wait for the reply whose `in_reply_to` matches.
    ///
    /// Exactly one outcome: the reply, a remote error, a timeout no earlier
    /// than `timeout`, or a cancellation if the exchange is disposed first.
    pub async fn send_and_receive(
        &self,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Message> {
        self.check("send_and_receive")?;

        let msg_id = message.regenerate_id();
        let (tx, mut rx) = oneshot::channel();
        self.inner.pending.lock().insert(msg_id, tx);
        let _pending = PendingGuard {
            inner: &self.inner,
            msg_id,
        };

        debug!(
            exchange = %self.inner.name,
            msg_id = %msg_id,
            m_type = %message.m_type,
            "Sending request"
        );
        self.inner.egress.publish(&self.inner.sentinel, &message)?;

        let deadline = self.inner.scheduler.sleep(timeout);
        tokio::select! {
            outcome = &mut rx => Self::settle(msg_id, outcome),
            _ = deadline => {
                // Whoever removes the entry owns the outcome
                if self.inner.pending.lock().remove(&msg_id).is_some() {
                    warn!(
                        exchange = %self.inner.name,
                        msg_id = %msg_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    return Err(ExchangeError::Timeout {
                        msg_id,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Self::settle(msg_id, rx.await)
            }
        }
    }

    /// [`Exchange::send_and_receive`] with the exchange's default timeout
    pub async fn request(&self, message: Message) -> Result<Message> {
        self.send_and_receive(message, self.inner.default_timeout).await
    }

    /// Fire-and-forget publish on egress
    pub fn send(&self, message: &Message) -> Result<()> {
        self.check("send")?;
        self.inner.egress.publish(&self.inner.sentinel, message)?;
        Ok(())
    }

    fn settle(
        msg_id: MessageId,
        outcome: std::result::Result<Result<Message>, oneshot::error::RecvError>,
    ) -> Result<Message> {
        outcome.unwrap_or(Err(ExchangeError::Cancelled {
            msg_id,
            reason: CancellationReason::Disposed,
        }))
    }

    /// Bind the inbound side to `ingress`
    pub fn listen(&self, ingress: &Channel<Message>) -> Result<()> {
        self.check("listen")?;
        let weak: Weak<ExchangeInner> = Arc::downgrade(&self.inner);
        let listener: SubscriberRef<Message> = Arc::new(move |message: &Message| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(message);
            }
        });
        ingress.subscribe(Arc::clone(&listener))?;
        self.inner.listening.lock().push(Listening {
            ingress: ingress.clone(),
            listener,
        });
        debug!(exchange = %self.inner.name, ingress = %ingress.name(), "Listening");
        Ok(())
    }

    /// Stop listening on `ingress`; false if it was not bound
    pub fn unlisten(&self, ingress: &Channel<Message>) -> bool {
        let removed = {
            let mut listening = self.inner.listening.lock();
            listening
                .iter()
                .position(|l| l.ingress.same_channel(ingress))
                .map(|index| listening.remove(index))
        };
        match removed {
            Some(entry) => entry.ingress.unsubscribe(&entry.listener),
            None => false,
        }
    }

    /// Listen on the transport's inbound side and let it forward egress
    pub fn connect(&self, transport: &dyn TransportStrategy) -> Result<()> {
        self.listen(&transport.dispatch_channel())?;
        transport.forward(self.inner.egress.channel())
    }

    /// Reverse [`Exchange::connect`]
    pub fn disconnect(&self, transport: &dyn TransportStrategy) {
        self.unlisten(&transport.dispatch_channel());
        transport.unforward(self.inner.egress.channel());
    }

    /// Wire this exchange to `other` for same-realm use
    pub fn twine(&self, other: &Exchange) -> Result<()> {
        self.check("twine")?;
        other.check("twine")?;
        for exchange in [self, other] {
            if exchange.inner.twine.lock().is_some() {
                return Err(ExchangeError::AlreadyTwined {
                    exchange: exchange.inner.name.clone(),
                });
            }
        }

        let (near, far) = InMemoryTransport::pair(
            &format!("{}~{}", self.inner.name, other.inner.name),
            self.inner.scheduler.clone(),
        );
        self.connect(&near)?;
        other.connect(&far)?;

        let transports = [Arc::new(near), Arc::new(far)];
        *self.inner.twine.lock() = Some(Twine {
            peer: other.inner.id,
            transports: transports.clone(),
        });
        *other.inner.twine.lock() = Some(Twine {
            peer: self.inner.id,
            transports,
        });
        info!(a = %self.inner.name, b = %other.inner.name, "Exchanges twined");
        Ok(())
    }

    /// Reverse [`Exchange::twine`]
    pub fn untwine(&self, other: &Exchange) -> Result<()> {
        let twined = matches!(
            &*self.inner.twine.lock(),
            Some(t) if t.peer == other.inner.id
        );
        if !twined {
            return Err(ExchangeError::NotTwined {
                exchange: self.inner.name.clone(),
                other: other.inner.name.clone(),
            });
        }
        self.inner.drop_twine();
        other.inner.drop_twine();
        info!(a = %self.inner.name, b = %other.inner.name, "Exchanges untwined");
        Ok(())
    }

    pub fn is_twined(&self) -> bool {
        self.inner.twine.lock().is_some()
    }

    /// Reject every pending request and release all channels; idempotent
    pub fn dispose(&self) {
        if !self.inner.guard.dispose() {
            return;
        }
        let cancelled = self.inner.cancel_pending(CancellationReason::Disposed);
        for entry in std::mem::take(&mut *self.inner.listening.lock()) {
            entry.ingress.unsubscribe(&entry.listener);
        }
        self.inner.drop_twine();
        let _ = self.inner.egress.dispose(&self.inner.sentinel);
        let _ = self.inner.dispatch.dispose(&self.inner.sentinel);
        debug!(exchange = %self.inner.name, cancelled, "Exchange disposed");
    }

    fn check(&self, operation: &str) -> Result<()> {
        self.inner
            .guard
            .check(operation)
            .map_err(|_| ExchangeError::disposed(self.inner.name.clone()))
    }
}

impl ExchangeInner {
    fn receive(&self, message: &Message) {
        if let Some(reply_to) = message.in_reply_to {
            self.resolve(reply_to, message);
        } else if message.is_local_dispatch() {
            let _ = self.dispatch.publish(&self.sentinel, message);
        } else {
            warn!(
                exchange = %self.name,
                msg_id = %message.msg_id,
                m_type = %message.m_type,
                "Unexpected inbound message dropped"
            );
        }
    }

    fn resolve(&self, reply_to: MessageId, reply: &Message) {
        let Some(tx) = self.pending.lock().remove(&reply_to) else {
            debug!(exchange = %self.name, msg_id = %reply_to, "Unmatched reply dropped");
            return;
        };
        let outcome = match &reply.error {
            Some(error) => Err(ExchangeError::Remote(error.clone())),
            None => Ok(reply.clone()),
        };
        // Receiver gone means the caller stopped waiting
        let _ = tx.send(outcome);
    }

    fn cancel_pending(&self, reason: CancellationReason) -> usize {
        let pending: Vec<(MessageId, PendingReply)> = self.pending.lock().drain().collect();
        let count = pending.len();
        for (msg_id, tx) in pending {
            let _ = tx.send(Err(ExchangeError::Cancelled {
                msg_id,
                reason: reason.clone(),
            }));
        }
        count
    }

    fn drop_twine(&self) {
        let Some(twine) = self.twine.lock().take() else {
            return;
        };
        for transport in &twine.transports {
            let inbound = transport.dispatch_channel();
            self.listening.lock().retain(|l| {
                if l.ingress.same_channel(&inbound) {
                    l.ingress.unsubscribe(&l.listener);
                    false
                } else {
                    true
                }
            });
            transport.close();
        }
    }
}

/// Drops the pending entry when the caller stops waiting
struct PendingGuard<'a> {
    inner: &'a ExchangeInner,
    msg_id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.msg_id);
    }
}

impl Drop for ExchangeInner {
    fn drop(&mut self) {
        self.cancel_pending(CancellationReason::Disposed);
        for entry in std::mem::take(&mut *self.listening.lock()) {
            entry.ingress.unsubscribe(&entry.listener);
        }
        self.drop_twine();
    }
}

#[async_trait]
impl Requester for Exchange {
    async fn send_and_receive(&self, message: Message, timeout: Duration) -> Result<Message> {
        Exchange::send_and_receive(self, message, timeout).await
    }
}
