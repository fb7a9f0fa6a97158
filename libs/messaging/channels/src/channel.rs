//! Owned pub/sub channel

use crate::error::{ChannelError, Result};
use crate::sentinel::Sentinel;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives messages published on a channel
pub trait Subscriber<M>: Send + Sync {
    fn on_message(&self, message: &M);
}

impl<M, F> Subscriber<M> for F
where
    F: Fn(&M) + Send + Sync,
{
    fn on_message(&self, message: &M) {
        self(message)
    }
}

/// Shared subscriber reference. Identity is the allocation, so the same
/// `Arc` (or a clone of it) is the same subscription.
pub type SubscriberRef<M> = Arc<dyn Subscriber<M>>;

pub(crate) fn same_subscriber<M>(a: &SubscriberRef<M>, b: &SubscriberRef<M>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

pub(crate) struct ChannelInner<M> {
    name: String,
    owner: u64,
    subscribers: Mutex<Vec<SubscriberRef<M>>>,
    disposed: AtomicBool,
}

/// Single-owner pub/sub endpoint.
///
/// Cloning yields another handle to the same channel; subscribing through any
/// handle is allowed, publishing requires the owner's [`Sentinel`].
pub struct Channel<M> {
    pub(crate) inner: Arc<ChannelInner<M>>,
}

impl<M> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: 'static> fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("subscribers", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<M: 'static> Channel<M> {
    /// Create a channel owned by `owner`
    pub fn new(name: impl Into<String>, owner: &Sentinel) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                owner: owner.id(),
                subscribers: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append `subscriber`; fails if it is already subscribed
    pub fn subscribe(&self, subscriber: SubscriberRef<M>) -> Result<()> {
        if self.is_disposed() {
            return Err(ChannelError::disposed(self.name(), "subscribe"));
        }

        let mut subscribers = self.inner.subscribers.lock();
        if subscribers.iter().any(|s| same_subscriber(s, &subscriber)) {
            return Err(ChannelError::AlreadySubscribed {
                channel: self.inner.name.clone(),
            });
        }
        subscribers.push(subscriber);
        Ok(())
    }

    /// Remove `subscriber`; returns false if it was not subscribed
    pub fn unsubscribe(&self, subscriber: &SubscriberRef<M>) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| !same_subscriber(s, subscriber));
        subscribers.len() != before
    }

    pub fn is_subscribed(&self, subscriber: &SubscriberRef<M>) -> bool {
        self.inner
            .subscribers
            .lock()
            .iter()
            .any(|s| same_subscriber(s, subscriber))
    }

    /// Notify every subscriber, in subscription order, with `message`.
    ///
    /// Returns the number of subscribers notified.
    pub fn publish(&self, sentinel: &Sentinel, message: &M) -> Result<usize> {
        if !self.is_owned_by(sentinel) {
            warn!(channel = %self.inner.name, "Publish rejected: wrong sentinel");
            return Err(ChannelError::access_violation(self.name()));
        }
        if self.is_disposed() {
            return Err(ChannelError::disposed(self.name(), "publish"));
        }
        Ok(self.deliver(message))
    }

    /// Deliver without an ownership check; used by relays the owner set up
    pub(crate) fn deliver(&self, message: &M) -> usize {
        if self.is_disposed() {
            return 0;
        }
        // Snapshot so subscribers may (un)subscribe while being notified
        let snapshot: Vec<SubscriberRef<M>> = self.inner.subscribers.lock().clone();
        for subscriber in &snapshot {
            subscriber.on_message(message);
        }
        snapshot.len()
    }

    pub fn is_owned_by(&self, sentinel: &Sentinel) -> bool {
        self.inner.owner == sentinel.id()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Drop every subscription; idempotent
    pub fn dispose(&self, sentinel: &Sentinel) -> Result<()> {
        if !self.is_owned_by(sentinel) {
            return Err(ChannelError::access_violation(self.name()));
        }
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            let released = std::mem::take(&mut *self.inner.subscribers.lock());
            debug!(
                channel = %self.inner.name,
                released = released.len(),
                "Channel disposed"
            );
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Whether both handles refer to the same channel
    pub fn same_channel(&self, other: &Channel<M>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
