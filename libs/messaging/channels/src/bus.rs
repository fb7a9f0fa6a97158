//! Ownerless message bus

use crate::channel::{Channel, SubscriberRef};
use crate::error::Result;
use crate::sentinel::Sentinel;
use std::sync::Arc;

/// Channel variant with no external owner: any holder may publish.
///
/// The bus keeps its own sentinel internally, so the publish path is the same
/// as a [`Channel`]'s.
pub struct MessageBus<M> {
    sentinel: Arc<Sentinel>,
    channel: Channel<M>,
}

impl<M> Clone for MessageBus<M> {
    fn clone(&self) -> Self {
        Self {
            sentinel: Arc::clone(&self.sentinel),
            channel: self.channel.clone(),
        }
    }
}

impl<M: 'static> std::fmt::Debug for MessageBus<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").field("channel", &self.channel).finish()
    }
}

impl<M: 'static> MessageBus<M> {
    pub fn new(name: impl Into<String>) -> Self {
        let sentinel = Arc::new(Sentinel::new());
        let channel = Channel::new(name, &sentinel);
        Self { sentinel, channel }
    }

    pub fn publish(&self, message: &M) -> Result<usize> {
        self.channel.publish(&self.sentinel, message)
    }

    pub fn subscribe(&self, subscriber: SubscriberRef<M>) -> Result<()> {
        self.channel.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, subscriber: &SubscriberRef<M>) -> bool {
        self.channel.unsubscribe(subscriber)
    }

    /// Underlying channel, e.g. for joining into a composite
    pub fn channel(&self) -> &Channel<M> {
        &self.channel
    }

    pub fn dispose(&self) {
        // Bus always holds its own sentinel
        let _ = self.channel.dispose(&self.sentinel);
    }

    pub fn is_disposed(&self) -> bool {
        self.channel.is_disposed()
    }
}
