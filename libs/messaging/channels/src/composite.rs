//! Fan-in composite channel

use crate::channel::{Channel, SubscriberRef};
use crate::error::{ChannelError, Result};
use crate::sentinel::Sentinel;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

struct Joined<M> {
    source: Channel<M>,
    forwarder: SubscriberRef<M>,
}

/// Channel that relays everything published on its joined sources.
///
/// Relaying is one-way: messages published directly on the composite reach
/// only the composite's own subscribers, never the sources'.
pub struct CompositeChannel<M> {
    channel: Channel<M>,
    joined: Arc<Mutex<Vec<Joined<M>>>>,
}

impl<M> Clone for CompositeChannel<M> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            joined: Arc::clone(&self.joined),
        }
    }
}

impl<M: 'static> fmt::Debug for CompositeChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeChannel")
            .field("channel", &self.channel)
            .field("joined", &self.joined.lock().len())
            .finish()
    }
}

impl<M> Deref for CompositeChannel<M> {
    type Target = Channel<M>;

    fn deref(&self) -> &Channel<M> {
        &self.channel
    }
}

impl<M: 'static> CompositeChannel<M> {
    pub fn new(name: impl Into<String>, owner: &Sentinel) -> Self {
        Self {
            channel: Channel::new(name, owner),
            joined: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The underlying channel handle
    pub fn channel(&self) -> &Channel<M> {
        &self.channel
    }

    /// Relay every message published on `source`.
    ///
    /// Joining a source twice is an error rather than a second relay.
    pub fn join(&self, source: &Channel<M>) -> Result<()> {
        if self.channel.is_disposed() {
            return Err(ChannelError::disposed(self.channel.name(), "join"));
        }
        if source.same_channel(&self.channel) {
            return Err(ChannelError::SelfJoin {
                channel: self.channel.name().to_string(),
            });
        }

        let mut joined = self.joined.lock();
        if joined.iter().any(|j| j.source.same_channel(source)) {
            return Err(ChannelError::AlreadyJoined {
                composite: self.channel.name().to_string(),
                source_channel: source.name().to_string(),
            });
        }

        let target = Arc::downgrade(&self.channel.inner);
        let forwarder: SubscriberRef<M> = Arc::new(move |message: &M| {
            if let Some(inner) = target.upgrade() {
                Channel { inner }.deliver(message);
            }
        });
        source.subscribe(Arc::clone(&forwarder))?;
        joined.push(Joined {
            source: source.clone(),
            forwarder,
        });

        debug!(
            composite = %self.channel.name(),
            source = %source.name(),
            "Joined source channel"
        );
        Ok(())
    }

    /// Stop relaying `source`; returns false if it was not joined
    pub fn leave(&self, source: &Channel<M>) -> bool {
        let removed = {
            let mut joined = self.joined.lock();
            joined
                .iter()
                .position(|j| j.source.same_channel(source))
                .map(|index| joined.remove(index))
        };

        match removed {
            Some(entry) => {
                entry.source.unsubscribe(&entry.forwarder);
                debug!(
                    composite = %self.channel.name(),
                    source = %source.name(),
                    "Left source channel"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_joined(&self, source: &Channel<M>) -> bool {
        self.joined.lock().iter().any(|j| j.source.same_channel(source))
    }

    pub fn joined_count(&self) -> usize {
        self.joined.lock().len()
    }

    /// Leave every source, then dispose the composite itself
    pub fn dispose(&self, sentinel: &Sentinel) -> Result<()> {
        if !self.channel.is_owned_by(sentinel) {
            return Err(ChannelError::access_violation(self.channel.name()));
        }
        let entries = std::mem::take(&mut *self.joined.lock());
        for entry in entries {
            entry.source.unsubscribe(&entry.forwarder);
        }
        self.channel.dispose(sentinel)
    }
}
