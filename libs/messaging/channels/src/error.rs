//! Channel Error Types

use thiserror::Error;

/// Channel and guard errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Publish attempted without the owner's sentinel
    #[error("Access violation: caller does not own channel '{channel}'")]
    AccessViolation { channel: String },

    /// Subscriber already present on the channel
    #[error("Subscriber already registered on channel '{channel}'")]
    AlreadySubscribed { channel: String },

    /// Source already joined to a composite
    #[error("Channel '{source_channel}' already joined to composite '{composite}'")]
    AlreadyJoined {
        composite: String,
        source_channel: String,
    },

    /// Composite asked to join itself
    #[error("Composite '{channel}' cannot join itself")]
    SelfJoin { channel: String },

    /// Operation on a disposed object
    #[error("'{target}' is disposed: {operation} rejected")]
    Disposed { target: String, operation: String },
}

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

impl ChannelError {
    pub fn access_violation(channel: impl Into<String>) -> Self {
        Self::AccessViolation {
            channel: channel.into(),
        }
    }

    pub fn disposed(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Disposed {
            target: target.into(),
            operation: operation.into(),
        }
    }

    /// Programmer errors that must never be retried
    pub fn is_access_violation(&self) -> bool {
        matches!(
            self,
            Self::AccessViolation { .. }
                | Self::AlreadySubscribed { .. }
                | Self::AlreadyJoined { .. }
                | Self::SelfJoin { .. }
        )
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}
