//! Exchange Error Types

use thiserror::Error;
use warden_channels::ChannelError;
use warden_types::{CancellationReason, ErrorValue, MessageId};

/// Request/reply, transport and dispatch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// No reply arrived before the deadline
    #[error("Request {msg_id} timed out after {timeout_ms}ms")]
    Timeout { msg_id: MessageId, timeout_ms: u64 },

    /// Pending request rejected before any reply arrived
    #[error("Request {msg_id} cancelled: {reason}")]
    Cancelled {
        msg_id: MessageId,
        reason: CancellationReason,
    },

    /// Remote side answered with an error
    #[error("Remote error: {0}")]
    Remote(ErrorValue),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Exchange '{exchange}' is disposed")]
    Disposed { exchange: String },

    #[error("Exchange '{exchange}' is already twined")]
    AlreadyTwined { exchange: String },

    #[error("Exchange '{exchange}' is not twined with '{other}'")]
    NotTwined { exchange: String, other: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

impl ExchangeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        ExchangeError::Transport(msg.into())
    }

    pub fn disposed(exchange: impl Into<String>) -> Self {
        ExchangeError::Disposed {
            exchange: exchange.into(),
        }
    }

    /// Transient failure class: a local deadline, or a remote unit that
    /// reports having timed out itself
    pub fn is_timeout(&self) -> bool {
        match self {
            ExchangeError::Timeout { .. } => true,
            ExchangeError::Remote(error) => {
                error.code == ErrorValue::TIMEOUT
                    || error.message.to_ascii_lowercase().contains("timed out")
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExchangeError::Cancelled { .. })
    }

    /// Coarse error category for logging and metrics
    pub fn category(&self) -> &'static str {
        if self.is_timeout() {
            return "timeout";
        }
        match self {
            ExchangeError::Cancelled { .. } => "cancelled",
            ExchangeError::Remote(_) => "remote",
            ExchangeError::Channel(e) if e.is_access_violation() => "access",
            ExchangeError::Channel(_)
            | ExchangeError::Disposed { .. }
            | ExchangeError::AlreadyTwined { .. }
            | ExchangeError::NotTwined { .. } => "state",
            _ => "transport",
        }
    }

    /// Portable form for replies crossing a transport
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            ExchangeError::Remote(error) => error.clone(),
            e if e.is_timeout() => ErrorValue::timeout(e.to_string()),
            e => ErrorValue::new(e.category(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let local = ExchangeError::Timeout {
            msg_id: MessageId::new(),
            timeout_ms: 10,
        };
        assert!(local.is_timeout());
        assert_eq!(local.category(), "timeout");

        let remote_code = ExchangeError::Remote(ErrorValue::timeout("slow"));
        assert!(remote_code.is_timeout());

        let remote_text = ExchangeError::Remote(ErrorValue::handler("upstream Timed Out"));
        assert!(remote_text.is_timeout());

        let fatal = ExchangeError::Remote(ErrorValue::handler("boom"));
        assert!(!fatal.is_timeout());
        assert_eq!(fatal.category(), "remote");

        let cancelled = ExchangeError::Cancelled {
            msg_id: MessageId::new(),
            reason: CancellationReason::Disposed,
        };
        assert!(!cancelled.is_timeout());
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_error_value_conversion() {
        let local = ExchangeError::Timeout {
            msg_id: MessageId::new(),
            timeout_ms: 10,
        };
        assert_eq!(local.to_error_value().code, ErrorValue::TIMEOUT);

        let remote = ErrorValue::handler("boom");
        assert_eq!(ExchangeError::Remote(remote.clone()).to_error_value(), remote);

        let state = ExchangeError::disposed("x");
        assert_eq!(state.to_error_value().code, "state");
    }
}
