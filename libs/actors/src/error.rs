//! Process Error Types

use crate::pid::ProcessId;
use crate::process::ProcessState;
use thiserror::Error;
use warden_channels::ChannelError;
use warden_exchange::ExchangeError;
use warden_fsm::StateError;

/// Startup negotiation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Handshake already started")]
    AlreadyStarted,

    #[error("Handshake failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: ExchangeError,
    },

    #[error("Handshake cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl HandshakeError {
    pub fn attempts(&self) -> u32 {
        match self {
            HandshakeError::AlreadyStarted => 0,
            HandshakeError::Failed { attempts, .. } | HandshakeError::Cancelled { attempts } => {
                *attempts
            }
        }
    }
}

/// Process supervision errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("No such process: {0}")]
    NoSuchProcess(ProcessId),

    #[error("Process {process_id} cannot {operation} while {state:?}")]
    InvalidState {
        process_id: ProcessId,
        state: ProcessState,
        operation: &'static str,
    },

    #[error("Process {process_id} failed health checks: {cause}")]
    HealthCheck { process_id: ProcessId, cause: String },

    #[error("Process {process_id} went rogue: {reason}")]
    Rogue { process_id: ProcessId, reason: String },
}

/// Result type alias for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;

impl ProcessError {
    pub fn sandbox(msg: impl Into<String>) -> Self {
        ProcessError::Sandbox(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ProcessError::Exchange(e) => e.is_timeout(),
            ProcessError::Handshake(HandshakeError::Failed { source, .. }) => source.is_timeout(),
            _ => false,
        }
    }

    /// The process or its manager is gone
    pub fn is_gone(&self) -> bool {
        matches!(self, ProcessError::NoSuchProcess(_))
    }
}
