//! Process identity and handles

use crate::error::{ProcessError, Result};
use crate::manager::{ManagerInner, ProcessManager};
use crate::process::ProcessState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Weak;
use std::time::Duration;
use uuid::Uuid;
use warden_types::Message;

/// Unique process identifier; survives restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0.simple())
    }
}

/// Handle to a managed process.
///
/// Every call goes through the owning [`ProcessManager`]; once the process
/// was reaped or the manager dropped, calls fail with
/// [`ProcessError::NoSuchProcess`].
#[derive(Clone)]
pub struct Pid {
    id: ProcessId,
    manager: Weak<ManagerInner>,
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pid").field(&self.id).finish()
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

impl PartialEq for Pid {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pid {}

impl std::hash::Hash for Pid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Pid {
    pub(crate) fn new(id: ProcessId, manager: Weak<ManagerInner>) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn state(&self) -> Result<ProcessState> {
        self.manager()?.state(self)
    }

    pub fn is_alive(&self) -> bool {
        self.manager().map(|m| m.is_alive(self)).unwrap_or(false)
    }

    pub async fn send_and_receive(&self, message: Message, timeout: Duration) -> Result<Message> {
        self.manager()?.send_and_receive(self, message, timeout).await
    }

    /// Graceful teardown; the process is reaped afterwards
    pub async fn terminate(&self) -> Result<()> {
        self.manager()?.terminate(self).await
    }

    pub async fn kill(&self) -> Result<()> {
        self.manager()?.kill(self).await
    }

    /// Replace the process with a fresh one under the same id
    pub async fn restart(&self) -> Result<()> {
        self.manager()?.restart(self).await
    }

    fn manager(&self) -> Result<ProcessManager> {
        self.manager
            .upgrade()
            .map(ProcessManager::from_inner)
            .ok_or(ProcessError::NoSuchProcess(self.id))
    }
}
