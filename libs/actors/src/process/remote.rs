//! Sandboxed process backend

use super::ProcessBackend;
use crate::error::{ProcessError, Result};
use crate::sandbox::{SandboxDelegate, SandboxHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use warden_exchange::TransportStrategy;

/// Unit fabricated by a [`SandboxDelegate`] from a URL
pub struct RemoteProcess {
    sandbox: Arc<dyn SandboxDelegate>,
    url: String,
    handle: Mutex<Option<SandboxHandle>>,
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("url", &self.url)
            .field("handle", &*self.handle.lock())
            .finish()
    }
}

impl RemoteProcess {
    pub fn new(sandbox: Arc<dyn SandboxDelegate>, url: impl Into<String>) -> Self {
        Self {
            sandbox,
            url: url.into(),
            handle: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Handle of the fabricated unit, until it is destroyed
    pub fn handle(&self) -> Option<SandboxHandle> {
        self.handle.lock().clone()
    }
}

#[async_trait]
impl ProcessBackend for RemoteProcess {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn acquire(&self) -> Result<Arc<dyn TransportStrategy>> {
        if let Some(handle) = self.handle() {
            return Err(ProcessError::sandbox(format!(
                "{} already fabricated as {}",
                self.url, handle
            )));
        }
        let fabricated = self.sandbox.fabricate(&self.url).await?;
        info!(url = %self.url, handle = %fabricated.handle, "Remote unit fabricated");
        *self.handle.lock() = Some(fabricated.handle);
        Ok(fabricated.bindable)
    }

    async fn did_sig_term(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                self.sandbox.destroy(&handle).await?;
                debug!(url = %self.url, handle = %handle, "Remote unit destroyed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Process, ProcessState};
    use crate::sandbox::InProcessSandbox;
    use crate::ProcessId;
    use warden_config::WardenConfig;
    use warden_types::default_scheduler;

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_fabricates_and_destroys() {
        let sandbox = Arc::new(InProcessSandbox::new(default_scheduler()));
        sandbox.route("app://worker", None);
        let backend = Arc::new(RemoteProcess::new(sandbox.clone(), "app://worker"));
        let process = Process::new(
            ProcessId::new(),
            backend.clone(),
            WardenConfig::default(),
            default_scheduler(),
        )
        .unwrap();

        process.init().await.unwrap();
        assert_eq!(sandbox.live_count(), 1);
        assert!(backend.handle().is_some());

        process.graceful_teardown().await.unwrap();
        assert_eq!(sandbox.live_count(), 0);
        assert!(backend.handle().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_url_fails_init() {
        let sandbox = Arc::new(InProcessSandbox::new(default_scheduler()));
        let backend = Arc::new(RemoteProcess::new(sandbox.clone(), "app://nowhere"));
        let process = Process::new(
            ProcessId::new(),
            backend,
            WardenConfig::default(),
            default_scheduler(),
        )
        .unwrap();

        assert!(matches!(process.init().await, Err(ProcessError::Sandbox(_))));
        assert_eq!(process.state(), ProcessState::Zombie);
        assert_eq!(sandbox.live_count(), 0);
    }
}
