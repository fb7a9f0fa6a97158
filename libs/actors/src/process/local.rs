//! Same-realm process backend

use super::ProcessBackend;
use crate::endpoint::ProcessEndpoint;
use crate::error::{ProcessError, Result};
use crate::sandbox::ChildUnit;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use warden_exchange::{Responder, TransportStrategy};
use warden_types::SharedScheduler;

/// Runs the child endpoint in this realm, wired over an in-memory
/// transport pair
pub struct LocalProcess {
    name: String,
    app: Option<Arc<dyn Responder>>,
    scheduler: SharedScheduler,
    unit: Mutex<Option<ChildUnit>>,
}

impl std::fmt::Debug for LocalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcess")
            .field("name", &self.name)
            .field("acquired", &self.unit.lock().is_some())
            .finish()
    }
}

impl LocalProcess {
    pub fn new(
        name: impl Into<String>,
        app: Option<Arc<dyn Responder>>,
        scheduler: SharedScheduler,
    ) -> Self {
        Self {
            name: name.into(),
            app,
            scheduler,
            unit: Mutex::new(None),
        }
    }

    /// Child endpoint while the unit is up
    pub fn endpoint(&self) -> Option<Arc<ProcessEndpoint>> {
        self.unit.lock().as_ref().map(|unit| Arc::clone(unit.endpoint()))
    }
}

#[async_trait]
impl ProcessBackend for LocalProcess {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn acquire(&self) -> Result<Arc<dyn TransportStrategy>> {
        let mut unit = self.unit.lock();
        if unit.is_some() {
            return Err(ProcessError::sandbox(format!("{} already acquired", self.name)));
        }
        let (child, parent) =
            ChildUnit::spawn(&self.name, self.app.clone(), self.scheduler.clone())?;
        *unit = Some(child);
        debug!(process = %self.name, "Local unit started");
        Ok(Arc::new(parent))
    }

    async fn did_sig_term(&self) -> Result<()> {
        let unit = self.unit.lock().take();
        if let Some(unit) = unit {
            unit.shutdown();
            debug!(process = %self.name, "Local unit stopped");
        }
        Ok(())
    }
}
