//! Sandboxes: where remote units of execution come from

use crate::endpoint::ProcessEndpoint;
use crate::error::{ProcessError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use warden_exchange::{Dispatcher, Exchange, InMemoryTransport, Responder, TransportStrategy};
use warden_types::SharedScheduler;

/// Opaque handle to a fabricated unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle(String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A freshly created unit: its handle and the transport to reach it
pub struct Fabricated {
    pub handle: SandboxHandle,
    pub bindable: Arc<dyn TransportStrategy>,
}

impl fmt::Debug for Fabricated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabricated").field("handle", &self.handle).finish()
    }
}

/// Creates and destroys units of execution
#[async_trait]
pub trait SandboxDelegate: Send + Sync {
    async fn fabricate(&self, url: &str) -> Result<Fabricated>;

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()>;
}

/// Child half of an in-memory unit: an exchange on the far end of the
/// transport, a dispatcher and the endpoint answering the supervisor
pub(crate) struct ChildUnit {
    exchange: Exchange,
    dispatcher: Dispatcher,
    endpoint: Arc<ProcessEndpoint>,
    transport: InMemoryTransport,
}

impl ChildUnit {
    /// Start a child and return it with the supervisor's end of the wire
    pub(crate) fn spawn(
        name: &str,
        app: Option<Arc<dyn Responder>>,
        scheduler: SharedScheduler,
    ) -> Result<(Self, InMemoryTransport)> {
        let (parent, child) = InMemoryTransport::pair(name, scheduler.clone());
        let exchange = Exchange::new(format!("{}.child", name), scheduler);
        exchange.connect(&child)?;

        let endpoint = Arc::new(ProcessEndpoint::new(name, app));
        let dispatcher = Dispatcher::new(format!("{}.child", name), endpoint.clone());
        dispatcher.attach(&exchange)?;
        dispatcher.enable();

        let unit = Self {
            exchange,
            dispatcher,
            endpoint,
            transport: child,
        };
        Ok((unit, parent))
    }

    pub(crate) fn endpoint(&self) -> &Arc<ProcessEndpoint> {
        &self.endpoint
    }

    pub(crate) fn shutdown(&self) {
        self.dispatcher.dispose();
        self.exchange.dispose();
        self.transport.close();
    }
}

/// [`SandboxDelegate`] that runs every unit in the current process.
///
/// Each URL is served by a registered application responder; fabricating an
/// unknown URL fails.
pub struct InProcessSandbox {
    scheduler: SharedScheduler,
    routes: Mutex<HashMap<String, Option<Arc<dyn Responder>>>>,
    units: Mutex<HashMap<SandboxHandle, ChildUnit>>,
    next_id: AtomicU64,
}

impl fmt::Debug for InProcessSandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessSandbox")
            .field("routes", &self.routes.lock().len())
            .field("live", &self.live_count())
            .finish()
    }
}

impl InProcessSandbox {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            scheduler,
            routes: Mutex::new(HashMap::new()),
            units: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Serve `url` with `app`; `None` serves only system messages
    pub fn route(&self, url: impl Into<String>, app: Option<Arc<dyn Responder>>) {
        self.routes.lock().insert(url.into(), app);
    }

    /// Endpoint of a live unit, e.g. to make it unresponsive
    pub fn endpoint(&self, handle: &SandboxHandle) -> Option<Arc<ProcessEndpoint>> {
        self.units.lock().get(handle).map(|unit| Arc::clone(unit.endpoint()))
    }

    pub fn handles(&self) -> Vec<SandboxHandle> {
        self.units.lock().keys().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.units.lock().len()
    }
}

#[async_trait]
impl SandboxDelegate for InProcessSandbox {
    async fn fabricate(&self, url: &str) -> Result<Fabricated> {
        let app = self
            .routes
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| ProcessError::sandbox(format!("nothing served at {}", url)))?;

        let handle = SandboxHandle::new(format!(
            "sandbox-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        let (unit, parent) = ChildUnit::spawn(handle.as_str(), app, self.scheduler.clone())?;
        self.units.lock().insert(handle.clone(), unit);

        info!(url = %url, handle = %handle, "Unit fabricated");
        Ok(Fabricated {
            handle,
            bindable: Arc::new(parent),
        })
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        let unit = self
            .units
            .lock()
            .remove(handle)
            .ok_or_else(|| ProcessError::sandbox(format!("unknown handle {}", handle)))?;
        unit.shutdown();
        debug!(handle = %handle, "Unit destroyed");
        Ok(())
    }
}
