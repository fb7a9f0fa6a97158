//! Scheduler
//!
//! Every piece of deferred work in Warden (post-transition callbacks,
//! transport hops, handshake retries, health-check ticks) is spawned through
//! a [`Scheduler`]. Production binds it to the tokio runtime; tests run the
//! same scheduler on a paused tokio clock for deterministic timing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Boxed `'static` future
pub type BoxFuture<T> = futures::future::BoxFuture<'static, T>;

/// Shared scheduler reference
pub type SharedScheduler = Arc<dyn Scheduler>;

/// Injectable executor for deferred work
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Run `task` on a later scheduling turn
    fn spawn(&self, task: BoxFuture<()>) -> TaskHandle;

    /// Future that completes after `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<()>;

    /// Future that yields exactly one scheduling turn
    fn tick(&self) -> BoxFuture<()> {
        Box::pin(tokio::task::yield_now())
    }
}

/// Handle to a spawned task
#[derive(Debug)]
pub struct TaskHandle {
    inner: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { inner: Some(handle) }
    }

    /// Handle not bound to any task
    pub fn detached() -> Self {
        Self { inner: None }
    }

    /// Cancel the task if it has not completed yet
    pub fn abort(&self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().map_or(true, |h| h.is_finished())
    }
}

/// Scheduler backed by the tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    /// Spawn onto whichever runtime is current at spawn time
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Spawn onto a specific runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: BoxFuture<()>) -> TaskHandle {
        let handle = match &self.handle {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        };
        TaskHandle::new(handle)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Default scheduler bound to the current tokio runtime
pub fn default_scheduler() -> SharedScheduler {
    Arc::new(TokioScheduler::new())
}
