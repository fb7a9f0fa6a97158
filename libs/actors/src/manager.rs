//! Process Manager
//!
//! Owns supervised processes keyed by [`ProcessId`] and hands out [`Pid`]s.
//! Every process's events are joined into one composite channel.

use crate::error::{ProcessError, Result};
use crate::pid::{Pid, ProcessId};
use crate::process::{
    LocalProcess, Process, ProcessBackend, ProcessEvent, ProcessState, RemoteProcess,
};
use crate::sandbox::SandboxDelegate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_channels::{CompositeChannel, Sentinel, StateGuard};
use warden_config::WardenConfig;
use warden_exchange::Responder;
use warden_types::{Message, SharedScheduler};

/// Builds a fresh backend for a process; called again on restart
pub type BackendFactory = Arc<dyn Fn(ProcessId) -> Arc<dyn ProcessBackend> + Send + Sync>;

struct Entry {
    process: Process,
    factory: BackendFactory,
}

pub(crate) struct ManagerInner {
    config: WardenConfig,
    scheduler: SharedScheduler,
    processes: Mutex<HashMap<ProcessId, Entry>>,
    sentinel: Arc<Sentinel>,
    events: CompositeChannel<ProcessEvent>,
    guard: StateGuard,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let _ = self.events.dispose(&self.sentinel);
    }
}

/// Spawns, supervises and reaps processes
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("processes", &self.inner.processes.lock().len())
            .field("shut_down", &self.inner.guard.is_disposed())
            .finish()
    }
}

impl ProcessManager {
    pub fn new(config: WardenConfig, scheduler: SharedScheduler) -> Self {
        let sentinel = Arc::new(Sentinel::new());
        Self {
            inner: Arc::new(ManagerInner {
                events: CompositeChannel::new("process-manager.events", &sentinel),
                config,
                scheduler,
                processes: Mutex::new(HashMap::new()),
                sentinel,
                guard: StateGuard::new("process manager"),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.inner.config
    }

    /// Events of every managed process
    pub fn events(&self) -> &CompositeChannel<ProcessEvent> {
        &self.inner.events
    }

    /// Spawn a process and bring it to RUNNING
    pub async fn spawn(&self, factory: BackendFactory) -> Result<Pid> {
        self.inner.guard.check("spawn")?;
        let id = ProcessId::new();
        let process = self.launch(id, &factory).await?;

        // Shutdown may have drained the map while the launch was in flight
        let admitted = {
            let mut processes = self.inner.processes.lock();
            self.inner.guard.check("spawn").map(|()| {
                processes.insert(
                    id,
                    Entry {
                        process: process.clone(),
                        factory,
                    },
                );
            })
        };
        if let Err(e) = admitted {
            self.discard(&process).await;
            return Err(e.into());
        }
        info!(process_id = %id, "Process spawned");
        Ok(self.pid(id))
    }

    /// Spawn a same-realm process answering application messages with `app`
    pub async fn spawn_local(&self, app: Option<Arc<dyn Responder>>) -> Result<Pid> {
        let scheduler = self.inner.scheduler.clone();
        self.spawn(Arc::new(move |id: ProcessId| -> Arc<dyn ProcessBackend> {
            Arc::new(LocalProcess::new(id.to_string(), app.clone(), scheduler.clone()))
        }))
        .await
    }

    /// Spawn a process fabricated by `sandbox` from `url`
    pub async fn spawn_remote(&self, sandbox: Arc<dyn SandboxDelegate>, url: &str) -> Result<Pid> {
        let url = url.to_string();
        self.spawn(Arc::new(move |_id: ProcessId| -> Arc<dyn ProcessBackend> {
            Arc::new(RemoteProcess::new(Arc::clone(&sandbox), url.clone()))
        }))
        .await
    }

    async fn launch(&self, id: ProcessId, factory: &BackendFactory) -> Result<Process> {
        let process = Process::new(
            id,
            factory(id),
            self.inner.config.clone(),
            self.inner.scheduler.clone(),
        )?;
        // Joined before init so startup transitions are seen
        self.inner.events.join(process.events())?;

        let started = match process.init().await {
            Ok(()) if self.inner.config.health.enabled => process.attach_health_checker(),
            outcome => outcome,
        };
        if let Err(e) = started {
            let _ = process.kill().await;
            self.inner.events.leave(process.events());
            return Err(e);
        }
        Ok(process)
    }

    /// Kill the current process and start a fresh one under the same id.
    ///
    /// If the replacement fails to start, the id is dropped.
    pub async fn restart(&self, pid: &Pid) -> Result<()> {
        self.inner.guard.check("restart")?;
        let (old, factory) = {
            let processes = self.inner.processes.lock();
            let entry = processes
                .get(&pid.id())
                .ok_or(ProcessError::NoSuchProcess(pid.id()))?;
            (entry.process.clone(), Arc::clone(&entry.factory))
        };

        old.kill().await?;
        self.inner.events.leave(old.events());

        match self.launch(pid.id(), &factory).await {
            Ok(process) => {
                let swapped = {
                    let mut processes = self.inner.processes.lock();
                    match processes.get_mut(&pid.id()) {
                        Some(entry) if !self.inner.guard.is_disposed() => {
                            entry.process = process.clone();
                            true
                        }
                        _ => false,
                    }
                };
                if !swapped {
                    // Killed, forgotten or shut down during the relaunch
                    self.discard(&process).await;
                    self.inner.guard.check("restart")?;
                    return Err(ProcessError::NoSuchProcess(pid.id()));
                }
                info!(process_id = %pid.id(), "Process restarted");
                Ok(())
            }
            Err(e) => {
                warn!(process_id = %pid.id(), error = %e, "Restart failed, process dropped");
                self.inner.processes.lock().remove(&pid.id());
                Err(e)
            }
        }
    }

    /// Graceful teardown, then forget the process
    pub async fn terminate(&self, pid: &Pid) -> Result<()> {
        let process = self.process(pid)?;
        let result = process.graceful_teardown().await;
        if !process.is_alive() {
            self.forget(&process);
        }
        result
    }

    pub async fn kill(&self, pid: &Pid) -> Result<()> {
        let process = self.process(pid)?;
        process.kill().await?;
        self.forget(&process);
        Ok(())
    }

    pub fn state(&self, pid: &Pid) -> Result<ProcessState> {
        Ok(self.process(pid)?.state())
    }

    pub fn is_alive(&self, pid: &Pid) -> bool {
        self.process(pid).map(|p| p.is_alive()).unwrap_or(false)
    }

    pub async fn send_and_receive(
        &self,
        pid: &Pid,
        message: Message,
        timeout: Duration,
    ) -> Result<Message> {
        self.process(pid)?.send_and_receive(message, timeout).await
    }

    /// Handle to the live process behind `pid`
    pub fn process(&self, pid: &Pid) -> Result<Process> {
        self.inner
            .processes
            .lock()
            .get(&pid.id())
            .map(|entry| entry.process.clone())
            .ok_or(ProcessError::NoSuchProcess(pid.id()))
    }

    pub fn list(&self) -> Vec<Pid> {
        let ids: Vec<ProcessId> = self.inner.processes.lock().keys().copied().collect();
        ids.into_iter().map(|id| self.pid(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear every process down (killing those that do not go quietly) and
    /// refuse further spawns; returns how many processes were reaped
    pub async fn shutdown(&self) -> usize {
        if !self.inner.guard.dispose() {
            return 0;
        }
        let processes: Vec<Process> = self
            .inner
            .processes
            .lock()
            .drain()
            .map(|(_, entry)| entry.process)
            .collect();

        let count = processes.len();
        for process in processes {
            if let Err(e) = process.graceful_teardown().await {
                debug!(process_id = %process.id(), error = %e, "Teardown failed, killing");
                let _ = process.kill().await;
            }
            self.inner.events.leave(process.events());
        }
        info!(processes = count, "Process manager shut down");
        count
    }

    /// Kill a launched process that never made it into the map
    async fn discard(&self, process: &Process) {
        warn!(process_id = %process.id(), "Discarding process launched into a stale slot");
        let _ = process.kill().await;
        self.inner.events.leave(process.events());
    }

    fn forget(&self, process: &Process) {
        self.inner.processes.lock().remove(&process.id());
        self.inner.events.leave(process.events());
        debug!(process_id = %process.id(), "Process forgotten");
    }

    fn pid(&self, id: ProcessId) -> Pid {
        Pid::new(id, Arc::downgrade(&self.inner))
    }
}
