//! Supervised processes
//!
//! A [`Process`] drives its backend through
//! CREATED → INITIALIZING → HANDSHAKING → RUNNING, and out again through
//! TERMINATING (or ROGUE) to ZOMBIE. INCOMM marks a running process whose
//! health checks failed.

pub mod local;
pub mod remote;

pub use local::LocalProcess;
pub use remote::RemoteProcess;

use crate::error::{ProcessError, Result};
use crate::handshake::Handshake;
use crate::health::{HealthCheckError, HealthChecker, ProbeCheck};
use crate::pid::ProcessId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use warden_channels::{Channel, Sentinel, SubscriberRef};
use warden_config::WardenConfig;
use warden_exchange::{Exchange, TransportStrategy};
use warden_fsm::{StateEvent, StateGraph, StateMachine};
use warden_types::{mtype, Message, SharedScheduler};

/// Process lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Created,
    Initializing,
    Handshaking,
    Running,
    /// Lost contact: health checks failed
    InComm,
    Terminating,
    /// Ignored `term`
    Rogue,
    Zombie,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Zombie)
    }
}

/// Lifecycle transition table
pub fn process_graph() -> StateGraph<ProcessState> {
    use ProcessState::*;
    StateGraph::new([
        Created,
        Initializing,
        Handshaking,
        Running,
        InComm,
        Terminating,
        Rogue,
        Zombie,
    ])
    .allow(Created, [Initializing, Zombie])
    .allow(Initializing, [Handshaking, Zombie])
    .allow(Handshaking, [Running, Zombie])
    .allow(Running, [Terminating, InComm, Zombie])
    .allow(InComm, [Terminating, Zombie])
    .allow(Terminating, [Rogue, Zombie])
    .allow(Rogue, [Zombie])
    .initial(Created)
}

/// Where a process runs: provides its transport and cleans up after it
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Short label for logs
    fn kind(&self) -> &'static str;

    /// Bring the unit up and return the transport to reach it
    async fn acquire(&self) -> Result<Arc<dyn TransportStrategy>>;

    /// Release whatever `acquire` created; called once per acquired unit
    async fn did_sig_term(&self) -> Result<()>;
}

/// Published on [`Process::events`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Lifecycle {
        process_id: ProcessId,
        from: Option<ProcessState>,
        to: ProcessState,
    },
    Error {
        process_id: ProcessId,
        message: String,
    },
}

impl ProcessEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            ProcessEvent::Lifecycle { process_id, .. } | ProcessEvent::Error { process_id, .. } => {
                *process_id
            }
        }
    }
}

/// Ownership of the backend's unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Idle,
    /// `acquire` in flight; whoever finishes it owns the cleanup
    Acquiring,
    Held,
    Released,
}

struct ProcessInner {
    id: ProcessId,
    name: String,
    backend: Arc<dyn ProcessBackend>,
    config: WardenConfig,
    scheduler: SharedScheduler,
    machine: StateMachine<ProcessState>,
    sentinel: Arc<Sentinel>,
    events: Channel<ProcessEvent>,
    lifecycle: SubscriberRef<StateEvent<ProcessState>>,
    transport: Mutex<Option<Arc<dyn TransportStrategy>>>,
    exchange: Mutex<Option<Exchange>>,
    health: Mutex<Option<HealthChecker>>,
    handshake_reply: Mutex<Option<Value>>,
    unit: Mutex<Unit>,
}

/// Supervisor-side view of one unit of execution.
///
/// Cloning yields another handle to the same process.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.backend.kind())
            .field("state", &self.state())
            .finish()
    }
}

impl Process {
    pub fn new(
        id: ProcessId,
        backend: Arc<dyn ProcessBackend>,
        config: WardenConfig,
        scheduler: SharedScheduler,
    ) -> Result<Self> {
        let name = format!("{}.{}", backend.kind(), id);
        let machine = StateMachine::new(name.clone(), process_graph(), scheduler.clone())?;
        let sentinel = Arc::new(Sentinel::new());
        let events = Channel::new(format!("{}.events", name), &sentinel);

        // Relay machine transitions as lifecycle events
        let lifecycle: SubscriberRef<StateEvent<ProcessState>> = {
            let events = events.clone();
            let sentinel = Arc::clone(&sentinel);
            Arc::new(move |event: &StateEvent<ProcessState>| {
                if let StateEvent::Transition(t) = event {
                    let _ = events.publish(
                        &sentinel,
                        &ProcessEvent::Lifecycle {
                            process_id: id,
                            from: t.from,
                            to: t.to,
                        },
                    );
                }
            })
        };
        machine.events().subscribe(Arc::clone(&lifecycle))?;

        Ok(Self {
            inner: Arc::new(ProcessInner {
                id,
                name,
                backend,
                config,
                scheduler,
                machine,
                sentinel,
                events,
                lifecycle,
                transport: Mutex::new(None),
                exchange: Mutex::new(None),
                health: Mutex::new(None),
                handshake_reply: Mutex::new(None),
                unit: Mutex::new(Unit::Idle),
            }),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &'static str {
        self.inner.backend.kind()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.machine.current().unwrap_or(ProcessState::Created)
    }

    /// States entered so far, oldest first
    pub fn history(&self) -> Vec<ProcessState> {
        self.inner.machine.history()
    }

    /// Lifecycle transitions and errors of this process
    pub fn events(&self) -> &Channel<ProcessEvent> {
        &self.inner.events
    }

    pub fn is_alive(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Payload the child answered the handshake with
    pub fn handshake_reply(&self) -> Option<Value> {
        self.inner.handshake_reply.lock().clone()
    }

    pub fn has_health_checker(&self) -> bool {
        self.inner.health.lock().is_some()
    }

    /// Long-lived exchange; only available while RUNNING
    pub fn exchange(&self) -> Result<Exchange> {
        let state = self.state();
        if state != ProcessState::Running {
            return Err(self.invalid(state, "exchange messages"));
        }
        self.inner
            .exchange
            .lock()
            .clone()
            .ok_or_else(|| self.invalid(state, "exchange messages"))
    }

    pub async fn send_and_receive(&self, message: Message, timeout: Duration) -> Result<Message> {
        let exchange = self.exchange()?;
        Ok(exchange.send_and_receive(message, timeout).await?)
    }

    /// Request with the configured remote reply timeout
    pub async fn request(&self, message: Message) -> Result<Message> {
        let exchange = self.exchange()?;
        Ok(exchange.request(message).await?)
    }

    /// Bring the process up; on any failure the backend is released, the
    /// process ends in ZOMBIE and the error is returned
    pub async fn init(&self) -> Result<()> {
        let state = self.state();
        if state != ProcessState::Created {
            return Err(self.invalid(state, "init"));
        }
        self.enter(ProcessState::Initializing)?;

        match self.bring_up().await {
            Ok(()) => {
                info!(process_id = %self.inner.id, kind = self.kind(), "Process running");
                Ok(())
            }
            Err(e) => {
                warn!(process_id = %self.inner.id, error = %e, "Process failed to start");
                self.emit_error(e.to_string());
                self.release().await;
                self.reap();
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut unit = inner.unit.lock();
            if *unit != Unit::Idle {
                return Err(self.invalid(self.state(), "init"));
            }
            *unit = Unit::Acquiring;
        }
        let acquired = inner.backend.acquire().await;

        let abandoned = {
            let mut unit = inner.unit.lock();
            if *unit == Unit::Acquiring {
                // A failed acquire may still leave something to clean up
                *unit = Unit::Held;
                if let Ok(transport) = &acquired {
                    *inner.transport.lock() = Some(Arc::clone(transport));
                }
                false
            } else {
                true
            }
        };
        if abandoned {
            // Killed while acquiring: the unit is ours to destroy
            warn!(process_id = %inner.id, "Process killed during acquire, releasing unit");
            if let Ok(transport) = &acquired {
                transport.close();
            }
            self.sig_term().await;
            acquired?;
            return Err(self.invalid(self.state(), "init"));
        }
        let transport = acquired?;
        self.enter(ProcessState::Handshaking)?;

        let reply = self.handshake(transport.as_ref()).await?;
        *inner.handshake_reply.lock() = Some(reply);

        let exchange = Exchange::with_timeout(
            format!("{}.exchange", inner.name),
            inner.scheduler.clone(),
            inner.config.exchange.remote_reply_timeout(),
        );
        exchange.connect(transport.as_ref())?;
        *inner.exchange.lock() = Some(exchange);
        self.enter(ProcessState::Running)
    }

    /// Negotiate over a throwaway exchange
    async fn handshake(&self, transport: &dyn TransportStrategy) -> Result<Value> {
        let inner = &self.inner;
        let settings = inner.config.handshake.clone();
        let exchange = Exchange::with_timeout(
            format!("{}.handshake", inner.name),
            inner.scheduler.clone(),
            settings.timeout(),
        );
        let outcome = async {
            exchange.connect(transport)?;
            let handshake = Handshake::new(
                inner.name.clone(),
                Arc::new(exchange.clone()),
                settings,
                inner.scheduler.clone(),
            )
            .with_payload(json!({ "processId": inner.id.to_string() }));
            handshake.start()?;
            Ok::<_, ProcessError>(handshake.wait().await?)
        }
        .await;
        exchange.disconnect(transport);
        exchange.dispose();
        outcome
    }

    /// Ask the child to stop: `willTerm`, then `term` until acknowledged.
    ///
    /// A child that keeps ignoring `term` (or rejects it) is marked ROGUE and
    /// released anyway; the error is then returned after reaching ZOMBIE.
    pub async fn graceful_teardown(&self) -> Result<()> {
        let state = self.state();
        if !matches!(state, ProcessState::Running | ProcessState::InComm) {
            return Err(self.invalid(state, "tear down"));
        }
        self.dispose_health();
        self.enter(ProcessState::Terminating)?;

        let exchange = self.inner.exchange.lock().clone();
        let rogue = match exchange {
            Some(exchange) => self.signal_term(&exchange).await,
            None => Some("no exchange to signal on".to_string()),
        };

        if !self.is_alive() {
            // Killed while signalling
            return Ok(());
        }
        if let Some(reason) = &rogue {
            self.enter(ProcessState::Rogue)?;
            let err = ProcessError::Rogue {
                process_id: self.inner.id,
                reason: reason.clone(),
            };
            error!(process_id = %self.inner.id, reason = %reason, "Process went rogue, forcing release");
            self.emit_error(err.to_string());
        }

        self.release().await;
        self.reap();

        match rogue {
            Some(reason) => Err(ProcessError::Rogue {
                process_id: self.inner.id,
                reason,
            }),
            None => Ok(()),
        }
    }

    /// `None` once `term` was acknowledged, otherwise why it was not
    async fn signal_term(&self, exchange: &Exchange) -> Option<String> {
        let teardown = &self.inner.config.teardown;
        let timeout = teardown.term_ack_timeout();

        if let Err(e) = exchange
            .send_and_receive(Message::new(mtype::WILL_TERM, Value::Null), timeout)
            .await
        {
            warn!(process_id = %self.inner.id, error = %e, "willTerm not acknowledged");
        }

        let max_missed = teardown.max_missed_term_acks.max(1);
        let mut missed = 0;
        loop {
            match exchange
                .send_and_receive(Message::new(mtype::TERM, Value::Null), timeout)
                .await
            {
                Ok(_) => {
                    debug!(process_id = %self.inner.id, missed, "term acknowledged");
                    return None;
                }
                Err(e) if e.is_timeout() => {
                    missed += 1;
                    if missed >= max_missed {
                        return Some(format!("{} term acks missed", missed));
                    }
                    warn!(process_id = %self.inner.id, missed, max_missed, "term not acknowledged, resending");
                }
                Err(e) => return Some(format!("term failed: {}", e)),
            }
        }
    }

    /// Release immediately and go to ZOMBIE; no-op once reaped
    pub async fn kill(&self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.release().await;
        self.reap();
        Ok(())
    }

    /// Probe the child with `healthCheck`; failures move RUNNING → INCOMM
    pub fn attach_health_checker(&self) -> Result<()> {
        let exchange = self.exchange()?;
        let settings = &self.inner.config.health;
        let probe = ProbeCheck::new(
            self.inner.name.clone(),
            Arc::new(exchange),
            settings.timeout(),
            settings.max_missed,
        );
        let checker = HealthChecker::new(
            self.inner.name.clone(),
            Arc::new(probe),
            settings.interval(),
            self.inner.scheduler.clone(),
        )?;

        let weak: Weak<ProcessInner> = Arc::downgrade(&self.inner);
        let on_error: SubscriberRef<HealthCheckError> = Arc::new(move |err: &HealthCheckError| {
            if let Some(inner) = weak.upgrade() {
                Process { inner }.lose_contact(err);
            }
        });
        checker.errors().subscribe(on_error)?;

        let previous = self.inner.health.lock().replace(checker);
        if let Some(previous) = previous {
            previous.dispose();
        }
        debug!(process_id = %self.inner.id, interval = ?settings.interval(), "Health checker attached");
        Ok(())
    }

    fn lose_contact(&self, err: &HealthCheckError) {
        if self.state() != ProcessState::Running {
            return;
        }
        if self.enter(ProcessState::InComm).is_err() {
            return;
        }
        let err = ProcessError::HealthCheck {
            process_id: self.inner.id,
            cause: format!("{:#}", err.cause),
        };
        error!(process_id = %self.inner.id, error = %err, "Lost contact with process");
        self.emit_error(err.to_string());
    }

    fn enter(&self, to: ProcessState) -> Result<()> {
        self.inner.machine.transition_to(to)?;
        Ok(())
    }

    fn reap(&self) {
        if self.state() == ProcessState::Zombie {
            return;
        }
        match self.enter(ProcessState::Zombie) {
            Ok(()) => info!(process_id = %self.inner.id, "Process reaped"),
            Err(e) => warn!(process_id = %self.inner.id, error = %e, "Process could not be reaped"),
        }
    }

    fn dispose_health(&self) {
        let checker = self.inner.health.lock().take();
        if let Some(checker) = checker {
            checker.dispose();
        }
    }

    /// Tear down everything `init` built; the backend's `did_sig_term` runs
    /// once for a held unit. A unit still being acquired is left to
    /// `bring_up`, which destroys it when the acquire completes.
    async fn release(&self) {
        let held = {
            let mut unit = self.inner.unit.lock();
            let held = *unit == Unit::Held;
            *unit = Unit::Released;
            held
        };

        self.dispose_health();
        let exchange = self.inner.exchange.lock().take();
        if let Some(exchange) = exchange {
            exchange.dispose();
        }
        let transport = self.inner.transport.lock().take();
        if let Some(transport) = transport {
            transport.close();
        }

        if held {
            self.sig_term().await;
        }
    }

    async fn sig_term(&self) {
        if let Err(e) = self.inner.backend.did_sig_term().await {
            warn!(process_id = %self.inner.id, error = %e, "Backend cleanup failed");
            self.emit_error(e.to_string());
        }
    }

    fn emit_error(&self, message: String) {
        let _ = self.inner.events.publish(
            &self.inner.sentinel,
            &ProcessEvent::Error {
                process_id: self.inner.id,
                message,
            },
        );
    }

    fn invalid(&self, state: ProcessState, operation: &'static str) -> ProcessError {
        ProcessError::InvalidState {
            process_id: self.inner.id,
            state,
            operation,
        }
    }
}

impl Drop for ProcessInner {
    fn drop(&mut self) {
        self.machine.events().unsubscribe(&self.lifecycle);
        if let Some(checker) = self.health.get_mut().take() {
            checker.dispose();
        }
        if let Some(exchange) = self.exchange.get_mut().take() {
            exchange.dispose();
        }
        if let Some(transport) = self.transport.get_mut().take() {
            transport.close();
        }
        if *self.unit.get_mut() == Unit::Held {
            warn!(process_id = %self.id, "Process dropped without being reaped");
        }
        let _ = self.events.dispose(&self.sentinel);
    }
}
