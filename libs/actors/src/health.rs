//! Health checking
//!
//! A [`HealthChecker`] loops Chilling → HealthChecking → Chilling until its
//! check delegate fails once, then parks in Error and raises a single
//! [`HealthCheckError`]. It never resumes on its own.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};
use warden_channels::{Channel, Sentinel};
use warden_exchange::Requester;
use warden_fsm::{StateGraph, StateMachine};
use warden_types::{mtype, Message, SharedScheduler, TaskHandle};

/// Health checker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Created,
    Chilling,
    HealthChecking,
    Error,
    Disposed,
}

/// Liveness check run on every tick
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> anyhow::Result<()>;
}

/// Raised once when a check fails
#[derive(Debug, Clone)]
pub struct HealthCheckError {
    pub checker: String,
    /// Checks run, including the failing one
    pub checks: u64,
    pub cause: Arc<anyhow::Error>,
}

impl std::fmt::Display for HealthCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed check #{}: {:#}", self.checker, self.checks, self.cause)
    }
}

const SCHEDULE_CHECK: &str = "scheduleCheck";
const RAISE_ERROR: &str = "raiseError";

fn health_graph() -> StateGraph<HealthState> {
    use HealthState::*;
    StateGraph::new([Created, Chilling, HealthChecking, Error, Disposed])
        .allow(Created, [Chilling])
        .allow(Chilling, [HealthChecking])
        .allow(HealthChecking, [Chilling, Error])
        .allow_from_all(Disposed)
        .initial(Created)
        .after(Chilling, SCHEDULE_CHECK)
        .after(Error, RAISE_ERROR)
}

struct CheckerInner {
    name: String,
    machine: StateMachine<HealthState>,
    delegate: Arc<dyn HealthCheck>,
    interval: Duration,
    scheduler: SharedScheduler,
    sentinel: Arc<Sentinel>,
    errors: Channel<HealthCheckError>,
    task: Mutex<Option<TaskHandle>>,
    last_error: Mutex<Option<Arc<anyhow::Error>>>,
    checks: AtomicU64,
}

/// Periodic liveness probe
pub struct HealthChecker {
    inner: Arc<CheckerInner>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("checks", &self.checks())
            .finish()
    }
}

impl HealthChecker {
    /// Create and immediately start chilling; the first check runs after
    /// `interval`
    pub fn new(
        name: impl Into<String>,
        delegate: Arc<dyn HealthCheck>,
        interval: Duration,
        scheduler: SharedScheduler,
    ) -> warden_fsm::Result<Self> {
        let name = name.into();
        let sentinel = Arc::new(Sentinel::new());
        let machine =
            StateMachine::new(format!("{}.health", name), health_graph(), scheduler.clone())?;
        let inner = Arc::new(CheckerInner {
            errors: Channel::new(format!("{}.health.errors", name), &sentinel),
            name,
            machine,
            delegate,
            interval,
            scheduler,
            sentinel,
            task: Mutex::new(None),
            last_error: Mutex::new(None),
            checks: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&inner);
        inner.machine.bind(SCHEDULE_CHECK, move |_| {
            if let Some(inner) = weak.upgrade() {
                CheckerInner::schedule_check(&inner);
            }
            Ok(())
        });
        let weak = Arc::downgrade(&inner);
        inner.machine.bind(RAISE_ERROR, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.raise_error();
            }
            Ok(())
        });

        inner.machine.transition_to(HealthState::Chilling)?;
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> Option<HealthState> {
        self.inner.machine.current()
    }

    /// States entered so far, oldest first
    pub fn history(&self) -> Vec<HealthState> {
        self.inner.machine.history()
    }

    /// Carries the single [`HealthCheckError`] of this checker
    pub fn errors(&self) -> &Channel<HealthCheckError> {
        &self.inner.errors
    }

    pub fn checks(&self) -> u64 {
        self.inner.checks.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.last_error.lock().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == Some(HealthState::Disposed)
    }

    /// Cancel any in-flight check and park in Disposed; idempotent
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        // Disposed is reachable from every other state
        let _ = self.inner.machine.transition_to(HealthState::Disposed);
        let _ = self.inner.errors.dispose(&self.inner.sentinel);
        debug!(checker = %self.inner.name, checks = self.checks(), "Health checker disposed");
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl CheckerInner {
    fn schedule_check(this: &Arc<Self>) {
        if this.machine.current() != Some(HealthState::Chilling) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(this);
        let sleep = this.scheduler.sleep(this.interval);
        let handle = this.scheduler.spawn(Box::pin(async move {
            sleep.await;
            if let Some(inner) = weak.upgrade() {
                inner.run_check().await;
            }
        }));
        *this.task.lock() = Some(handle);
    }

    async fn run_check(&self) {
        if self.machine.transition_to(HealthState::HealthChecking).is_err() {
            return;
        }
        let checks = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.delegate.check().await;

        if self.machine.current() != Some(HealthState::HealthChecking) {
            return;
        }
        match result {
            Ok(()) => {
                debug!(checker = %self.name, checks, "Health check passed");
                let _ = self.machine.transition_to(HealthState::Chilling);
            }
            Err(e) => {
                warn!(checker = %self.name, checks, error = %e, "Health check failed");
                *self.last_error.lock() = Some(Arc::new(e));
                let _ = self.machine.transition_to(HealthState::Error);
            }
        }
    }

    fn raise_error(&self) {
        let Some(cause) = self.last_error.lock().clone() else {
            return;
        };
        let notification = HealthCheckError {
            checker: self.name.clone(),
            checks: self.checks.load(Ordering::SeqCst),
            cause,
        };
        error!(checker = %self.name, error = %notification, "Health checker halted");
        let _ = self.errors.publish(&self.sentinel, &notification);
    }
}

/// Check delegate that probes a peer with `healthCheck` requests.
///
/// Tolerates up to `max_missed - 1` consecutive timeouts; the next one, or
/// any other failure, fails the check.
pub struct ProbeCheck {
    name: String,
    requester: Arc<dyn Requester>,
    timeout: Duration,
    max_missed: u32,
    missed: AtomicU32,
}

impl ProbeCheck {
    pub fn new(
        name: impl Into<String>,
        requester: Arc<dyn Requester>,
        timeout: Duration,
        max_missed: u32,
    ) -> Self {
        Self {
            name: name.into(),
            requester,
            timeout,
            max_missed: max_missed.max(1),
            missed: AtomicU32::new(0),
        }
    }

    /// Consecutive probes without an answer
    pub fn missed(&self) -> u32 {
        self.missed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for ProbeCheck {
    async fn check(&self) -> anyhow::Result<()> {
        let probe = Message::new(mtype::HEALTH_CHECK, serde_json::Value::Null);
        match self.requester.send_and_receive(probe, self.timeout).await {
            Ok(_) => {
                self.missed.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                let missed = self.missed.fetch_add(1, Ordering::SeqCst) + 1;
                if missed >= self.max_missed {
                    anyhow::bail!("{}: {} consecutive health checks missed", self.name, missed);
                }
                warn!(probe = %self.name, missed, max_missed = self.max_missed, "Health check missed");
                Ok(())
            }
            Err(e) => {
                Err(anyhow::Error::new(e).context(format!("{}: health check rejected", self.name)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_channels::SubscriberRef;
    use warden_exchange::{ExchangeError, Result as ExchangeResult};
    use warden_types::{default_scheduler, MessageId};

    /// Fails on the configured call number
    struct FailOn {
        call: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthCheck for FailOn {
        async fn check(&self) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.call {
                anyhow::bail!("check {} failed", n);
            }
            Ok(())
        }
    }

    fn count_errors(checker: &HealthChecker) -> Arc<Mutex<Vec<HealthCheckError>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber: SubscriberRef<HealthCheckError> =
            Arc::new(move |e: &HealthCheckError| sink.lock().push(e.clone()));
        checker.errors().subscribe(subscriber).unwrap();
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_halts_on_first_failure() {
        use HealthState::*;
        let delegate = Arc::new(FailOn {
            call: 2,
            calls: AtomicU32::new(0),
        });
        let checker = HealthChecker::new(
            "unit",
            delegate.clone(),
            Duration::from_millis(100),
            default_scheduler(),
        )
        .unwrap();
        let errors = count_errors(&checker);

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(
            checker.history(),
            vec![Created, Chilling, HealthChecking, Chilling, HealthChecking, Error]
        );
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(errors.lock()[0].checks, 2);
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 2);
        assert!(checker.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_waits_for_interval() {
        let delegate = Arc::new(FailOn {
            call: 0,
            calls: AtomicU32::new(0),
        });
        let checker = HealthChecker::new(
            "unit",
            delegate.clone(),
            Duration::from_millis(100),
            default_scheduler(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(251)).await;
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 3);
        assert_eq!(checker.state(), Some(HealthState::Chilling));
    }

    struct Hang;

    #[async_trait]
    impl HealthCheck for Hang {
        async fn check(&self) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_in_flight_check() {
        let checker =
            HealthChecker::new(
                "unit",
                Arc::new(Hang),
                Duration::from_millis(10),
                default_scheduler(),
            )
                .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(checker.state(), Some(HealthState::HealthChecking));

        checker.dispose();
        checker.dispose();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(checker.state(), Some(HealthState::Disposed));
        assert_eq!(
            checker.history().last().copied(),
            Some(HealthState::Disposed)
        );
        assert_eq!(checker.checks(), 1);
    }

    /// Answers only the probes listed as `true`
    struct Flaky {
        answers: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Requester for Flaky {
        async fn send_and_receive(
            &self,
            message: Message,
            _timeout: Duration,
        ) -> ExchangeResult<Message> {
            let answer = {
                let mut answers = self.answers.lock();
                if answers.is_empty() { false } else { answers.remove(0) }
            };
            if answer {
                Ok(Message::reply_to(&message, serde_json::Value::Null))
            } else {
                Err(ExchangeError::Timeout {
                    msg_id: message.msg_id,
                    timeout_ms: 1,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_probe_tolerates_isolated_misses() {
        let flaky = Arc::new(Flaky {
            answers: Mutex::new(vec![false, true, false, false]),
        });
        let probe = ProbeCheck::new("probe", flaky, Duration::from_millis(5), 2);

        assert!(probe.check().await.is_ok());
        assert_eq!(probe.missed(), 1);
        assert!(probe.check().await.is_ok());
        assert_eq!(probe.missed(), 0);
        assert!(probe.check().await.is_ok());
        assert!(probe.check().await.is_err());
        assert_eq!(probe.missed(), 2);
    }

    struct Refuses;

    #[async_trait]
    impl Requester for Refuses {
        async fn send_and_receive(
            &self,
            _message: Message,
            _timeout: Duration,
        ) -> ExchangeResult<Message> {
            Err(ExchangeError::Cancelled {
                msg_id: MessageId::new(),
                reason: warden_types::CancellationReason::Disposed,
            })
        }
    }

    #[tokio::test]
    async fn test_probe_fails_fast_on_other_errors() {
        let probe = ProbeCheck::new("probe", Arc::new(Refuses), Duration::from_millis(5), 3);
        let err = probe.check().await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
        assert_eq!(probe.missed(), 0);
    }
}
