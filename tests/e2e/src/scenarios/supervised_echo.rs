//! Supervised Echo E2E Test
//!
//! Tests the complete supervision flow:
//! Manager → Sandbox fabricate → Handshake → RUNNING traffic → willTerm/term →
//! Sandbox destroy → ZOMBIE

use crate::fixtures::EchoService;
use crate::framework::{TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{bail, ensure, Context, Result};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use warden_actors::{Pid, ProcessError, ProcessEvent};
use warden_channels::SubscriberRef;
use warden_exchange::ExchangeError;
use warden_types::Message;

pub struct SupervisedEchoTest {
    pub url: String,
    pub requests: u32,
    pub service: Arc<EchoService>,
    spawned: Mutex<Option<Pid>>,
}

impl SupervisedEchoTest {
    pub fn new(url: impl Into<String>, requests: u32) -> Self {
        Self {
            url: url.into(),
            requests,
            service: Arc::new(EchoService::default()),
            spawned: Mutex::new(None),
        }
    }
}

impl Default for SupervisedEchoTest {
    fn default() -> Self {
        Self::new("app://echo", 50)
    }
}

#[async_trait::async_trait]
impl TestScenario for SupervisedEchoTest {
    async fn setup(&self, framework: &TestFramework) -> Result<()> {
        framework
            .sandbox()
            .route(self.url.clone(), Some(EchoService::responder(&self.service)));
        Ok(())
    }

    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let manager = framework.manager();
        let lifecycle = Arc::new(AtomicU64::new(0));
        let counter: SubscriberRef<ProcessEvent> = {
            let lifecycle = Arc::clone(&lifecycle);
            Arc::new(move |e: &ProcessEvent| {
                if matches!(e, ProcessEvent::Lifecycle { .. }) {
                    lifecycle.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        manager.events().subscribe(Arc::clone(&counter))?;

        let pid = manager
            .spawn_remote(framework.sandbox().clone(), &self.url)
            .await
            .context("spawn failed")?;
        *self.spawned.lock() = Some(pid.clone());
        info!(pid = %pid, url = %self.url, "Supervised process running");

        let mut metrics = TestMetrics {
            processes_spawned: 1,
            ..TestMetrics::default()
        };
        let timeout = framework.config().warden.exchange.remote_reply_timeout();
        for i in 0..self.requests {
            let started = Instant::now();
            metrics.requests_sent += 1;
            let reply = pid
                .send_and_receive(Message::new("echo", json!({ "seq": i })), timeout)
                .await
                .with_context(|| format!("echo #{} failed", i))?;
            ensure!(reply.payload["echo"]["seq"] == json!(i), "echo #{} mismatched", i);
            metrics.record_round_trip(started.elapsed());
        }

        // Handler errors come back as remote errors, not timeouts
        match pid.send_and_receive(Message::new("fail", json!(null)), timeout).await {
            Err(ProcessError::Exchange(ExchangeError::Remote(e))) => {
                ensure!(e.code == "handler", "unexpected error code {}", e.code)
            }
            other => bail!("expected a remote error, got {:?}", other),
        }

        pid.terminate().await.context("teardown failed")?;
        ensure!(!pid.is_alive(), "process still alive after teardown");
        ensure!(framework.sandbox().live_count() == 0, "sandbox unit leaked");
        metrics.processes_reaped = 1;

        manager.events().unsubscribe(&counter);
        metrics.lifecycle_events = lifecycle.load(Ordering::SeqCst);
        // Initializing, Handshaking, Running, Terminating, Zombie
        ensure!(
            metrics.lifecycle_events == 5,
            "saw {} lifecycle events",
            metrics.lifecycle_events
        );
        ensure!(
            self.service.served() == u64::from(self.requests),
            "service answered {} echoes",
            self.service.served()
        );
        ensure!(pid.state().is_err(), "reaped pid still resolves");

        Ok(TestResult::passed(self.name(), metrics))
    }

    async fn cleanup(&self, _framework: &TestFramework) -> Result<()> {
        let leftover = self.spawned.lock().take();
        if let Some(pid) = leftover {
            if pid.is_alive() {
                warn!(pid = %pid, "Killing leftover process");
                pid.kill().await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "supervised_echo"
    }

    fn description(&self) -> &str {
        "Sandboxed process from handshake through application traffic to graceful teardown"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}
