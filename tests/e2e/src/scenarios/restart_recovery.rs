//! Restart Recovery E2E Test
//!
//! Restarting swaps in a freshly initialised process under the same Pid;
//! callers holding the Pid keep working.

use crate::fixtures::EchoService;
use crate::framework::{TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{ensure, Context, Result};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use warden_actors::{Pid, ProcessState};
use warden_types::Message;

pub struct RestartRecoveryTest {
    pub restarts: u32,
    pub service: Arc<EchoService>,
    spawned: Mutex<Option<Pid>>,
}

impl RestartRecoveryTest {
    pub fn new(restarts: u32) -> Self {
        Self {
            restarts,
            service: Arc::new(EchoService::default()),
            spawned: Mutex::new(None),
        }
    }
}

impl Default for RestartRecoveryTest {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait::async_trait]
impl TestScenario for RestartRecoveryTest {
    async fn execute(&self, framework: &TestFramework) -> Result<TestResult> {
        let manager = framework.manager();
        let pid = manager
            .spawn_local(Some(EchoService::responder(&self.service)))
            .await
            .context("spawn failed")?;
        *self.spawned.lock() = Some(pid.clone());

        let mut metrics = TestMetrics {
            processes_spawned: 1,
            ..TestMetrics::default()
        };
        let timeout = framework.config().warden.exchange.remote_reply_timeout();

        for round in 0..=self.restarts {
            if round > 0 {
                let before = manager.process(&pid)?;
                pid.restart().await.with_context(|| format!("restart #{} failed", round))?;
                ensure!(before.state() == ProcessState::Zombie, "old process not reaped");
                metrics.processes_spawned += 1;
                metrics.processes_reaped += 1;
                info!(pid = %pid, round, "Process restarted");
            }

            ensure!(pid.state()? == ProcessState::Running, "pid not running after round {}", round);
            let started = Instant::now();
            metrics.requests_sent += 1;
            let reply = pid
                .send_and_receive(Message::new("echo", json!(round)), timeout)
                .await
                .with_context(|| format!("echo after round {} failed", round))?;
            ensure!(reply.payload["echo"] == json!(round), "stale reply in round {}", round);
            metrics.record_round_trip(started.elapsed());
        }

        pid.terminate().await?;
        metrics.processes_reaped += 1;
        ensure!(manager.is_empty(), "manager still tracks processes");

        Ok(TestResult::passed(self.name(), metrics))
    }

    async fn cleanup(&self, _framework: &TestFramework) -> Result<()> {
        let leftover = self.spawned.lock().take();
        if let Some(pid) = leftover {
            if pid.is_alive() {
                pid.kill().await?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "restart_recovery"
    }

    fn description(&self) -> &str {
        "Repeated restarts keep the Pid valid and the service reachable"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}
