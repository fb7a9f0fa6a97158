//! Scenario harness shared by the runner and the integration tests

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;
use warden_actors::{InProcessSandbox, ProcessManager};
use warden_config::WardenConfig;
use warden_types::default_scheduler;

/// Owns the manager and sandbox every scenario runs against
pub struct TestFramework {
    config: TestConfig,
    manager: ProcessManager,
    sandbox: Arc<InProcessSandbox>,
    test_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Upper bound for a scenario's `execute`, in seconds
    pub timeout_secs: u64,

    /// Run each scenario's `cleanup` after it finishes
    pub cleanup: bool,

    /// Settings for the supervised processes
    pub warden: WardenConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            cleanup: true,
            warden: crate::fixtures::fast_config(),
        }
    }
}

/// One end-to-end scenario; `setup` and `cleanup` default to no-ops
#[async_trait::async_trait]
pub trait TestScenario: Send + Sync {
    async fn setup(&self, _framework: &TestFramework) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, framework: &TestFramework) -> Result<TestResult>;

    async fn cleanup(&self, _framework: &TestFramework) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Capped by [`TestConfig::timeout_secs`]
    fn timeout(&self) -> Duration;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_name: String,
    pub success: bool,
    pub duration: Duration,
    pub error_message: Option<String>,
    pub metrics: TestMetrics,
}

impl TestResult {
    pub fn passed(scenario_name: &str, metrics: TestMetrics) -> Self {
        Self {
            scenario_name: scenario_name.to_string(),
            success: true,
            duration: Duration::ZERO,
            error_message: None,
            metrics,
        }
    }

    pub fn failed(scenario_name: &str, error_message: impl Into<String>) -> Self {
        Self {
            scenario_name: scenario_name.to_string(),
            success: false,
            duration: Duration::ZERO,
            error_message: Some(error_message.into()),
            metrics: TestMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestMetrics {
    pub requests_sent: u64,
    pub replies_received: u64,
    pub processes_spawned: u32,
    pub processes_reaped: u32,
    pub lifecycle_events: u64,
    pub max_round_trip_us: u64,
}

impl TestMetrics {
    pub fn record_round_trip(&mut self, elapsed: Duration) {
        self.replies_received += 1;
        self.max_round_trip_us = self.max_round_trip_us.max(elapsed.as_micros() as u64);
    }
}

impl TestFramework {
    pub fn new(config: TestConfig) -> Result<Self> {
        config.warden.validate()?;
        let scheduler = default_scheduler();
        Ok(Self {
            manager: ProcessManager::new(config.warden.clone(), scheduler.clone()),
            sandbox: Arc::new(InProcessSandbox::new(scheduler)),
            config,
            test_id: Uuid::new_v4(),
        })
    }

    /// Run a scenario; failures and timeouts are reported in the result
    pub async fn run_scenario<S: TestScenario>(&self, scenario: S) -> Result<TestResult> {
        let name = scenario.name().to_string();
        info!(scenario = %name, test_id = %self.test_id, "{}", scenario.description());
        let started = Instant::now();

        let limit = scenario
            .timeout()
            .min(Duration::from_secs(self.config.timeout_secs));
        let outcome = match scenario.setup(self).await {
            Err(e) => Err(e.context("setup failed")),
            Ok(()) => tokio::time::timeout(limit, scenario.execute(self))
                .await
                .unwrap_or_else(|_| Err(anyhow!("timed out after {:?}", limit))),
        };

        if self.config.cleanup {
            if let Err(e) = scenario.cleanup(self).await {
                warn!(scenario = %name, error = %format!("{:#}", e), "Cleanup failed");
            }
        }

        let mut result = outcome.unwrap_or_else(|e| {
            error!(scenario = %name, error = %format!("{:#}", e), "Scenario failed");
            TestResult::failed(&name, format!("{:#}", e))
        });
        result.duration = started.elapsed();
        info!(
            scenario = %name,
            success = result.success,
            elapsed = ?result.duration,
            "Scenario finished"
        );
        Ok(result)
    }

    pub fn manager(&self) -> &ProcessManager {
        &self.manager
    }

    /// Sandbox every remote scenario fabricates from
    pub fn sandbox(&self) -> &Arc<InProcessSandbox> {
        &self.sandbox
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn test_id(&self) -> Uuid {
        self.test_id
    }

    /// Tear down every process still running
    pub async fn shutdown(&self) -> usize {
        self.manager.shutdown().await
    }
}
