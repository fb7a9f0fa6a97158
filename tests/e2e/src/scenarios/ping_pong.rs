//! Ping/Pong over twined exchanges
//!
//! Client → Exchange ~ Exchange → Dispatcher → EchoService, with no process
//! supervision in between.

use crate::fixtures::EchoService;
use crate::framework::{TestFramework, TestMetrics, TestResult, TestScenario};
use anyhow::{ensure, Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use warden_exchange::{Dispatcher, Exchange};
use warden_types::{default_scheduler, Message};

pub struct PingPongTest {
    pub requests: u32,
    pub reply_timeout: Duration,
}

impl Default for PingPongTest {
    fn default() -> Self {
        Self {
            requests: 100,
            reply_timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait::async_trait]
impl TestScenario for PingPongTest {
    async fn execute(&self, _framework: &TestFramework) -> Result<TestResult> {
        info!(requests = self.requests, "Running ping/pong over twined exchanges");

        let client = Exchange::new("client", default_scheduler());
        let server = Exchange::new("server", default_scheduler());
        client.twine(&server)?;

        let service = Arc::new(EchoService::default());
        let dispatcher = Dispatcher::new("server.dispatcher", EchoService::responder(&service));
        dispatcher.attach(&server)?;
        dispatcher.enable();

        let mut metrics = TestMetrics::default();
        for i in 0..self.requests {
            let started = Instant::now();
            metrics.requests_sent += 1;
            let reply = client
                .send_and_receive(Message::new("echo", json!(i)), self.reply_timeout)
                .await
                .with_context(|| format!("ping #{} failed", i))?;
            ensure!(reply.payload["echo"] == json!(i), "reply #{} carried {}", i, reply.payload);
            metrics.record_round_trip(started.elapsed());
        }
        debug!(served = service.served(), "Ping/pong done");

        ensure!(client.pending_count() == 0, "requests left pending");
        ensure!(
            dispatcher.stats().dispatched == u64::from(self.requests),
            "dispatcher saw {} requests",
            dispatcher.stats().dispatched
        );

        client.untwine(&server)?;
        client.dispose();
        server.dispose();
        Ok(TestResult::passed(self.name(), metrics))
    }

    fn name(&self) -> &str {
        "ping_pong"
    }

    fn description(&self) -> &str {
        "Correlated request/reply between two twined exchanges"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}
