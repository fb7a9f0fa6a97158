//! Test fixtures: logging, fast settings and an echo service

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden_config::WardenConfig;
use warden_exchange::{InvocationRouter, Responder};
use warden_types::ErrorValue;

/// Install a fmt subscriber honouring `RUST_LOG`; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Settings with short timers so scenarios finish quickly
pub fn fast_config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.handshake.timeout_ms = 100;
    config.exchange.remote_reply_timeout_ms = 500;
    config.health.interval_ms = 200;
    config.health.timeout_ms = 50;
    config.teardown.term_ack_timeout_ms = 100;
    config
}

/// Application service behind the fixtures' processes
#[derive(Debug, Default)]
pub struct EchoService {
    served: AtomicU64,
}

impl EchoService {
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Router answering `echo` with its payload and `fail` with an error
    pub fn responder(service: &Arc<Self>) -> Arc<dyn Responder> {
        let router = InvocationRouter::new(Arc::clone(service))
            .handle("echo", |service, _ctx, payload, reply| {
                let n = service.served.fetch_add(1, Ordering::SeqCst) + 1;
                reply.ok(json!({ "echo": payload, "served": n }))
            })
            .handle("fail", |_, _ctx, _payload, reply| {
                reply.err(ErrorValue::handler("echo service refused"))
            });
        Arc::new(router)
    }
}
