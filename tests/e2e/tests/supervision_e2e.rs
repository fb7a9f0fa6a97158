//! End-to-end supervision tests

use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warden_actors::{ProcessError, ProcessState};
use warden_e2e_tests::{
    fast_config, init_tracing, EchoService, PingPongTest, RestartRecoveryTest, SupervisedEchoTest,
    TestConfig, TestFramework,
};
use warden_exchange::ExchangeError;
use warden_types::{mtype, Message};

fn framework() -> TestFramework {
    init_tracing();
    TestFramework::new(TestConfig::default()).expect("Failed to create test framework")
}

#[tokio::test(start_paused = true)]
async fn test_ping_pong_scenario() {
    let framework = framework();
    let result = framework
        .run_scenario(PingPongTest {
            requests: 20,
            reply_timeout: Duration::from_millis(200),
        })
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.metrics.requests_sent, 20);
    assert_eq!(result.metrics.replies_received, 20);
}

#[tokio::test(start_paused = true)]
async fn test_supervised_echo_scenario() {
    let framework = framework();
    let scenario = SupervisedEchoTest::new("app://echo", 10);
    let service = Arc::clone(&scenario.service);

    let result = framework.run_scenario(scenario).await.unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.metrics.lifecycle_events, 5);
    assert_eq!(service.served(), 10);
    assert!(framework.manager().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_scenario() {
    let framework = framework();
    let result = framework.run_scenario(RestartRecoveryTest::new(2)).await.unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.metrics.processes_spawned, 3);
    assert_eq!(result.metrics.processes_reaped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_all_scenarios_share_one_framework() {
    let framework = framework();
    let results = vec![
        framework.run_scenario(PingPongTest::default()).await.unwrap(),
        framework.run_scenario(SupervisedEchoTest::default()).await.unwrap(),
        framework.run_scenario(RestartRecoveryTest::default()).await.unwrap(),
    ];

    assert!(results.iter().all(|r| r.success));
    assert_eq!(framework.shutdown().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_child_is_forced_out() {
    let framework = framework();
    let service = Arc::new(EchoService::default());
    framework
        .sandbox()
        .route("app://stubborn", Some(EchoService::responder(&service)));

    let pid = framework
        .manager()
        .spawn_remote(framework.sandbox().clone(), "app://stubborn")
        .await
        .unwrap();
    let handle = framework.sandbox().handles().pop().unwrap();
    let endpoint = framework.sandbox().endpoint(&handle).unwrap();

    // Stops answering health checks: loses contact
    endpoint.silence(mtype::HEALTH_CHECK);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_matches!(pid.state(), Ok(ProcessState::InComm));
    assert_matches!(
        pid.send_and_receive(Message::new("echo", json!(1)), Duration::from_millis(10))
            .await,
        Err(ProcessError::InvalidState {
            state: ProcessState::InComm,
            ..
        })
    );

    // Ignores term as well: goes rogue but is still released
    endpoint.silence(mtype::TERM);
    assert_matches!(pid.terminate().await, Err(ProcessError::Rogue { .. }));
    assert!(!pid.is_alive());
    assert_eq!(framework.sandbox().live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_remote_errors_and_timeouts_are_distinct() {
    let framework = framework();
    let service = Arc::new(EchoService::default());
    let pid = framework
        .manager()
        .spawn_local(Some(EchoService::responder(&service)))
        .await
        .unwrap();

    assert_matches!(
        pid.send_and_receive(Message::new("fail", json!(null)), Duration::from_millis(100))
            .await,
        Err(ProcessError::Exchange(ExchangeError::Remote(_)))
    );

    // The echo router has no fallback, so unknown types go unanswered
    let err = pid
        .send_and_receive(
            Message::new("nobody-handles-this", json!(null)),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ProcessError::Exchange(ExchangeError::Timeout { .. }));
    assert!(err.is_timeout());

    framework.shutdown().await;
    assert!(!pid.is_alive());
    assert_matches!(
        framework.manager().spawn_local(None).await,
        Err(ProcessError::Channel(_))
    );
}

#[test]
fn test_fast_config_is_valid() {
    assert!(fast_config().validate().is_ok());
}
