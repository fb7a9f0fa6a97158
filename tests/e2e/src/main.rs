//! Runs the Warden end-to-end scenarios outside the test harness

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden_config::WardenConfig;
use warden_e2e_tests::{
    PingPongTest, RestartRecoveryTest, SupervisedEchoTest, TestConfig, TestFramework, TestResult,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ping_pong, supervised_echo, restart_recovery or all
    #[arg(short, long, default_value = "all")]
    scenario: String,

    /// Upper bound per scenario, in seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// TOML file with supervision settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the results as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = TestConfig {
        timeout_secs: args.timeout,
        ..TestConfig::default()
    };
    if let Some(path) = &args.config {
        config.warden = WardenConfig::load_or_default(path)?;
    }
    let framework = TestFramework::new(config)?;

    let results = match args.scenario.as_str() {
        "ping_pong" => vec![framework.run_scenario(PingPongTest::default()).await?],
        "supervised_echo" => vec![framework.run_scenario(SupervisedEchoTest::default()).await?],
        "restart_recovery" => vec![framework.run_scenario(RestartRecoveryTest::default()).await?],
        "all" => vec![
            framework.run_scenario(PingPongTest::default()).await?,
            framework.run_scenario(SupervisedEchoTest::default()).await?,
            framework.run_scenario(RestartRecoveryTest::default()).await?,
        ],
        other => bail!("unknown scenario {:?}", other),
    };

    let leftover = framework.shutdown().await;
    if leftover > 0 {
        error!(leftover, "Processes still running after the scenarios");
    }

    for result in &results {
        let status = if result.success { "PASS" } else { "FAIL" };
        println!(
            "{} {} in {} ms: {} requests, {} replies, max rtt {} us",
            status,
            result.scenario_name,
            result.duration.as_millis(),
            result.metrics.requests_sent,
            result.metrics.replies_received,
            result.metrics.max_round_trip_us
        );
        if let Some(message) = &result.error_message {
            println!("    {}", message);
        }
    }

    if let Some(path) = &args.output {
        write_results(&results, path).await?;
        info!(path = %path.display(), "Results written");
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{} of {} scenarios failed", failed, results.len());
    }
    Ok(())
}

async fn write_results(results: &[TestResult], path: &PathBuf) -> Result<()> {
    let report = serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "results": results,
    });
    tokio::fs::write(path, serde_json::to_string_pretty(&report)?).await?;
    Ok(())
}
