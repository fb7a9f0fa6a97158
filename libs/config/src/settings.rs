//! Configuration Loading
//!
//! Loads [`WardenConfig`] from a TOML file with optional environment-specific
//! overrides and `WARDEN_` environment variables on top.

use crate::defaults;
use anyhow::{ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Top-level configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WardenConfig {
    pub exchange: ExchangeSettings,
    pub handshake: HandshakeSettings,
    pub health: HealthSettings,
    pub teardown: TeardownSettings,
}

/// Request/reply settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExchangeSettings {
    pub remote_reply_timeout_ms: u64,
}

/// Startup negotiation settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HandshakeSettings {
    pub timeout_ms: u64,
    pub max_tries: u32,
    pub retry_delay_ms: u64,
}

/// Liveness probing settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub max_missed: u32,
}

/// Graceful teardown settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TeardownSettings {
    pub term_ack_timeout_ms: u64,
    pub max_missed_term_acks: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            remote_reply_timeout_ms: defaults::exchange::REMOTE_REPLY_TIMEOUT_MS,
        }
    }
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::handshake::TIMEOUT_MS,
            max_tries: defaults::handshake::MAX_TRIES,
            retry_delay_ms: defaults::handshake::RETRY_DELAY_MS,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: defaults::health::INTERVAL_MS,
            timeout_ms: defaults::health::TIMEOUT_MS,
            max_missed: defaults::health::MAX_MISSED,
        }
    }
}

impl Default for TeardownSettings {
    fn default() -> Self {
        Self {
            term_ack_timeout_ms: defaults::teardown::TERM_ACK_TIMEOUT_MS,
            max_missed_term_acks: defaults::teardown::MAX_MISSED_TERM_ACKS,
        }
    }
}

impl ExchangeSettings {
    pub fn remote_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_reply_timeout_ms)
    }
}

impl HandshakeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TeardownSettings {
    pub fn term_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.term_ack_timeout_ms)
    }
}

impl WardenConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/warden.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Environment-specific overrides live next to the base file
        if let Some(env) = environment {
            let env_file = base
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // WARDEN_<SECTION>__<FIELD>
        builder = builder.add_source(
            Environment::with_prefix("WARDEN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: WardenConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(Some(path), None)
        } else {
            warn!("Config file {:?} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Reject settings that would make the core misbehave
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.exchange.remote_reply_timeout_ms > 0,
            "exchange.remote_reply_timeout_ms must be positive"
        );
        ensure!(self.handshake.timeout_ms > 0, "handshake.timeout_ms must be positive");
        ensure!(self.handshake.max_tries >= 1, "handshake.max_tries must be at least 1");
        ensure!(self.health.interval_ms > 0, "health.interval_ms must be positive");
        ensure!(self.health.timeout_ms > 0, "health.timeout_ms must be positive");
        ensure!(self.health.max_missed >= 1, "health.max_missed must be at least 1");
        ensure!(
            self.teardown.term_ack_timeout_ms > 0,
            "teardown.term_ack_timeout_ms must be positive"
        );
        ensure!(
            self.teardown.max_missed_term_acks >= 1,
            "teardown.max_missed_term_acks must be at least 1"
        );
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Convenience function to load configuration from the default location
pub fn load_config(environment: Option<&str>) -> Result<WardenConfig> {
    let path = PathBuf::from("config/warden.toml");
    match environment {
        Some(_) => WardenConfig::load(Some(&path), environment),
        None => WardenConfig::load_or_default(&path),
    }
}
