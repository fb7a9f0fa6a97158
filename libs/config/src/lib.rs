//! # Warden Configuration
//!
//! Centralized timeouts, retry limits and health-check policy for the
//! exchange, handshake, health-checker and process teardown.
//!
//! ## Usage
//!
//! ```rust
//! use warden_config::{defaults, WardenConfig, DEFAULT_CONFIG};
//!
//! let config = WardenConfig::default();
//! assert_eq!(config.handshake.max_tries, defaults::handshake::MAX_TRIES);
//! assert_eq!(DEFAULT_CONFIG.exchange.remote_reply_timeout(), config.exchange.remote_reply_timeout());
//! ```

pub mod defaults;
pub mod settings;

use once_cell::sync::Lazy;

pub use settings::{
    load_config, ExchangeSettings, HandshakeSettings, HealthSettings, TeardownSettings,
    WardenConfig,
};

/// Built-in configuration used when no file is supplied
pub static DEFAULT_CONFIG: Lazy<WardenConfig> = Lazy::new(WardenConfig::default);
