//! Bridge configuration.
//!
//! ## Sources (lowest → highest precedence)
//!
//! 1. Built-in defaults ([`BridgeConfig::default`])
//! 2. Optional TOML file passed to [`BridgeConfig::load`]
//! 3. Environment variables prefixed `AICRAFT_`, nested keys split on `__`
//!
//! | Key                              | Env                                 | Default                  |
//! |----------------------------------|-------------------------------------|--------------------------|
//! | `endpoint`                       | `AICRAFT_ENDPOINT`                  | `ws://127.0.0.1:8000/ws` |
//! | `tick_period`                    | `AICRAFT_TICK_PERIOD`               | `40`                     |
//! | `close_grace_ms`                 | `AICRAFT_CLOSE_GRACE_MS`            | `2000`                   |
//! | `reconnect.max_retries`          | `AICRAFT_RECONNECT__MAX_RETRIES`    | `0` (never reconnect)    |
//! | `reconnect.initial_backoff_ms`   | `AICRAFT_RECONNECT__INITIAL_BACKOFF_MS` | `500`                |
//! | `reconnect.max_backoff_ms`       | `AICRAFT_RECONNECT__MAX_BACKOFF_MS` | `30000`                  |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws";
/// Roughly one snapshot every two seconds at the nominal 20 ticks/s.
pub const DEFAULT_TICK_PERIOD: u32 = 40;
pub const ENV_PREFIX: &str = "AICRAFT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("tick_period must be a positive integer")]
    InvalidTickPeriod,
    #[error("endpoint '{0}' is not a ws:// or wss:// URL")]
    InvalidEndpoint(String),
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff applied after a failed or lost connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive attempts before giving up. `0` disables reconnecting.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// BridgeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket URL of the AI service.
    pub endpoint: String,
    /// Server ticks between two snapshots.
    pub tick_period: u32,
    /// How long `close()` waits for the peer's close frame.
    pub close_grace_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            tick_period: DEFAULT_TICK_PERIOD,
            close_grace_ms: 2_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// Layer defaults, an optional TOML file and `AICRAFT_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse a TOML document on top of the defaults (no env lookup).
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let loaded: Self = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Self::default())?)
            .add_source(::config::File::from_str(text, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period == 0 {
            return Err(ConfigError::InvalidTickPeriod);
        }
        let host = self
            .endpoint
            .strip_prefix("ws://")
            .or_else(|| self.endpoint.strip_prefix("wss://"));
        match host {
            Some(rest) if !rest.is_empty() && !rest.starts_with('/') => Ok(()),
            _ => Err(ConfigError::InvalidEndpoint(self.endpoint.clone())),
        }
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
