//! Configuration loading and logging setup.

use std::path::Path;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// REST endpoint used for session (listen-key) management.
    pub rest_url: String,
    /// WebSocket endpoint for the user data stream.
    pub ws_url: String,
    /// Testnet counterparts, selected per bot by its network mode.
    pub testnet_rest_url: String,
    pub testnet_ws_url: String,
    /// Upper bound applied to every gateway call.
    pub call_timeout_secs: u64,
    /// How often each live connection refreshes its session token.
    pub session_refresh_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Initial reconnect delay after an unexpected close.
    pub reconnect_base_ms: u64,
    /// Cap for the exponential reconnect backoff.
    pub reconnect_cap_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Interval between scheduled reconciliation passes over open deals.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.url",
            }
            .into());
        }
        if self.exchange.ws_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "exchange.ws_url",
            }
            .into());
        }
        if self.exchange.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "exchange.call_timeout_secs",
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        if self.stream.reconnect_cap_ms < self.stream.reconnect_base_ms {
            return Err(ConfigError::InvalidValue {
                field: "stream.reconnect_cap_ms",
                reason: "must be at least reconnect_base_ms".into(),
            }
            .into());
        }
        if self.reconcile.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconcile.interval_secs",
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.logging.level));

        match self.logging.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            exchange: ExchangeConfig::default(),
            stream: StreamConfig::default(),
            reconcile: ReconcileConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "dcabot.sqlite".into(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.binance.com".into(),
            ws_url: "wss://stream.binance.com:9443".into(),
            testnet_rest_url: "https://testnet.binance.vision".into(),
            testnet_ws_url: "wss://testnet.binance.vision".into(),
            call_timeout_secs: 10,
            session_refresh_secs: 30 * 60,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 500,
            reconnect_cap_ms: 30_000,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}
