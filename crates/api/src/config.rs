//! Layered application configuration
//!
//! Built-in defaults, then an optional TOML file, then `SAFETRAIL__*`
//! environment variables (`SAFETRAIL__SERVER__BIND_ADDR=0.0.0.0:9000`).

use config::{Config, ConfigError, Environment, File};
use safety_monitor::MonitorConfig;
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "SAFETRAIL_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Expose Prometheus metrics on /metrics
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Everything the `safetrail` binary needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Load configuration; a given `path` must exist
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix("SAFETRAIL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
