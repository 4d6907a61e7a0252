pub mod validation;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, path::Path, time::Duration};
use validation::validate_config;

/// Main settings configuration for the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level for application logging (e.g., "info", "debug", "warn", "error")
    pub log_level: String,
    /// Durable summary store
    pub store: StoreSettings,
    /// Observation bucketing
    pub buffer: BufferSettings,
    /// Flush cycle cadence
    pub flush: FlushSettings,
    /// Default windows for the query commands
    pub query: QuerySettings,
    /// Prometheus exporter (optional)
    pub metrics: Option<MetricsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Database directory
    pub path: String,
    /// How long a write waits for the store's writer lock
    pub transaction_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "checker.db".to_string(),
            transaction_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Width of one aggregation bucket
    pub bucket_width_ms: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            bucket_width_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushSettings {
    /// Time between flush cycles
    pub interval_seconds: u64,
    /// A bucket is flushed once its start is more than this far in the past
    pub eligibility_seconds: u64,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            eligibility_seconds: 5,
        }
    }
}

/// Lookback windows, as humantime strings ("1h", "15m 30s")
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub status_lookback: String,
    pub graph_lookback: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            status_lookback: "24h".to_string(),
            graph_lookback: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    pub addr: SocketAddr,
}

impl StoreSettings {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

impl BufferSettings {
    pub fn bucket_width(&self) -> Duration {
        Duration::from_millis(self.bucket_width_ms)
    }
}

impl FlushSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn eligibility(&self) -> Duration {
        Duration::from_secs(self.eligibility_seconds)
    }
}

impl QuerySettings {
    pub fn status_lookback(&self) -> Result<Duration> {
        humantime::parse_duration(&self.status_lookback)
            .with_context(|| format!("Invalid status_lookback '{}'", self.status_lookback))
    }

    pub fn graph_lookback(&self) -> Result<Duration> {
        humantime::parse_duration(&self.graph_lookback)
            .with_context(|| format!("Invalid graph_lookback '{}'", self.graph_lookback))
    }
}

impl Settings {
    /// Load configuration from a specific config file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        // env vars take priority over the file
        let settings = ConfigBuilder::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()))
            .add_source(
                Environment::with_prefix("CHECKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }

    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        // NOTE: It's ok if this fails (file might not exist)
        let _ = dotenvy::dotenv();

        let settings: Settings = ConfigBuilder::builder()
            .add_source(
                Environment::with_prefix("CHECKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            store: StoreSettings::default(),
            buffer: BufferSettings::default(),
            flush: FlushSettings::default(),
            query: QuerySettings::default(),
            metrics: None,
        }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tStore Path: {}\n\
             \tTransaction Timeout: {}ms\n\
             \tBucket Width: {}ms\n\
             \tFlush Interval: {}s\n\
             \tFlush Eligibility: {}s\n\
             \tMetrics: {}\n\
             }}",
            self.log_level,
            self.store.path,
            self.store.transaction_timeout_ms,
            self.buffer.bucket_width_ms,
            self.flush.interval_seconds,
            self.flush.eligibility_seconds,
            self.metrics
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |m| m.addr.to_string()),
        )
    }
}
