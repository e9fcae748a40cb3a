//! Configuration management.
//!
//! Configuration is an explicit value object passed into each component at
//! construction; no component reads process-wide state on its own. Values
//! are layered from built-in defaults, optional `config/default` and
//! `config/local` files, and `CW_`-prefixed environment variables.

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::validation;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source platform gateway and channel list
    pub source: SourceConfig,
    /// Partition store location
    pub lake: LakeConfig,
    /// Object-detection model endpoint
    pub detection: DetectionConfig,
    /// Relational warehouse target
    pub warehouse: WarehouseConfig,
    /// Logging behavior
    pub logging: LoggingConfig,
    /// Orchestrator behavior
    pub pipeline: PipelineConfig,
}

/// Source ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the source platform gateway
    pub gateway_url: String,
    /// Channel identities to ingest each run
    pub channels: Vec<String>,
    /// Most-recent-message window fetched per channel
    pub fetch_limit: usize,
    /// TCP connect timeout for gateway requests
    pub connect_timeout_secs: u64,
    /// Overall timeout for one gateway request
    pub request_timeout_secs: u64,
    /// Channels scraped concurrently
    pub max_concurrent_channels: usize,
}

/// Partition store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LakeConfig {
    /// Storage root; all partition paths live under this directory
    pub root: String,
}

/// Detection enrichment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Base URL of the inference endpoint
    pub endpoint: String,
    /// Model name requested from the endpoint
    pub model: String,
    /// Acceptance threshold forwarded to the model
    pub confidence_threshold: f64,
    /// Images processed concurrently
    pub max_concurrent_images: usize,
    /// Overall timeout for one inference request
    pub request_timeout_secs: u64,
}

/// Warehouse settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Path of the SQLite database file
    pub database_path: String,
    /// Connection pool size
    pub max_connections: u32,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter when RUST_LOG is not set
    pub level: String,
    /// Directory for rolling JSON log files; console-only when unset
    pub directory: Option<String>,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Interval between scheduled DAG runs, in seconds
    pub schedule_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                gateway_url: "http://localhost:8081".to_string(),
                channels: Vec::new(),
                fetch_limit: 100,
                connect_timeout_secs: 10,
                request_timeout_secs: 30,
                max_concurrent_channels: 4,
            },
            lake: LakeConfig {
                root: "data".to_string(),
            },
            detection: DetectionConfig {
                endpoint: "http://localhost:8500".to_string(),
                model: "yolov8n".to_string(),
                confidence_threshold: 0.25,
                max_concurrent_images: 2,
                request_timeout_secs: 60,
            },
            warehouse: WarehouseConfig {
                database_path: "data/warehouse.db".to_string(),
                max_connections: 8,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                directory: None,
            },
            pipeline: PipelineConfig {
                schedule_interval_secs: 86_400,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, optional files, and environment
    /// variables, in that precedence order.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("CW").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {e}"))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.source.gateway_url.trim().is_empty() {
            return Err(anyhow::anyhow!("source.gateway_url must be set"));
        }
        if self.source.fetch_limit == 0 {
            return Err(anyhow::anyhow!("source.fetch_limit must be greater than 0"));
        }
        if self.source.max_concurrent_channels == 0 {
            return Err(anyhow::anyhow!(
                "source.max_concurrent_channels must be greater than 0"
            ));
        }
        for channel in &self.source.channels {
            validation::validate_channel_name(channel)
                .map_err(|e| anyhow::anyhow!("source.channels: {e}"))?;
        }

        if self.lake.root.trim().is_empty() {
            return Err(anyhow::anyhow!("lake.root must be set"));
        }

        if self.detection.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("detection.endpoint must be set"));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow::anyhow!(
                "detection.confidence_threshold must be within [0, 1]"
            ));
        }
        if self.detection.max_concurrent_images == 0 {
            return Err(anyhow::anyhow!(
                "detection.max_concurrent_images must be greater than 0"
            ));
        }

        if self.warehouse.database_path.trim().is_empty() {
            return Err(anyhow::anyhow!("warehouse.database_path must be set"));
        }
        if self.warehouse.max_connections == 0 {
            return Err(anyhow::anyhow!(
                "warehouse.max_connections must be greater than 0"
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        if self.pipeline.schedule_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "pipeline.schedule_interval_secs must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.source.fetch_limit, 100);
        assert_eq!(config.lake.root, "data");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.warehouse.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
