//! Receiver configuration.
//!
//! Deserialized from an in-memory JSON value. Duration fields are strings
//! such as `"10s"` or `"5m"`; scraper sections are kept as raw JSON until
//! the registry resolves their key.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::platform::procfs::ConflictingRootPath;
use crate::util::{DurationParseError, parse_duration};

/// Fatal configuration error. Nothing is started when one is returned.
#[derive(Debug)]
pub enum ConfigError {
    UnknownScraper {
        key: String,
    },
    InvalidScraperConfig {
        key: String,
        message: String,
    },
    InvalidInterval {
        field: &'static str,
    },
    NoScrapers,
    ConflictingRootPath(ConflictingRootPath),
    Duration(DurationParseError),
    DuplicateKey {
        key: String,
    },
    ConfigMismatch {
        expected: String,
        found: String,
    },
    Json(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownScraper { key } => {
                write!(f, "scraper factory not found for key: {:?}", key)
            }
            ConfigError::InvalidScraperConfig { key, message } => {
                write!(f, "invalid config for scraper '{}': {}", key, message)
            }
            ConfigError::InvalidInterval { field } => write!(f, "{} must be greater than 0", field),
            ConfigError::NoScrapers => write!(f, "at least one scraper must be configured"),
            ConfigError::ConflictingRootPath(e) => write!(f, "{}", e),
            ConfigError::Duration(e) => write!(f, "{}", e),
            ConfigError::DuplicateKey { key } => {
                write!(f, "scraper '{}' is registered more than once", key)
            }
            ConfigError::ConfigMismatch { expected, found } => write!(
                f,
                "factory '{}' was given a config for '{}'",
                expected, found
            ),
            ConfigError::Json(e) => write!(f, "invalid receiver config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConflictingRootPath> for ConfigError {
    fn from(e: ConflictingRootPath) -> Self {
        ConfigError::ConflictingRootPath(e)
    }
}

impl From<DurationParseError> for ConfigError {
    fn from(e: DurationParseError) -> Self {
        ConfigError::Duration(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// Scheduling settings of the scraper controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub collection_interval: Duration,
    pub initial_delay: Duration,
    /// Per-round deadline; zero means none.
    pub timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(1),
            timeout: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_interval.is_zero() {
            return Err(ConfigError::InvalidInterval {
                field: "collection_interval",
            });
        }
        Ok(())
    }
}

pub const DEFAULT_METADATA_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub controller: ControllerConfig,
    pub metadata_collection_interval: Duration,
    /// Host root when the receiver runs in a container.
    pub root_path: Option<PathBuf>,
    /// Per-scraper JSON sections by key. `null` means defaults.
    pub scrapers: BTreeMap<String, serde_json::Value>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            metadata_collection_interval: DEFAULT_METADATA_INTERVAL,
            root_path: None,
            scrapers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawReceiverConfig {
    collection_interval: Option<String>,
    initial_delay: Option<String>,
    timeout: Option<String>,
    shutdown_timeout: Option<String>,
    metadata_collection_interval: Option<String>,
    root_path: Option<PathBuf>,
    scrapers: BTreeMap<String, serde_json::Value>,
}

fn duration_or(raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    raw.as_deref()
        .map_or(Ok(default), parse_duration)
        .map_err(ConfigError::from)
}

impl ReceiverConfig {
    /// Parses and validates a receiver config. Missing fields take defaults.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let raw: RawReceiverConfig = serde_json::from_value(value)?;
        let defaults = Self::default();

        let config = Self {
            controller: ControllerConfig {
                collection_interval: duration_or(
                    raw.collection_interval,
                    defaults.controller.collection_interval,
                )?,
                initial_delay: duration_or(raw.initial_delay, defaults.controller.initial_delay)?,
                timeout: duration_or(raw.timeout, defaults.controller.timeout)?,
                shutdown_timeout: duration_or(
                    raw.shutdown_timeout,
                    defaults.controller.shutdown_timeout,
                )?,
            },
            metadata_collection_interval: duration_or(
                raw.metadata_collection_interval,
                defaults.metadata_collection_interval,
            )?,
            root_path: raw.root_path,
            scrapers: raw.scrapers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Adds a scraper section with default settings.
    pub fn with_scraper(mut self, key: impl Into<String>) -> Self {
        self.scrapers.insert(key.into(), serde_json::Value::Null);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        if self.metadata_collection_interval.is_zero() {
            return Err(ConfigError::InvalidInterval {
                field: "metadata_collection_interval",
            });
        }
        if self.scrapers.is_empty() {
            return Err(ConfigError::NoScrapers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ReceiverConfig::from_json(json!({ "scrapers": { "load": {} } })).unwrap();
        assert_eq!(config.controller, ControllerConfig::default());
        assert_eq!(config.controller.collection_interval, Duration::from_secs(60));
        assert_eq!(config.metadata_collection_interval, Duration::from_secs(300));
        assert_eq!(config.root_path, None);
        assert_eq!(config.scrapers.len(), 1);
    }

    #[test]
    fn test_durations() {
        let config = ReceiverConfig::from_json(json!({
            "collection_interval": "10s",
            "initial_delay": "0s",
            "timeout": "500ms",
            "shutdown_timeout": "1m",
            "metadata_collection_interval": "1h",
            "root_path": "/hostfs",
            "scrapers": { "cpu": { "utilization": true }, "memory": null }
        }))
        .unwrap();
        assert_eq!(config.controller.collection_interval, Duration::from_secs(10));
        assert_eq!(config.controller.initial_delay, Duration::ZERO);
        assert_eq!(config.controller.timeout, Duration::from_millis(500));
        assert_eq!(config.controller.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.metadata_collection_interval, Duration::from_secs(3600));
        assert_eq!(config.root_path, Some(PathBuf::from("/hostfs")));
        assert!(config.scrapers["memory"].is_null());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = ReceiverConfig::from_json(json!({
            "collection_interval": "0s",
            "scrapers": { "load": {} }
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidInterval {
                field: "collection_interval"
            }
        ));
    }

    #[test]
    fn test_bad_duration() {
        let err = ReceiverConfig::from_json(json!({
            "collection_interval": "soon",
            "scrapers": { "load": {} }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Duration(_)));
    }

    #[test]
    fn test_unknown_top_level_field() {
        let err = ReceiverConfig::from_json(json!({ "intervall": "1s" })).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_no_scrapers() {
        let err = ReceiverConfig::from_json(json!({})).unwrap_err();
        assert!(matches!(err, ConfigError::NoScrapers));
    }

    #[test]
    fn test_with_scraper() {
        let config = ReceiverConfig::default().with_scraper("load");
        assert!(config.validate().is_ok());
        assert!(config.scrapers["load"].is_null());
    }
}
