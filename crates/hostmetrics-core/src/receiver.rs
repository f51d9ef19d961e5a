//! Receiver factory: turns a [`ReceiverConfig`] into a running metrics
//! receiver (a [`ScraperController`]) or logs receiver (a
//! [`HostEntityEmitter`]).
//!
//! Every configured key is resolved against the registry and every scraper
//! section is parsed before anything is built, so a bad config never leaves
//! half a receiver behind.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConfigError, ReceiverConfig};
use crate::consumer::{LogsConsumer, MetricsConsumer};
use crate::controller::ScraperController;
use crate::entity::{EntitySource, HostEntityEmitter};
use crate::pdata::Resource;
use crate::platform::procfs::HostPaths;
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::{Environment, FileSystem, OsEnv, RealFs};
use crate::registry::Registry;
use crate::scraper::{ScrapeError, ScraperSettings};

#[derive(Debug)]
pub enum ReceiverError {
    Config(ConfigError),
    /// A mandatory scraper failed to start.
    ScraperStart {
        key: String,
        source: ScrapeError,
    },
    AlreadyStarted,
    Stopped,
    Aborted(String),
}

impl std::fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverError::Config(e) => write!(f, "{}", e),
            ReceiverError::ScraperStart { key, source } => {
                write!(f, "scraper '{}' failed to start: {}", key, source)
            }
            ReceiverError::AlreadyStarted => write!(f, "receiver already started"),
            ReceiverError::Stopped => write!(f, "receiver has been shut down"),
            ReceiverError::Aborted(msg) => write!(f, "startup aborted: {}", msg),
        }
    }
}

impl std::error::Error for ReceiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReceiverError::Config(e) => Some(e),
            ReceiverError::ScraperStart { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for ReceiverError {
    fn from(e: ConfigError) -> Self {
        ReceiverError::Config(e)
    }
}

/// Host access shared by the receivers built from one config.
#[derive(Clone)]
pub struct CreateSettings {
    pub fs: Arc<dyn FileSystem>,
    pub env: Arc<dyn Environment>,
    pub shared: Arc<SharedOptimizations>,
}

impl CreateSettings {
    pub fn new(fs: Arc<dyn FileSystem>, env: Arc<dyn Environment>) -> Self {
        Self {
            fs,
            env,
            shared: Arc::new(SharedOptimizations::new()),
        }
    }

    /// The real host: `std::fs` and the process environment.
    pub fn host() -> Self {
        Self::new(Arc::new(RealFs::new()), Arc::new(OsEnv))
    }

    fn paths(&self, config: &ReceiverConfig) -> Result<HostPaths, ConfigError> {
        Ok(HostPaths::resolve(
            config.root_path.as_deref(),
            self.env.as_ref(),
        )?)
    }
}

/// Resource attributes stamped on every batch.
pub fn host_resource(fs: &dyn FileSystem, paths: &HostPaths) -> Resource {
    let resource = Resource::new().with_attribute("os.type", std::env::consts::OS);
    match fs.read_to_string(&paths.proc_file("sys/kernel/hostname")) {
        Ok(name) if !name.trim().is_empty() => resource.with_attribute("host.name", name.trim()),
        Ok(_) => resource,
        Err(e) => {
            debug!(error = %e, "hostname unavailable, leaving host.name out");
            resource
        }
    }
}

/// Builds a metrics receiver from the built-in registry.
pub fn create_metrics_receiver(
    config: &ReceiverConfig,
    settings: &CreateSettings,
    consumer: Arc<dyn MetricsConsumer>,
) -> Result<ScraperController, ConfigError> {
    create_metrics_receiver_with(Registry::builtin(), config, settings, consumer)
}

pub fn create_metrics_receiver_with(
    registry: &Registry,
    config: &ReceiverConfig,
    settings: &CreateSettings,
    consumer: Arc<dyn MetricsConsumer>,
) -> Result<ScraperController, ConfigError> {
    config.validate()?;
    let paths = settings.paths(config)?;

    let mut resolved = Vec::with_capacity(config.scrapers.len());
    for (key, section) in &config.scrapers {
        let factory = registry
            .resolve(key)
            .ok_or_else(|| ConfigError::UnknownScraper { key: key.clone() })?;
        resolved.push((key, factory, factory.parse_config(section)?));
    }

    let scraper_settings = ScraperSettings {
        fs: Arc::clone(&settings.fs),
        paths: paths.clone(),
        shared: Arc::clone(&settings.shared),
    };
    let mut scrapers = Vec::with_capacity(resolved.len());
    for (key, factory, scraper_config) in resolved {
        scrapers.push((key.clone(), factory.create(&scraper_config, &scraper_settings)?));
    }

    info!(
        scrapers = ?config.scrapers.keys().collect::<Vec<_>>(),
        proc = %paths.proc.display(),
        "metrics receiver created"
    );

    Ok(ScraperController::new(
        config.controller.clone(),
        host_resource(settings.fs.as_ref(), &paths),
        scrapers,
        consumer,
        Arc::clone(&settings.shared),
    ))
}

/// Builds the host-entity logs receiver.
pub fn create_logs_receiver(
    config: &ReceiverConfig,
    settings: &CreateSettings,
    consumer: Arc<dyn LogsConsumer>,
) -> Result<HostEntityEmitter, ConfigError> {
    config.validate()?;
    let paths = settings.paths(config)?;
    let resource = host_resource(settings.fs.as_ref(), &paths);

    Ok(HostEntityEmitter::new(
        EntitySource::new(
            Arc::clone(&settings.fs),
            paths,
            Arc::clone(&settings.shared),
        ),
        resource,
        config.metadata_collection_interval,
        consumer,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::CollectingConsumer;
    use crate::platform::mock::MockFs;
    use crate::platform::traits::MockEnv;
    use serde_json::json;

    fn settings(fs: &MockFs) -> CreateSettings {
        CreateSettings::new(Arc::new(fs.clone()), Arc::new(MockEnv::new()))
    }

    fn config(value: serde_json::Value) -> ReceiverConfig {
        ReceiverConfig::from_json(value).unwrap()
    }

    #[test]
    fn test_unknown_key_is_named() {
        let fs = MockFs::typical_system();
        let err = create_metrics_receiver(
            &config(json!({ "scrapers": { "load": {}, "gpu": {} } })),
            &settings(&fs),
            Arc::new(CollectingConsumer::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::UnknownScraper { ref key } if key == "gpu"));
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn test_all_builtin_keys_resolve() {
        let fs = MockFs::typical_system();
        let mut config = ReceiverConfig::default();
        for key in Registry::builtin().keys() {
            config = config.with_scraper(key);
        }
        let controller = create_metrics_receiver(
            &config,
            &settings(&fs),
            Arc::new(CollectingConsumer::new()),
        )
        .unwrap();
        assert_eq!(controller.keys().len(), Registry::builtin().len());
        assert_eq!(controller.keys()[0], "cpu");
    }

    #[test]
    fn test_invalid_scraper_section() {
        let fs = MockFs::typical_system();
        let err = create_metrics_receiver(
            &config(json!({ "scrapers": { "cpu": { "utilisation": true } } })),
            &settings(&fs),
            Arc::new(CollectingConsumer::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidScraperConfig { ref key, .. } if key == "cpu"));
    }

    #[test]
    fn test_conflicting_root_path() {
        let fs = MockFs::typical_system();
        let settings = CreateSettings::new(
            Arc::new(fs),
            Arc::new(MockEnv::new().with("HOST_PROC", "/elsewhere/proc")),
        );
        let err = create_metrics_receiver(
            &config(json!({ "root_path": "/hostfs", "scrapers": { "load": {} } })),
            &settings,
            Arc::new(CollectingConsumer::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::ConflictingRootPath(_)));
    }

    #[tokio::test]
    async fn test_root_path_prefixes_proc() {
        let fs = MockFs::new();
        fs.add_file("/hostfs/proc/loadavg", "1.00 2.00 3.00 1/100 42\n");
        fs.add_file("/hostfs/proc/sys/kernel/hostname", "node-7\n");
        let consumer = Arc::new(CollectingConsumer::new());
        let controller = create_metrics_receiver(
            &config(json!({
                "root_path": "/hostfs",
                "initial_delay": "1h",
                "scrapers": { "load": {} }
            })),
            &settings(&fs),
            consumer.clone(),
        )
        .unwrap();

        controller.start().await.unwrap();
        controller.scrape_once().await.unwrap();
        controller.shutdown().await;

        let batch = &consumer.metrics()[0];
        assert_eq!(batch.resource.get("host.name"), Some("node-7"));
        assert_eq!(batch.scopes[0].scope, "load");
    }

    #[test]
    fn test_host_resource_without_hostname() {
        let fs = MockFs::new();
        let resource = host_resource(&fs, &HostPaths::default());
        assert_eq!(resource.get("host.name"), None);
        assert_eq!(resource.get("os.type"), Some(std::env::consts::OS));
    }

    #[tokio::test]
    async fn test_start_failure_surfaces_key() {
        let fs = MockFs::new();
        let controller = create_metrics_receiver(
            &config(json!({ "initial_delay": "1h", "scrapers": { "load": {} } })),
            &settings(&fs),
            Arc::new(CollectingConsumer::new()),
        )
        .unwrap();
        match controller.start().await {
            Err(ReceiverError::ScraperStart { key, .. }) => assert_eq!(key, "load"),
            other => panic!("expected start failure, got {:?}", other),
        }
    }

    #[test]
    fn test_logs_receiver() {
        let fs = MockFs::typical_system();
        let consumer = Arc::new(CollectingConsumer::new());
        let emitter = create_logs_receiver(
            &config(json!({ "scrapers": { "load": {} } })),
            &settings(&fs),
            consumer.clone(),
        )
        .unwrap();
        emitter.emit_once().unwrap();
        let logs = consumer.logs();
        assert_eq!(logs[0].resource.get("host.name"), Some("testhost"));
        assert!(
            logs[0].records[0]
                .attribute("otel.entity.attr.host.boot_time")
                .is_some()
        );
    }
}
