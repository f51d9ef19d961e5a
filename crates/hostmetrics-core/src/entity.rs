//! Host-entity emitter.
//!
//! Periodically describes the host as an entity-state event and forwards it
//! as a one-record logs batch. Runs on its own interval, independent of the
//! scraper controller.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::consumer::{ConsumerError, LogsConsumer};
use crate::pdata::{AttributeValue, LogRecord, LogsBatch, Resource};
use crate::platform::procfs::HostPaths;
use crate::platform::procfs::parser::parse_os_release;
use crate::platform::shared::SharedOptimizations;
use crate::platform::traits::FileSystem;
use crate::receiver::ReceiverError;
use crate::scraper::{CancelToken, ScrapeError};
use crate::util::lock;

pub const ENTITY_EVENT_NAME: &str = "entity_state";
pub const ENTITY_TYPE_HOST: &str = "host";

const ATTR_EVENT_TYPE: &str = "otel.entity.event.type";
const ATTR_ENTITY_TYPE: &str = "otel.entity.type";
const ATTR_ENTITY_INTERVAL: &str = "otel.entity.interval";
const ATTR_ID_PREFIX: &str = "otel.entity.id.";
const ATTR_ATTR_PREFIX: &str = "otel.entity.attr.";

/// Identity and descriptive attributes of the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEntityRecord {
    pub host_id: String,
    pub host_name: String,
    pub os_type: String,
    pub os_description: Option<String>,
    pub host_arch: String,
    /// Left out of the event when `/proc/stat` has no `btime`.
    pub boot_time: Option<DateTime<Utc>>,
}

impl HostEntityRecord {
    /// Lays the record out as an entity-state event.
    pub fn to_log_record(&self, interval: Duration, timestamp: DateTime<Utc>) -> LogRecord {
        let mut attributes: BTreeMap<String, AttributeValue> = BTreeMap::new();
        attributes.insert(ATTR_EVENT_TYPE.into(), ENTITY_EVENT_NAME.into());
        attributes.insert(ATTR_ENTITY_TYPE.into(), ENTITY_TYPE_HOST.into());
        attributes.insert(
            ATTR_ENTITY_INTERVAL.into(),
            i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).into(),
        );
        attributes.insert(format!("{ATTR_ID_PREFIX}host.id"), self.host_id.as_str().into());

        let mut attr = |key: &str, value: &str| {
            attributes.insert(format!("{ATTR_ATTR_PREFIX}{key}"), value.into());
        };
        attr("host.name", &self.host_name);
        attr("os.type", &self.os_type);
        attr("host.arch", &self.host_arch);
        if let Some(description) = &self.os_description {
            attr("os.description", description);
        }
        if let Some(boot_time) = self.boot_time {
            attr("host.boot_time", &boot_time.to_rfc3339());
        }

        LogRecord {
            timestamp,
            event_name: Some(ENTITY_EVENT_NAME.to_string()),
            attributes,
        }
    }
}

/// Maps a Rust target arch to the host.arch semantic-convention value.
pub fn host_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "x86",
        "aarch64" => "arm64",
        "arm" => "arm32",
        "powerpc" => "ppc32",
        "powerpc64" => "ppc64",
        "s390x" => "s390x",
        other => other,
    }
}

/// Reads host identity from `/proc` and `/etc`.
#[derive(Clone)]
pub struct EntitySource {
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
    shared: Arc<SharedOptimizations>,
}

impl EntitySource {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        paths: HostPaths,
        shared: Arc<SharedOptimizations>,
    ) -> Self {
        Self { fs, paths, shared }
    }

    fn read(&self, path: PathBuf) -> Result<String, ScrapeError> {
        self.fs
            .read_to_string(&path)
            .map_err(|source| ScrapeError::Read { path, source })
    }

    pub fn hostname(&self) -> Result<String, ScrapeError> {
        let name = self.read(self.paths.proc_file("sys/kernel/hostname"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ScrapeError::Unavailable("hostname is empty".into()));
        }
        Ok(name.to_string())
    }

    /// The hostname is required; the machine id falls back to it and the
    /// OS description is left out when `os-release` is unreadable.
    pub fn snapshot(&self) -> Result<HostEntityRecord, ScrapeError> {
        let host_name = self.hostname()?;

        let host_id = match self.read(self.paths.etc_file("machine-id")) {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            Ok(_) => host_name.clone(),
            Err(e) => {
                debug!(error = %e, "machine id unavailable, using hostname");
                host_name.clone()
            }
        };

        let os_description = self
            .read(self.paths.etc_file("os-release"))
            .ok()
            .and_then(|content| {
                let mut release = parse_os_release(&content);
                release.remove("PRETTY_NAME").or_else(|| release.remove("NAME"))
            });

        Ok(HostEntityRecord {
            host_id,
            host_name,
            os_type: std::env::consts::OS.to_string(),
            os_description,
            host_arch: host_arch(std::env::consts::ARCH).to_string(),
            boot_time: self.shared.boot_datetime(self.fs.as_ref(), &self.paths),
        })
    }
}

#[derive(Debug)]
pub enum EmitError {
    Source(ScrapeError),
    Consumer(ConsumerError),
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::Source(e) => write!(f, "host entity unavailable: {}", e),
            EmitError::Consumer(e) => write!(f, "consumer error: {}", e),
        }
    }
}

impl std::error::Error for EmitError {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitterStats {
    pub emitted: u64,
    pub failed: u64,
}

struct EmitterInner {
    source: EntitySource,
    resource: Resource,
    interval: Duration,
    consumer: Arc<dyn LogsConsumer>,
    cancel: CancelToken,
    stats: Mutex<EmitterStats>,
}

impl EmitterInner {
    fn emit(&self) -> Result<(), EmitError> {
        let result = self
            .source
            .snapshot()
            .map_err(EmitError::Source)
            .and_then(|record| {
                let batch = LogsBatch {
                    resource: self.resource.clone(),
                    records: vec![record.to_log_record(self.interval, Utc::now())],
                };
                self.consumer.consume_logs(batch).map_err(EmitError::Consumer)
            });

        let mut stats = lock(&self.stats);
        match &result {
            Ok(()) => stats.emitted += 1,
            Err(_) => stats.failed += 1,
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

/// Logs receiver: emits the host entity every `interval`, first right
/// after start.
pub struct HostEntityEmitter {
    inner: Arc<EmitterInner>,
    phase: Mutex<Phase>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HostEntityEmitter {
    pub fn new(
        source: EntitySource,
        resource: Resource,
        interval: Duration,
        consumer: Arc<dyn LogsConsumer>,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                source,
                resource,
                interval,
                consumer,
                cancel: CancelToken::new(),
                stats: Mutex::new(EmitterStats::default()),
            }),
            phase: Mutex::new(Phase::Created),
            task: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> EmitterStats {
        lock(&self.inner.stats).clone()
    }

    /// Builds and forwards one entity event outside the timer.
    pub fn emit_once(&self) -> Result<(), EmitError> {
        self.inner.emit()
    }

    /// Spawns the timer task. The interval must be nonzero.
    pub fn start(&self) -> Result<(), ReceiverError> {
        if self.inner.interval.is_zero() {
            return Err(ConfigError::InvalidInterval {
                field: "metadata_collection_interval",
            }
            .into());
        }
        {
            let mut phase = lock(&self.phase);
            match *phase {
                Phase::Created => *phase = Phase::Running,
                Phase::Running => return Err(ReceiverError::AlreadyStarted),
                Phase::Stopped => return Err(ReceiverError::Stopped),
            }
        }

        let handle = tokio::spawn(run(Arc::clone(&self.inner)));
        *lock(&self.task) = Some(handle);
        info!(
            interval_ms = self.inner.interval.as_millis() as u64,
            "host entity emitter started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        {
            let mut phase = lock(&self.phase);
            if *phase == Phase::Stopped {
                return;
            }
            *phase = Phase::Stopped;
        }

        self.inner.cancel.cancel();
        let task = lock(&self.task).take();
        if let Some(handle) = task
            && let Err(e) = handle.await
        {
            warn!(error = %e, "host entity emitter task failed");
        }
        info!("host entity emitter stopped");
    }
}

impl Drop for HostEntityEmitter {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn run(inner: Arc<EmitterInner>) {
    let mut tick = tokio::time::interval(inner.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        match inner.emit() {
            Ok(()) => debug!("host entity emitted"),
            Err(e) => warn!(error = %e, "host entity emission skipped"),
        }
    }
}
