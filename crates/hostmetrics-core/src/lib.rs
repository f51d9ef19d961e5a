//! hostmetrics-core - host metrics receiver library.
//!
//! Provides:
//! - `platform` - host access (`FileSystem`, procfs parsers, mocks)
//! - `scraper` - one scraper per metric domain, plus the lifecycle wrapper
//! - `registry` - scraper key to factory map
//! - `controller` - fixed-interval scrape rounds, merge and forward
//! - `entity` - periodic host-entity events on the logs path
//! - `receiver` - builds receivers from a `ReceiverConfig`
//! - `pdata` / `consumer` - batch shapes and downstream sinks
//! - `config` / `util` - configuration and helpers

pub mod config;
pub mod consumer;
pub mod controller;
pub mod entity;
pub mod pdata;
pub mod platform;
pub mod receiver;
pub mod registry;
pub mod scraper;
pub mod util;

pub use config::{ConfigError, ControllerConfig, ReceiverConfig};
pub use consumer::{CollectingConsumer, JsonLinesConsumer, LogsConsumer, MetricsConsumer};
pub use controller::{ControllerStats, RoundError, RoundReport, ScraperController};
pub use entity::HostEntityEmitter;
pub use receiver::{
    CreateSettings, ReceiverError, create_logs_receiver, create_metrics_receiver,
};
pub use registry::Registry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
