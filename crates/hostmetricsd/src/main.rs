//! hostmetricsd - Host metrics receiver daemon.
//!
//! Scrapes host metrics from /proc on a fixed interval and periodically
//! emits a host-entity event. Both streams go to stdout as JSON lines.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::collections::BTreeMap;
use std::io::Stdout;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hostmetrics_core::consumer::ConsumerError;
use hostmetrics_core::pdata::{LogsBatch, MetricsBatch};
use hostmetrics_core::util::{format_duration, parse_duration};
use hostmetrics_core::{
    ControllerConfig, CreateSettings, JsonLinesConsumer, LogsConsumer, MetricsConsumer,
    ReceiverConfig, Registry, VERSION, create_logs_receiver, create_metrics_receiver,
};

/// Host metrics receiver daemon.
#[derive(Parser)]
#[command(name = "hostmetricsd", about = "Host metrics receiver daemon", version)]
struct Args {
    /// Collection interval (e.g. "10s", "1m").
    #[arg(
        short,
        long,
        env = "HOSTMETRICS_INTERVAL",
        default_value = "60s",
        value_parser = parse_duration
    )]
    interval: Duration,

    /// Delay before the first collection round.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    initial_delay: Duration,

    /// Per-round deadline; "0s" disables it.
    #[arg(long, default_value = "0s", value_parser = parse_duration)]
    timeout: Duration,

    /// Interval between host-entity events.
    #[arg(
        long,
        env = "HOSTMETRICS_METADATA_INTERVAL",
        default_value = "5m",
        value_parser = parse_duration
    )]
    metadata_interval: Duration,

    /// Comma-separated scraper keys. Default: every built-in scraper.
    #[arg(long, env = "HOSTMETRICS_SCRAPERS", value_delimiter = ',')]
    scrapers: Vec<String>,

    /// Per-scraper settings as a JSON object keyed by scraper,
    /// e.g. '{"cpu":{"utilization":true}}'.
    #[arg(long, value_name = "JSON")]
    config_json: Option<String>,

    /// Host root when running in a container (e.g. /hostfs).
    #[arg(long, value_name = "PATH")]
    root_path: Option<PathBuf>,

    /// Upper bound on graceful shutdown.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    shutdown_timeout: Duration,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["hostmetricsd", "hostmetrics_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Assembles the receiver config from flags.
fn build_config(args: &Args) -> Result<ReceiverConfig, String> {
    let mut sections: BTreeMap<String, serde_json::Value> = match &args.config_json {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("--config-json: {}", e))?,
        None => BTreeMap::new(),
    };

    let keys: Vec<String> = if !args.scrapers.is_empty() {
        args.scrapers
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    } else if !sections.is_empty() {
        sections.keys().cloned().collect()
    } else {
        Registry::builtin().keys().map(str::to_string).collect()
    };

    let scrapers = keys
        .into_iter()
        .map(|key| {
            let section = sections.remove(&key).unwrap_or(serde_json::Value::Null);
            (key, section)
        })
        .collect();
    for key in sections.keys() {
        warn!("--config-json section '{}' ignored: scraper not selected", key);
    }

    let config = ReceiverConfig {
        controller: ControllerConfig {
            collection_interval: args.interval,
            initial_delay: args.initial_delay,
            timeout: args.timeout,
            shutdown_timeout: args.shutdown_timeout,
        },
        metadata_collection_interval: args.metadata_interval,
        root_path: args.root_path.clone(),
        scrapers,
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Describes the contents of a batch for logging.
fn describe_batch(batch: &MetricsBatch) -> String {
    batch
        .scopes
        .iter()
        .map(|scope| {
            let points: usize = scope.metrics.iter().map(|m| m.data_points.len()).sum();
            format!("{}={}", scope.scope, points)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stdout sink for both streams, logging a summary line per batch.
struct StdoutSink {
    out: JsonLinesConsumer<Stdout>,
    batches: AtomicU64,
}

impl StdoutSink {
    fn new() -> Self {
        Self {
            out: JsonLinesConsumer::new(std::io::stdout()),
            batches: AtomicU64::new(0),
        }
    }
}

impl MetricsConsumer for StdoutSink {
    fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), ConsumerError> {
        let n = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "Batch #{}: {} points ({})",
            n,
            batch.data_point_count(),
            describe_batch(&batch)
        );
        self.out.consume_metrics(batch)
    }
}

impl LogsConsumer for StdoutSink {
    fn consume_logs(&self, batch: LogsBatch) -> Result<(), ConsumerError> {
        debug!("Host entity event: {} record(s)", batch.records.len());
        self.out.consume_logs(batch)
    }
}

async fn run(config: ReceiverConfig) -> Result<(), Box<dyn std::error::Error>> {
    let settings = CreateSettings::host();
    let sink = Arc::new(StdoutSink::new());

    let metrics = create_metrics_receiver(&config, &settings, sink.clone())?;
    let logs = create_logs_receiver(&config, &settings, sink)?;

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        signal.notify_one();
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    metrics.start().await?;
    logs.start()?;
    info!("Starting collection loop");

    shutdown.notified().await;

    info!("Shutting down...");
    logs.shutdown().await;
    for failure in metrics.shutdown().await {
        error!("Scraper {} failed to shut down: {}", failure.key, failure.message);
    }

    let stats = metrics.stats();
    info!(
        "Rounds: {} ({} forwarded, {} partial, {} failed), {} ticks skipped",
        stats.rounds, stats.forwarded, stats.partial, stats.failed, stats.skipped_ticks
    );
    let entity = logs.stats();
    info!(
        "Host entity events: {} emitted, {} failed",
        entity.emitted, entity.failed
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("hostmetricsd {} starting", VERSION);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Config: interval={}, metadata_interval={}, scrapers={}",
        format_duration(config.controller.collection_interval),
        format_duration(config.metadata_collection_interval),
        config.scrapers.keys().cloned().collect::<Vec<_>>().join(",")
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
