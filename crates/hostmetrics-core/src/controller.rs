//! Scraper controller: drives a set of scrapers on one fixed interval.
//!
//! ```text
//!  interval tick ──► round ──┬─ spawn_blocking(scrape a) ─┐
//!                            ├─ spawn_blocking(scrape b) ─┼─► merge ─► consumer
//!                            └─ spawn_blocking(scrape c) ─┘
//! ```
//!
//! Rounds run inline in the timer task, so two rounds are never in flight at
//! once. Ticks that fall inside a long round are skipped and counted.

use std::sync::{Arc, Mutex, TryLockError};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::consumer::{ConsumerError, MetricsConsumer};
use crate::pdata::{MetricsBatch, Resource, ScopeMetrics};
use crate::platform::shared::SharedOptimizations;
use crate::receiver::ReceiverError;
use crate::scraper::{
    CancelToken, ManagedScraper, ScrapeContext, ScrapeError, ScrapeOutput, Scraper,
};
use crate::util::lock;

/// A scraper whose contribution was dropped, or whose shutdown failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperFailure {
    pub key: String,
    pub message: String,
}

/// Scrapers that failed in a round.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialError {
    pub failed: Vec<ScraperFailure>,
    /// Whether the remaining data still reached the consumer.
    pub forwarded: bool,
}

impl std::fmt::Display for PartialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} scraper(s) failed", self.failed.len())?;
        for (i, failure) in self.failed.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, failure.key, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialError {}

#[derive(Debug)]
pub enum RoundError {
    /// Every scraper failed; nothing was forwarded.
    Total(PartialError),
    Consumer(ConsumerError),
}

impl std::fmt::Display for RoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundError::Total(e) => write!(f, "round failed: {}", e),
            RoundError::Consumer(e) => write!(f, "consumer error: {}", e),
        }
    }
}

impl std::error::Error for RoundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RoundError::Total(e) => Some(e),
            RoundError::Consumer(e) => Some(e),
        }
    }
}

/// Outcome of a forwarded round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub scopes: usize,
    pub data_points: usize,
    pub partial: Option<PartialError>,
    pub sub_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerStats {
    pub rounds: u64,
    pub forwarded: u64,
    pub partial: u64,
    pub failed: u64,
    pub consumer_errors: u64,
    pub sub_failures: u64,
    pub skipped_ticks: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

struct Slot {
    key: String,
    scraper: Arc<Mutex<ManagedScraper>>,
}

struct ControllerInner {
    config: ControllerConfig,
    resource: Resource,
    slots: Vec<Slot>,
    consumer: Arc<dyn MetricsConsumer>,
    shared: Arc<SharedOptimizations>,
    cancel: CancelToken,
    stats: Mutex<ControllerStats>,
}

pub struct ScraperController {
    inner: Arc<ControllerInner>,
    phase: Mutex<Phase>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScraperController {
    /// Scrapers are started in the given order and shut down in reverse.
    pub fn new(
        config: ControllerConfig,
        resource: Resource,
        scrapers: Vec<(String, Box<dyn Scraper>)>,
        consumer: Arc<dyn MetricsConsumer>,
        shared: Arc<SharedOptimizations>,
    ) -> Self {
        let slots = scrapers
            .into_iter()
            .map(|(key, scraper)| Slot {
                scraper: Arc::new(Mutex::new(ManagedScraper::new(key.clone(), scraper))),
                key,
            })
            .collect();

        Self {
            inner: Arc::new(ControllerInner {
                config,
                resource,
                slots,
                consumer,
                shared,
                cancel: CancelToken::new(),
                stats: Mutex::new(ControllerStats::default()),
            }),
            phase: Mutex::new(Phase::Created),
            task: Mutex::new(None),
        }
    }

    /// Scraper keys in construction order.
    pub fn keys(&self) -> Vec<&str> {
        self.inner.slots.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn stats(&self) -> ControllerStats {
        lock(&self.inner.stats).clone()
    }

    /// Starts every scraper, then the timer task.
    ///
    /// An invalid schedule is rejected before anything starts. If a
    /// scraper fails to start, the ones already started are shut down in
    /// reverse order and the error is returned.
    pub async fn start(&self) -> Result<(), ReceiverError> {
        self.inner.config.validate()?;
        {
            let mut phase = lock(&self.phase);
            match *phase {
                Phase::Created => *phase = Phase::Running,
                Phase::Running => return Err(ReceiverError::AlreadyStarted),
                Phase::Stopped => return Err(ReceiverError::Stopped),
            }
        }

        self.inner.shared.enable();

        let inner = Arc::clone(&self.inner);
        let started = tokio::task::spawn_blocking(move || inner.start_scrapers())
            .await
            .unwrap_or_else(|e| Err(ReceiverError::Aborted(e.to_string())));
        if let Err(e) = started {
            *lock(&self.phase) = Phase::Stopped;
            return Err(e);
        }

        let handle = tokio::spawn(run(Arc::clone(&self.inner)));
        *lock(&self.task) = Some(handle);

        info!(
            scrapers = self.inner.slots.len(),
            interval_ms = self.inner.config.collection_interval.as_millis() as u64,
            "scraper controller started"
        );
        Ok(())
    }

    /// Runs one round outside the timer.
    pub async fn scrape_once(&self) -> Result<RoundReport, RoundError> {
        self.inner.round().await
    }

    /// Stops the timer and shuts every scraper down in reverse order.
    ///
    /// Returns the scrapers whose shutdown failed. Later calls return an
    /// empty list and do nothing.
    pub async fn shutdown(&self) -> Vec<ScraperFailure> {
        {
            let mut phase = lock(&self.phase);
            if *phase == Phase::Stopped {
                return Vec::new();
            }
            *phase = Phase::Stopped;
        }

        self.inner.cancel.cancel();
        let deadline = Instant::now() + self.inner.config.shutdown_timeout;

        let task = lock(&self.task).take();
        if let Some(mut handle) = task
            && tokio::time::timeout_at(deadline, &mut handle).await.is_err()
        {
            warn!("in-flight round did not finish before shutdown timeout, abandoning it");
            handle.abort();
        }

        let mut failures = Vec::new();
        for slot in self.inner.slots.iter().rev() {
            let scraper = Arc::clone(&slot.scraper);
            let ctx = ScrapeContext::background()
                .with_timeout(deadline.saturating_duration_since(Instant::now()));
            let handle = tokio::task::spawn_blocking(move || lock(&scraper).shutdown(&ctx));

            let message = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => e.to_string(),
                Ok(Err(e)) => ScrapeError::Aborted(e.to_string()).to_string(),
                Err(_) => ScrapeError::DeadlineExceeded.to_string(),
            };
            warn!(scraper = %slot.key, error = %message, "scraper shutdown failed");
            failures.push(ScraperFailure {
                key: slot.key.clone(),
                message,
            });
        }

        info!(failures = failures.len(), "scraper controller stopped");
        failures
    }
}

impl Drop for ScraperController {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl ControllerInner {
    fn start_scrapers(&self) -> Result<(), ReceiverError> {
        let ctx = ScrapeContext::new(self.cancel.clone());
        for (i, slot) in self.slots.iter().enumerate() {
            let result = lock(&slot.scraper).start(&ctx);
            if let Err(source) = result {
                error!(scraper = %slot.key, error = %source, "scraper failed to start");
                for started in self.slots[..i].iter().rev() {
                    let _ = lock(&started.scraper).shutdown(&ctx);
                }
                return Err(ReceiverError::ScraperStart {
                    key: slot.key.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn round_context(&self) -> (ScrapeContext, Option<Instant>) {
        let ctx = ScrapeContext::new(self.cancel.clone());
        if self.config.timeout.is_zero() {
            return (ctx, None);
        }
        (
            ctx.with_timeout(self.config.timeout),
            Some(Instant::now() + self.config.timeout),
        )
    }

    async fn collect(
        &self,
        handle: JoinHandle<Result<ScrapeOutput, ScrapeError>>,
        deadline: Option<Instant>,
    ) -> Result<ScrapeOutput, ScrapeError> {
        let joined = async {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, handle).await {
                    Ok(joined) => joined,
                    Err(_) => return Err(ScrapeError::DeadlineExceeded),
                },
                None => handle.await,
            };
            joined.unwrap_or_else(|e| Err(ScrapeError::Aborted(e.to_string())))
        };

        tokio::select! {
            result = joined => result,
            _ = self.cancel.cancelled() => Err(ScrapeError::Cancelled),
        }
    }

    async fn round(&self) -> Result<RoundReport, RoundError> {
        let t0 = Instant::now();
        let (ctx, deadline) = self.round_context();

        let handles: Vec<_> = self
            .slots
            .iter()
            .map(|slot| {
                let scraper = Arc::clone(&slot.scraper);
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || {
                    let mut guard = match scraper.try_lock() {
                        Ok(guard) => guard,
                        Err(TryLockError::WouldBlock) => return Err(ScrapeError::Busy),
                        Err(TryLockError::Poisoned(e)) => e.into_inner(),
                    };
                    guard.scrape(&ctx)
                })
            })
            .collect();

        let mut scopes = Vec::with_capacity(handles.len());
        let mut failed = Vec::new();
        let mut sub_failures = 0;
        for (slot, handle) in self.slots.iter().zip(handles) {
            match self.collect(handle, deadline).await {
                Ok(output) => {
                    for failure in &output.failures {
                        warn!(
                            scraper = %slot.key,
                            component = %failure.component,
                            error = %failure.message,
                            "partial scrape"
                        );
                    }
                    sub_failures += output.failures.len();
                    scopes.push(ScopeMetrics {
                        scope: slot.key.clone(),
                        metrics: output.metrics,
                    });
                }
                Err(e) => {
                    warn!(scraper = %slot.key, error = %e, "scrape failed");
                    failed.push(ScraperFailure {
                        key: slot.key.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let elapsed = t0.elapsed();
        let result = self.forward(scopes, failed, sub_failures);

        let mut stats = lock(&self.stats);
        stats.rounds += 1;
        stats.sub_failures += sub_failures as u64;
        match &result {
            Ok(report) => {
                stats.forwarded += 1;
                if let Some(partial) = &report.partial {
                    stats.partial += 1;
                    stats.last_error = Some(partial.to_string());
                }
                debug!(
                    duration_ms = elapsed.as_millis() as u64,
                    scopes = report.scopes,
                    data_points = report.data_points,
                    "round completed"
                );
            }
            Err(e) => {
                match e {
                    RoundError::Total(_) => stats.failed += 1,
                    RoundError::Consumer(_) => stats.consumer_errors += 1,
                }
                stats.last_error = Some(e.to_string());
                error!(duration_ms = elapsed.as_millis() as u64, error = %e, "round failed");
            }
        }

        if elapsed > self.config.collection_interval / 2 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                interval_ms = self.config.collection_interval.as_millis() as u64,
                "round exceeded 50% of interval"
            );
        }

        result
    }

    fn forward(
        &self,
        scopes: Vec<ScopeMetrics>,
        failed: Vec<ScraperFailure>,
        sub_failures: usize,
    ) -> Result<RoundReport, RoundError> {
        if scopes.is_empty() {
            return Err(RoundError::Total(PartialError {
                failed,
                forwarded: false,
            }));
        }

        let batch = MetricsBatch {
            resource: self.resource.clone(),
            timestamp: Utc::now(),
            scopes,
        };
        let report = RoundReport {
            scopes: batch.scopes.len(),
            data_points: batch.data_point_count(),
            partial: (!failed.is_empty()).then_some(PartialError {
                failed,
                forwarded: true,
            }),
            sub_failures,
        };

        self.consumer
            .consume_metrics(batch)
            .map_err(RoundError::Consumer)?;
        Ok(report)
    }
}

// ============================================================
// Timer loop
// ============================================================

async fn run(inner: Arc<ControllerInner>) {
    let period = inner.config.collection_interval;
    let mut tick = tokio::time::interval_at(Instant::now() + inner.config.initial_delay, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let t0 = Instant::now();
        let _ = inner.round().await;

        let skipped = (t0.elapsed().as_nanos() / period.as_nanos()) as u64;
        if skipped > 0 {
            lock(&inner.stats).skipped_ticks += skipped;
            debug!(skipped, "ticks skipped while a round was running");
        }
    }

    debug!("scraper controller loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::consumer::CollectingConsumer;
    use crate::pdata::{MetricDef, MetricsBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TEST_GAUGE: MetricDef = MetricDef::gauge("test.value", "A test value.", "1");

    type EventLog = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct TestScraper {
        name: &'static str,
        events: EventLog,
        fail_start: bool,
        fail_scrape: bool,
        fail_shutdown: bool,
        sub_failure: bool,
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl TestScraper {
        fn named(name: &'static str, events: &EventLog) -> Self {
            Self {
                name,
                events: Arc::clone(events),
                ..Default::default()
            }
        }

        fn boxed(self) -> (String, Box<dyn Scraper>) {
            (self.name.to_string(), Box::new(self))
        }
    }

    impl Scraper for TestScraper {
        fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
            lock(&self.events).push(format!("start {}", self.name));
            if self.fail_start {
                return Err(ScrapeError::Unavailable("no access".into()));
            }
            Ok(())
        }

        fn scrape(&mut self, _ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_scrape {
                return Err(ScrapeError::Unavailable("broken".into()));
            }
            let mut mb = MetricsBuilder::new(Utc::now());
            mb.record(&TEST_GAUGE, &[("source", self.name)], 1i64);
            let mut output = ScrapeOutput::new(mb.finish());
            if self.sub_failure {
                output.push_failure("eth0", "permission denied");
            }
            Ok(output)
        }

        fn shutdown(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
            lock(&self.events).push(format!("shutdown {}", self.name));
            if self.fail_shutdown {
                return Err(ScrapeError::Unavailable("stuck".into()));
            }
            Ok(())
        }
    }

    fn parked() -> ControllerConfig {
        ControllerConfig {
            initial_delay: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    fn controller(
        config: ControllerConfig,
        scrapers: Vec<(String, Box<dyn Scraper>)>,
    ) -> (ScraperController, Arc<CollectingConsumer>) {
        let consumer = Arc::new(CollectingConsumer::new());
        let controller = ScraperController::new(
            config,
            Resource::new().with_attribute("host.name", "testhost"),
            scrapers,
            consumer.clone(),
            Arc::new(SharedOptimizations::new()),
        );
        (controller, consumer)
    }

    #[tokio::test]
    async fn test_one_failure_drops_one_scope() {
        let events = EventLog::default();
        let (controller, consumer) = controller(
            parked(),
            vec![
                TestScraper::named("a", &events).boxed(),
                TestScraper {
                    fail_scrape: true,
                    ..TestScraper::named("b", &events)
                }
                .boxed(),
                TestScraper::named("c", &events).boxed(),
            ],
        );
        controller.start().await.unwrap();

        let report = controller.scrape_once().await.unwrap();
        assert_eq!(report.scopes, 2);
        assert_eq!(report.data_points, 2);
        let partial = report.partial.unwrap();
        assert!(partial.forwarded);
        assert_eq!(partial.failed.len(), 1);
        assert_eq!(partial.failed[0].key, "b");

        let batches = consumer.metrics();
        assert_eq!(batches.len(), 1);
        let scopes: Vec<_> = batches[0].scopes.iter().map(|s| s.scope.as_str()).collect();
        assert_eq!(scopes, vec!["a", "c"]);
        assert_eq!(batches[0].resource.get("host.name"), Some("testhost"));

        let stats = controller.stats();
        assert_eq!(stats.rounds, 1);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.partial, 1);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_failures_forward_nothing() {
        let events = EventLog::default();
        let (controller, consumer) = controller(
            parked(),
            vec![
                TestScraper {
                    fail_scrape: true,
                    ..TestScraper::named("a", &events)
                }
                .boxed(),
                TestScraper {
                    fail_scrape: true,
                    ..TestScraper::named("b", &events)
                }
                .boxed(),
            ],
        );
        controller.start().await.unwrap();

        match controller.scrape_once().await {
            Err(RoundError::Total(partial)) => {
                assert!(!partial.forwarded);
                assert_eq!(partial.failed.len(), 2);
            }
            other => panic!("expected total failure, got {:?}", other),
        }
        assert_eq!(consumer.metrics_len(), 0);

        let stats = controller.stats();
        assert_eq!(stats.failed, 1);
        assert!(stats.last_error.unwrap().contains("broken"));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_sub_failures_are_counted() {
        let events = EventLog::default();
        let (controller, consumer) = controller(
            parked(),
            vec![
                TestScraper {
                    sub_failure: true,
                    ..TestScraper::named("network", &events)
                }
                .boxed(),
            ],
        );
        controller.start().await.unwrap();

        let report = controller.scrape_once().await.unwrap();
        assert_eq!(report.sub_failures, 1);
        assert!(report.partial.is_none());
        assert_eq!(consumer.metrics_len(), 1);
        assert_eq!(controller.stats().sub_failures, 1);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_consumer_error_is_reported() {
        let events = EventLog::default();
        let (controller, consumer) =
            controller(parked(), vec![TestScraper::named("a", &events).boxed()]);
        controller.start().await.unwrap();
        consumer.set_rejecting(true);

        assert!(matches!(
            controller.scrape_once().await,
            Err(RoundError::Consumer(_))
        ));
        assert_eq!(controller.stats().consumer_errors, 1);

        consumer.set_rejecting(false);
        assert!(controller.scrape_once().await.is_ok());
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_rejected_at_start() {
        let events = EventLog::default();
        let (controller, consumer) = controller(
            ControllerConfig {
                collection_interval: Duration::ZERO,
                initial_delay: Duration::ZERO,
                ..Default::default()
            },
            vec![TestScraper::named("a", &events).boxed()],
        );

        match controller.start().await {
            Err(ReceiverError::Config(ConfigError::InvalidInterval { field })) => {
                assert_eq!(field, "collection_interval")
            }
            other => panic!("expected invalid interval, got {:?}", other),
        }
        assert!(lock(&events).is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.stats().rounds, 0);
        assert_eq!(consumer.metrics_len(), 0);
        assert!(controller.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_rolls_back() {
        let events = EventLog::default();
        let (controller, _consumer) = controller(
            parked(),
            vec![
                TestScraper::named("a", &events).boxed(),
                TestScraper {
                    fail_start: true,
                    ..TestScraper::named("b", &events)
                }
                .boxed(),
                TestScraper::named("c", &events).boxed(),
            ],
        );

        match controller.start().await {
            Err(ReceiverError::ScraperStart { key, .. }) => assert_eq!(key, "b"),
            other => panic!("expected start failure, got {:?}", other),
        }
        assert_eq!(*lock(&events), vec!["start a", "start b", "shutdown a"]);

        assert!(controller.shutdown().await.is_empty());
        assert_eq!(lock(&events).len(), 3);
    }

    #[tokio::test]
    async fn test_start_enables_shared_optimizations() {
        let events = EventLog::default();
        let shared = Arc::new(SharedOptimizations::new());
        let controller = ScraperController::new(
            parked(),
            Resource::new(),
            vec![TestScraper::named("a", &events).boxed()],
            Arc::new(CollectingConsumer::new()),
            Arc::clone(&shared),
        );
        assert!(!shared.is_enabled());
        controller.start().await.unwrap();
        assert!(shared.is_enabled());
        assert!(matches!(
            controller.start().await,
            Err(ReceiverError::AlreadyStarted)
        ));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_reverse_order_and_idempotent() {
        let events = EventLog::default();
        let (controller, _consumer) = controller(
            parked(),
            vec![
                TestScraper::named("a", &events).boxed(),
                TestScraper {
                    fail_shutdown: true,
                    ..TestScraper::named("b", &events)
                }
                .boxed(),
                TestScraper::named("c", &events).boxed(),
            ],
        );
        controller.start().await.unwrap();

        let failures = controller.shutdown().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "b");
        assert_eq!(
            lock(&events)[3..].to_vec(),
            vec!["shutdown c", "shutdown b", "shutdown a"]
        );

        assert!(controller.shutdown().await.is_empty());
        assert_eq!(lock(&events).len(), 6);
        assert!(matches!(
            controller.start().await,
            Err(ReceiverError::Stopped)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_scrape_reports_busy() {
        let events = EventLog::default();
        let config = ControllerConfig {
            timeout: Duration::from_millis(20),
            ..parked()
        };
        let (controller, _consumer) = controller(
            config,
            vec![
                TestScraper {
                    delay: Duration::from_millis(300),
                    ..TestScraper::named("slow", &events)
                }
                .boxed(),
            ],
        );
        controller.start().await.unwrap();

        match controller.scrape_once().await {
            Err(RoundError::Total(partial)) => {
                assert_eq!(partial.failed[0].message, "deadline exceeded")
            }
            other => panic!("expected deadline failure, got {:?}", other),
        }
        match controller.scrape_once().await {
            Err(RoundError::Total(partial)) => {
                assert_eq!(partial.failed[0].message, "previous scrape still running")
            }
            other => panic!("expected busy failure, got {:?}", other),
        }

        assert!(controller.shutdown().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_scraper_skips_ticks_without_overlap() {
        let events = EventLog::default();
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let config = ControllerConfig {
            collection_interval: Duration::from_millis(10),
            initial_delay: Duration::ZERO,
            ..Default::default()
        };
        let (controller, consumer) = controller(
            config,
            vec![
                TestScraper {
                    delay: Duration::from_millis(50),
                    max_in_flight: Arc::clone(&max_in_flight),
                    ..TestScraper::named("slow", &events)
                }
                .boxed(),
            ],
        );
        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        controller.shutdown().await;

        let stats = controller.stats();
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(stats.rounds >= 2, "rounds = {}", stats.rounds);
        assert!(stats.skipped_ticks > 0);
        assert!(consumer.metrics_len() as u64 <= stats.rounds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rounds_follow_interval() {
        let events = EventLog::default();
        let config = ControllerConfig {
            collection_interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(1),
            ..Default::default()
        };
        let (controller, consumer) =
            controller(config, vec![TestScraper::named("a", &events).boxed()]);
        controller.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(consumer.metrics_len(), 0);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(consumer.metrics_len(), 4);
        assert_eq!(controller.stats().skipped_ticks, 0);
        controller.shutdown().await;
    }
}
