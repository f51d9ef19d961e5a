//! End-to-end receiver behavior over a mocked host.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use hostmetrics_core::platform::mock::MockFs;
use hostmetrics_core::platform::traits::MockEnv;
use hostmetrics_core::{
    CollectingConsumer, ConfigError, CreateSettings, ReceiverConfig, create_logs_receiver,
    create_metrics_receiver,
};

fn settings(fs: &MockFs, env: MockEnv) -> CreateSettings {
    CreateSettings::new(Arc::new(fs.clone()), Arc::new(env))
}

#[tokio::test(start_paused = true)]
async fn load_only_config_produces_load_points_only() {
    let fs = MockFs::typical_system();
    let consumer = Arc::new(CollectingConsumer::new());
    let config = ReceiverConfig::from_json(json!({
        "collection_interval": "1s",
        "initial_delay": "0s",
        "scrapers": { "load": {} }
    }))
    .unwrap();

    let receiver =
        create_metrics_receiver(&config, &settings(&fs, MockEnv::new()), consumer.clone()).unwrap();
    receiver.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    receiver.shutdown().await;

    let batches = consumer.metrics();
    assert_eq!(batches.len(), 3);
    for batch in &batches {
        assert_eq!(batch.scopes.len(), 1);
        assert_eq!(batch.scopes[0].scope, "load");
        assert_eq!(batch.data_point_count(), 3);
        assert!(
            batch
                .metrics()
                .all(|m| m.name.starts_with("system.cpu.load_average."))
        );
    }
    assert_eq!(batches[0].resource.get("host.name"), Some("testhost"));
}

#[test]
fn unknown_scraper_key_is_rejected_by_name() {
    let fs = MockFs::typical_system();
    let config = ReceiverConfig::from_json(json!({
        "scrapers": { "cpu": {}, "quantum": {} }
    }))
    .unwrap();

    let err = create_metrics_receiver(
        &config,
        &settings(&fs, MockEnv::new()),
        Arc::new(CollectingConsumer::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ConfigError::UnknownScraper { .. }));
    assert!(err.to_string().contains("quantum"));
}

#[test]
fn conflicting_root_path_is_rejected() {
    let fs = MockFs::typical_system();
    let config = ReceiverConfig::from_json(json!({
        "root_path": "/hostfs",
        "scrapers": { "memory": {} }
    }))
    .unwrap();
    let env = MockEnv::new().with("HOST_ETC", "/custom/etc");

    let err = create_logs_receiver(
        &config,
        &settings(&fs, env),
        Arc::new(CollectingConsumer::new()),
    )
    .err()
    .unwrap();
    match err {
        ConfigError::ConflictingRootPath(conflict) => assert_eq!(conflict.variable, "HOST_ETC"),
        other => panic!("expected root path conflict, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn metrics_and_metadata_run_on_independent_cadences() {
    let fs = MockFs::typical_system();
    let metrics = Arc::new(CollectingConsumer::new());
    let logs = Arc::new(CollectingConsumer::new());
    let config = ReceiverConfig::from_json(json!({
        "collection_interval": "1s",
        "initial_delay": "0s",
        "metadata_collection_interval": "100s",
        "scrapers": { "load": {} }
    }))
    .unwrap();
    let settings = settings(&fs, MockEnv::new());

    let metrics_receiver = create_metrics_receiver(&config, &settings, metrics.clone()).unwrap();
    let logs_receiver = create_logs_receiver(&config, &settings, logs.clone()).unwrap();
    metrics_receiver.start().await.unwrap();
    logs_receiver.start().unwrap();

    tokio::time::sleep(Duration::from_millis(399_500)).await;
    logs_receiver.shutdown().await;
    metrics_receiver.shutdown().await;

    let rounds = metrics.metrics_len();
    let emissions = logs.logs_len();
    assert_eq!(emissions, 4);
    assert!((395..=400).contains(&rounds), "rounds = {}", rounds);
    let ratio = rounds as f64 / emissions as f64;
    assert!((ratio - 100.0).abs() <= 2.0, "ratio = {}", ratio);
}

#[tokio::test]
async fn process_handle_counts_flow_through() {
    let fs = MockFs::typical_system();
    let consumer = Arc::new(CollectingConsumer::new());
    let config = ReceiverConfig::from_json(json!({
        "initial_delay": "1h",
        "scrapers": { "process": { "handle_count": true } }
    }))
    .unwrap();

    let receiver =
        create_metrics_receiver(&config, &settings(&fs, MockEnv::new()), consumer.clone()).unwrap();
    receiver.start().await.unwrap();
    let report = receiver.scrape_once().await.unwrap();
    assert!(report.partial.is_none());

    let batch = &consumer.metrics()[0];
    let fds = batch.metric("process.open_file_descriptors").unwrap();
    assert_eq!(fds.data_points.len(), 3);
    assert!(batch.metric("process.cpu.time").is_some());

    assert!(receiver.shutdown().await.is_empty());
    assert!(receiver.shutdown().await.is_empty());
}
