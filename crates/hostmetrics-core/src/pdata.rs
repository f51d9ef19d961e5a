//! Telemetry batches handed to downstream consumers.
//!
//! The shapes follow the host-telemetry data model: a resource describing
//! the host, scopes named after the scraper that produced them, metrics with
//! name/unit/kind and data points with attributes and timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Attributes of the entity that produced a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resource {
    pub attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Gauge,
    Sum { monotonic: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            NumberValue::Int(v) => v as f64,
            NumberValue::Double(v) => v,
        }
    }
}

impl From<i64> for NumberValue {
    fn from(v: i64) -> Self {
        NumberValue::Int(v)
    }
}

impl From<u64> for NumberValue {
    fn from(v: u64) -> Self {
        NumberValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u32> for NumberValue {
    fn from(v: u32) -> Self {
        NumberValue::Int(i64::from(v))
    }
}

impl From<f64> for NumberValue {
    fn from(v: f64) -> Self {
        NumberValue::Double(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub attributes: BTreeMap<String, String>,
    pub value: NumberValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl DataPoint {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub kind: MetricKind,
    pub data_points: Vec<DataPoint>,
}

impl Metric {
    /// First data point whose attributes contain every given pair.
    pub fn point(&self, attrs: &[(&str, &str)]) -> Option<&DataPoint> {
        self.data_points
            .iter()
            .find(|dp| attrs.iter().all(|(k, v)| dp.attribute(k) == Some(*v)))
    }
}

/// Static description of a metric, declared once per scraper.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub kind: MetricKind,
}

impl MetricDef {
    pub const fn gauge(name: &'static str, description: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            description,
            unit,
            kind: MetricKind::Gauge,
        }
    }

    pub const fn sum(
        name: &'static str,
        description: &'static str,
        unit: &'static str,
        monotonic: bool,
    ) -> Self {
        Self {
            name,
            description,
            unit,
            kind: MetricKind::Sum { monotonic },
        }
    }
}

/// Accumulates the metrics of one scrape, sharing one timestamp.
#[derive(Debug)]
pub struct MetricsBuilder {
    timestamp: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    metrics: Vec<Metric>,
}

impl MetricsBuilder {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            start_time: None,
            metrics: Vec::new(),
        }
    }

    /// Start time stamped on points recorded from now on.
    pub fn set_start_time(&mut self, start_time: Option<DateTime<Utc>>) {
        self.start_time = start_time;
    }

    pub fn record(
        &mut self,
        def: &MetricDef,
        attrs: &[(&str, &str)],
        value: impl Into<NumberValue>,
    ) {
        let point = DataPoint {
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            value: value.into(),
            start_time: self.start_time,
            timestamp: self.timestamp,
        };

        match self.metrics.iter_mut().find(|m| m.name == def.name) {
            Some(metric) => metric.data_points.push(point),
            None => self.metrics.push(Metric {
                name: def.name.to_string(),
                description: def.description.to_string(),
                unit: def.unit.to_string(),
                kind: def.kind,
                data_points: vec![point],
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn finish(self) -> Vec<Metric> {
        self.metrics
    }
}

/// Metrics contributed by one scraper, named by its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeMetrics {
    pub scope: String,
    pub metrics: Vec<Metric>,
}

/// Merged output of one controller round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsBatch {
    pub resource: Resource,
    pub timestamp: DateTime<Utc>,
    pub scopes: Vec<ScopeMetrics>,
}

impl MetricsBatch {
    pub fn scope(&self, name: &str) -> Option<&ScopeMetrics> {
        self.scopes.iter().find(|s| s.scope == name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.scopes.iter().flat_map(|s| s.metrics.iter())
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics().find(|m| m.name == name)
    }

    pub fn metric_count(&self) -> usize {
        self.scopes.iter().map(|s| s.metrics.len()).sum()
    }

    pub fn data_point_count(&self) -> usize {
        self.metrics().map(|m| m.data_points.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl LogRecord {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogsBatch {
    pub resource: Resource,
    pub records: Vec<LogRecord>,
}
