//! Downstream consumers for metrics and logs batches.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::pdata::{LogsBatch, MetricsBatch};
use crate::util::lock;

/// Error returned by a consumer that could not accept a batch.
#[derive(Debug)]
pub enum ConsumerError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
    Rejected(String),
}

impl std::fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerError::Io(e) => write!(f, "I/O error: {}", e),
            ConsumerError::Serialize(e) => write!(f, "serialization error: {}", e),
            ConsumerError::Rejected(msg) => write!(f, "batch rejected: {}", msg),
        }
    }
}

impl std::error::Error for ConsumerError {}

impl From<std::io::Error> for ConsumerError {
    fn from(e: std::io::Error) -> Self {
        ConsumerError::Io(e)
    }
}

impl From<serde_json::Error> for ConsumerError {
    fn from(e: serde_json::Error) -> Self {
        ConsumerError::Serialize(e)
    }
}

pub trait MetricsConsumer: Send + Sync {
    fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), ConsumerError>;
}

pub trait LogsConsumer: Send + Sync {
    fn consume_logs(&self, batch: LogsBatch) -> Result<(), ConsumerError>;
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    metrics: Mutex<Vec<MetricsBatch>>,
    logs: Mutex<Vec<LogsBatch>>,
    rejecting: AtomicBool,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every batch is refused with `ConsumerError::Rejected`.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn metrics(&self) -> Vec<MetricsBatch> {
        lock(&self.metrics).clone()
    }

    pub fn metrics_len(&self) -> usize {
        lock(&self.metrics).len()
    }

    pub fn logs(&self) -> Vec<LogsBatch> {
        lock(&self.logs).clone()
    }

    pub fn logs_len(&self) -> usize {
        lock(&self.logs).len()
    }

    fn check_accepting(&self) -> Result<(), ConsumerError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ConsumerError::Rejected("consumer is rejecting".into()));
        }
        Ok(())
    }
}

impl MetricsConsumer for CollectingConsumer {
    fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), ConsumerError> {
        self.check_accepting()?;
        lock(&self.metrics).push(batch);
        Ok(())
    }
}

impl LogsConsumer for CollectingConsumer {
    fn consume_logs(&self, batch: LogsBatch) -> Result<(), ConsumerError> {
        self.check_accepting()?;
        lock(&self.logs).push(batch);
        Ok(())
    }
}

/// Writes each batch as one JSON line.
pub struct JsonLinesConsumer<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesConsumer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_line<T: Serialize>(&self, value: &T) -> Result<(), ConsumerError> {
        let line = serde_json::to_vec(value)?;
        let mut writer = lock(&self.writer);
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> MetricsConsumer for JsonLinesConsumer<W> {
    fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), ConsumerError> {
        self.write_line(&batch)
    }
}

impl<W: Write + Send> LogsConsumer for JsonLinesConsumer<W> {
    fn consume_logs(&self, batch: LogsBatch) -> Result<(), ConsumerError> {
        self.write_line(&batch)
    }
}
