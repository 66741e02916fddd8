//! Best-effort metric pushes.
//!
//! [`TelemetryClient::emit`] never waits: payloads go into a bounded queue and
//! are dropped when it is full. A [`TelemetryEmitter`] task drains the queue
//! into a [`MetricSink`]. When cancelled it stops accepting new payloads and
//! flushes what is queued, bounded by [`TelemetryOptions::flush_timeout`].

pub mod http;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, stream::FuturesUnordered};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::http::HttpMetricSink;
use crate::metrics::TelemetryMetrics;

pub const EVENTS_PROCESSED_METRIC: &str = "iot.consumer.events_processed";
pub const STORE_WRITES_METRIC: &str = "iot.consumer.writes_to_cosmos_db";
pub const SERVICE_TAG: &str = "service:event_consumer";

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TelemetryError {
    #[snafu(display("metric push failed"))]
    Request { source: reqwest::Error },
    #[snafu(display("metric push timed out after {timeout:?}"))]
    PushTimeout { timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Count,
    Gauge,
}

/// One metric with its `[timestamp, value]` points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric: String,
    pub points: Vec<(i64, f64)>,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub series: Vec<MetricSeries>,
}

impl MetricSeries {
    pub fn count(metric: impl Into<String>, timestamp: i64, value: f64, tags: Vec<String>) -> Self {
        Self {
            metric: metric.into(),
            points: vec![(timestamp, value)],
            kind: MetricKind::Count,
            tags,
        }
    }
}

/// The two counts pushed for every processed event.
pub fn event_payload(unit_number: &str, environment: &str, timestamp: i64) -> MetricsPayload {
    let tags = vec![
        SERVICE_TAG.to_string(),
        format!("env:{environment}"),
        format!("unit_number:{unit_number}"),
    ];

    MetricsPayload {
        series: vec![
            MetricSeries::count(EVENTS_PROCESSED_METRIC, timestamp, 1.0, tags.clone()),
            MetricSeries::count(STORE_WRITES_METRIC, timestamp, 1.0, tags),
        ],
    }
}

/// Destination of metric payloads.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn push(&self, payload: &MetricsPayload) -> Result<(), TelemetryError>;
}

#[derive(Debug, Clone, Copy)]
pub struct TelemetryOptions {
    pub queue_capacity: usize,
    pub push_timeout: Duration,
    pub flush_timeout: Duration,
    pub max_in_flight: usize,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

pub struct TelemetryEmitter {
    tx: mpsc::Sender<MetricsPayload>,
    rx: mpsc::Receiver<MetricsPayload>,
    sink: Arc<dyn MetricSink>,
    options: TelemetryOptions,
    metrics: TelemetryMetrics,
}

/// Cheap handle used to enqueue payloads.
#[derive(Clone)]
pub struct TelemetryClient {
    tx: Option<mpsc::Sender<MetricsPayload>>,
    metrics: TelemetryMetrics,
}

/// What the drain task did, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub pushed: usize,
    pub failed: usize,
    /// Payloads still queued or in flight when the flush deadline passed.
    pub abandoned: usize,
}

impl TelemetryEmitter {
    pub fn new(sink: Arc<dyn MetricSink>, options: TelemetryOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        Self {
            tx,
            rx,
            sink,
            options,
            metrics: TelemetryMetrics::default(),
        }
    }

    pub fn client(&self) -> TelemetryClient {
        TelemetryClient {
            tx: Some(self.tx.clone()),
            metrics: self.metrics.clone(),
        }
    }

    /// Drains the queue until `ct` is cancelled, then flushes.
    pub async fn run(self, ct: CancellationToken) -> DrainSummary {
        let Self {
            tx,
            mut rx,
            sink,
            options,
            metrics,
        } = self;
        drop(tx);

        let mut summary = DrainSummary::default();
        let mut in_flight = FuturesUnordered::new();
        let max_in_flight = options.max_in_flight.max(1);

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                payload = rx.recv(), if in_flight.len() < max_in_flight => {
                    let Some(payload) = payload else {
                        break;
                    };
                    in_flight.push(push_payload(sink.clone(), payload, options.push_timeout));
                }
                result = in_flight.next(), if !in_flight.is_empty() => {
                    if let Some(result) = result {
                        summary.record(result, &metrics);
                    }
                }
            }
        }

        rx.close();
        debug!(in_flight = in_flight.len(), "Flushing telemetry queue");

        let flush = async {
            loop {
                tokio::select! {
                    payload = rx.recv(), if in_flight.len() < max_in_flight => {
                        let Some(payload) = payload else {
                            break;
                        };
                        in_flight.push(push_payload(sink.clone(), payload, options.push_timeout));
                    }
                    result = in_flight.next(), if !in_flight.is_empty() => {
                        if let Some(result) = result {
                            summary.record(result, &metrics);
                        }
                    }
                }
            }

            while let Some(result) = in_flight.next().await {
                summary.record(result, &metrics);
            }
        };

        if tokio::time::timeout(options.flush_timeout, flush).await.is_err() {
            let mut abandoned = in_flight.len();
            while rx.try_recv().is_ok() {
                abandoned += 1;
            }
            summary.abandoned = abandoned;
            warn!(abandoned, "Telemetry flush deadline passed, dropping metrics");
        }

        info!(
            pushed = summary.pushed,
            failed = summary.failed,
            "Telemetry emitter stopped"
        );

        summary
    }
}

impl DrainSummary {
    fn record(&mut self, result: Result<(), TelemetryError>, metrics: &TelemetryMetrics) {
        match result {
            Ok(()) => self.pushed += 1,
            Err(err) => {
                self.failed += 1;
                metrics.push_failures.add(1, &[]);
                warn!(error = %err, "Failed to push metrics");
            }
        }
    }
}

async fn push_payload(
    sink: Arc<dyn MetricSink>,
    payload: MetricsPayload,
    timeout: Duration,
) -> Result<(), TelemetryError> {
    tokio::time::timeout(timeout, sink.push(&payload))
        .await
        .unwrap_or_else(|_| PushTimeoutSnafu { timeout }.fail())
}

impl TelemetryClient {
    /// A client that drops every payload.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            metrics: TelemetryMetrics::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueues the payload without waiting. Returns whether it was accepted.
    pub fn emit(&self, payload: MetricsPayload) -> bool {
        let Some(tx) = &self.tx else {
            debug!("Telemetry disabled, skipping metrics");
            return false;
        };

        match tx.try_send(payload) {
            Ok(()) => {
                self.metrics.enqueued.add(1, &[]);
                debug!("Queued consumer metrics");
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.dropped.add(1, &[]);
                warn!("Telemetry queue full, dropping metrics");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.dropped.add(1, &[]);
                warn!("Telemetry emitter stopped, dropping metrics");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingSink;

    #[test]
    fn test_event_payload_shape() {
        let payload = event_payload("1.0", "local", 1_700_000_000);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            value["series"][0],
            serde_json::json!({
                "metric": "iot.consumer.events_processed",
                "points": [[1_700_000_000i64, 1.0]],
                "type": "count",
                "tags": ["service:event_consumer", "env:local", "unit_number:1.0"]
            })
        );
        assert_eq!(value["series"][1]["metric"], "iot.consumer.writes_to_cosmos_db");
    }

    #[tokio::test]
    async fn test_flush_on_cancel() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = TelemetryEmitter::new(sink.clone(), TelemetryOptions::default());
        let client = emitter.client();

        for unit in 0..3 {
            assert!(client.emit(event_payload(&unit.to_string(), "test", 0)));
        }

        let ct = CancellationToken::new();
        ct.cancel();
        let summary = emitter.run(ct).await;

        assert_eq!(summary.pushed, 3);
        assert_eq!(sink.payloads().len(), 3);
        assert!(!client.emit(event_payload("9", "test", 0)));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = TelemetryEmitter::new(
            sink,
            TelemetryOptions {
                queue_capacity: 2,
                ..Default::default()
            },
        );
        let client = emitter.client();

        assert!(client.emit(event_payload("1", "test", 0)));
        assert!(client.emit(event_payload("2", "test", 0)));
        assert!(!client.emit(event_payload("3", "test", 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deadline_abandons_slow_pushes() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_secs(60)));
        let emitter = TelemetryEmitter::new(
            sink.clone(),
            TelemetryOptions {
                push_timeout: Duration::from_secs(120),
                flush_timeout: Duration::from_secs(1),
                ..Default::default()
            },
        );
        let client = emitter.client();
        client.emit(event_payload("1", "test", 0));

        let ct = CancellationToken::new();
        ct.cancel();
        let summary = emitter.run(ct).await;

        assert_eq!(summary.pushed, 0);
        assert_eq!(summary.abandoned, 1);
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_timeout_counts_as_failure() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_secs(60)));
        let emitter = TelemetryEmitter::new(sink, TelemetryOptions::default());
        let client = emitter.client();
        client.emit(event_payload("1", "test", 0));

        let ct = CancellationToken::new();
        let task = tokio::spawn(emitter.run(ct.clone()));
        tokio::time::sleep(Duration::from_secs(10)).await;
        ct.cancel();
        let summary = task.await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pushed, 0);
    }

    #[test]
    fn test_disabled_client() {
        let client = TelemetryClient::disabled();
        assert!(!client.is_enabled());
        assert!(!client.emit(event_payload("1", "test", 0)));
    }
}
