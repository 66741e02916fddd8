//! Sequences decode, classification, persistence and checkpointing for one
//! delivered batch.
//!
//! Events are handled one at a time in delivery order. A failure on one event
//! is logged and counted and never stops the rest of the batch. The store is
//! written once per batch, after every event has been handled, and the
//! checkpoint is committed after the write attempt according to the
//! [`CheckpointPolicy`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use snafu::ResultExt;
use tracing::{error, info, warn};

use crate::checkpoint::{self, CheckpointPolicy};
use crate::error::{CheckpointSnafu, PipelineError, Result, UncommittedSnafu};
use crate::event::RawEvent;
use crate::inference::{InferenceGateway, InferenceResult};
use crate::metrics::PipelineMetrics;
use crate::reading::{InferenceRequest, SensorReading};
use crate::record::{PersistedRecord, assemble};
use crate::store::DocumentStore;
use crate::telemetry::{TelemetryClient, event_payload};
use crate::transport::{BatchHandler, PartitionContext};
use crate::writer::{self, WriteFailurePolicy};

pub const DEFAULT_ENVIRONMENT: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub write_failure_policy: WriteFailurePolicy,
    pub checkpoint_policy: CheckpointPolicy,
    /// Value of the `env:` telemetry tag.
    pub environment: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            write_failure_policy: WriteFailurePolicy::default(),
            checkpoint_policy: CheckpointPolicy::default(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
        }
    }
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub partition_id: String,
    pub received: usize,
    pub decoded: usize,
    pub skipped: usize,
    pub fallbacks: usize,
    pub written: usize,
    pub write_failures: usize,
    pub checkpointed: bool,
}

pub struct BatchOrchestrator {
    store: Option<Arc<dyn DocumentStore>>,
    gateway: InferenceGateway,
    telemetry: TelemetryClient,
    options: OrchestratorOptions,
    metrics: PipelineMetrics,
}

impl BatchOrchestrator {
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        gateway: InferenceGateway,
        telemetry: TelemetryClient,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            gateway,
            telemetry,
            options,
            metrics: PipelineMetrics::default(),
        }
    }

    pub async fn process_batch(
        &self,
        partition: &dyn PartitionContext,
        events: &[RawEvent],
    ) -> Result<BatchReport> {
        let partition_id = partition.partition_id();
        let mut report = BatchReport {
            partition_id: partition_id.to_string(),
            received: events.len(),
            ..Default::default()
        };

        info!(partition = partition_id, events = events.len(), "Received batch");

        let Some(last) = events.last() else {
            return Ok(report);
        };

        self.metrics.events_received.add(events.len() as u64, &[]);

        let mut records = Vec::with_capacity(events.len());
        for event in events {
            match self.process_event(event).await {
                Some((record, result)) => {
                    report.decoded += 1;
                    if result.is_fallback() {
                        report.fallbacks += 1;
                    }
                    records.push(record);
                }
                None => report.skipped += 1,
            }
        }

        let Some(store) = &self.store else {
            warn!(
                partition = partition_id,
                records = records.len(),
                "Document store not available, skipping write and checkpoint"
            );
            return Ok(report);
        };

        let outcome =
            writer::write_all(store.as_ref(), &records, self.options.write_failure_policy).await;
        report.written = outcome.written;
        report.write_failures = outcome.failures.len();
        self.metrics.records_written.add(outcome.written as u64, &[]);
        self.metrics
            .write_failures
            .add(outcome.failures.len() as u64, &[]);

        if !self.options.checkpoint_policy.should_commit(&outcome) {
            warn!(
                partition = partition_id,
                policy = %self.options.checkpoint_policy,
                "Skipping checkpoint after incomplete write"
            );
            return Ok(report);
        }

        checkpoint::commit(partition, last)
            .await
            .context(CheckpointSnafu {})?;
        report.checkpointed = true;
        self.metrics.checkpoints_committed.add(1, &[]);

        Ok(report)
    }

    /// Returns `None` when the event is skipped.
    async fn process_event(&self, event: &RawEvent) -> Option<(PersistedRecord, InferenceResult)> {
        let reading = match SensorReading::decode(event) {
            Ok(reading) => reading,
            Err(err) => {
                self.metrics.decode_failures.add(1, &[]);
                error!(
                    partition = %event.partition_id,
                    sequence_number = event.sequence_number,
                    error = %err,
                    body = %event.body_preview(),
                    "Error processing event"
                );
                return None;
            }
        };

        let result = self.gateway.classify(&InferenceRequest::from(&reading)).await;
        if result.is_fallback() {
            self.metrics.inference_fallbacks.add(1, &[]);
        }

        let record = assemble(reading, result);

        info!(
            unit_number = %record.reading.unit_number,
            time_in_cycles = %record.reading.time_in_cycles,
            is_anomaly = record.is_anomaly,
            anomaly_score = record.anomaly_score,
            "Processed reading"
        );

        self.telemetry.emit(event_payload(
            &record.partition_key(),
            &self.options.environment,
            Utc::now().timestamp(),
        ));

        Some((record, result))
    }
}

#[async_trait]
impl BatchHandler for BatchOrchestrator {
    /// Fails when a non-empty batch was not checkpointed, so the transport
    /// redelivers it from the last committed position.
    async fn on_event_batch(
        &self,
        partition: &dyn PartitionContext,
        events: Vec<RawEvent>,
    ) -> Result<(), PipelineError> {
        let report = self.process_batch(partition, &events).await?;

        if report.skipped > 0 || report.write_failures > 0 {
            warn!(
                partition = %report.partition_id,
                skipped = report.skipped,
                write_failures = report.write_failures,
                checkpointed = report.checkpointed,
                "Batch processed with failures"
            );
        }

        if report.received > 0 && !report.checkpointed {
            let reason = if self.store.is_none() {
                "document store not available"
            } else {
                "incomplete write"
            };
            return UncommittedSnafu {
                partition: report.partition_id,
                reason,
            }
            .fail();
        }

        Ok(())
    }
}
