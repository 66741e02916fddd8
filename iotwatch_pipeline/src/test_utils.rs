//! Fakes for the trait seams, shared by unit and integration tests.

use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::error::{CheckpointError, CommitSnafu};
use crate::event::RawEvent;
use crate::inference::{InferenceClient, InferenceError, InferenceResult, UnavailableSnafu};
use crate::reading::{InferenceRequest, SensorReading};
use crate::record::{PersistedRecord, assemble};
use crate::store::{DocumentStore, InMemoryDocumentStore, RejectedSnafu, StoreError};
use crate::telemetry::{MetricSink, MetricsPayload, TelemetryError};
use crate::transport::PartitionContext;

pub fn reading_json(unit: u32, cycle: u32) -> String {
    serde_json::json!({
        "unit_number": unit,
        "time_in_cycles": cycle,
        "setting_1": 0.0023,
        "sensor_1": 518.67,
        "sensor_2": 642.15,
        "message_id": format!("m{cycle}"),
    })
    .to_string()
}

pub fn reading_event(partition: &str, sequence_number: i64, unit: u32, cycle: u32) -> RawEvent {
    RawEvent::new(partition, sequence_number, reading_json(unit, cycle))
}

/// `n` records for unit 1 with ids `1-{i}-None-m{i}`.
pub fn records(n: u32) -> Vec<PersistedRecord> {
    (0..n)
        .map(|i| {
            let reading = SensorReading::from_json_str(&reading_json(1, i)).unwrap();
            assemble(reading, InferenceResult::remote(false, 0.1))
        })
        .collect()
}

pub struct StaticInferenceClient {
    result: Option<InferenceResult>,
    calls: AtomicUsize,
}

impl StaticInferenceClient {
    pub fn new(result: InferenceResult) -> Self {
        Self {
            result: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scoring(is_anomaly: bool, anomaly_score: f64) -> Self {
        Self::new(InferenceResult::remote(is_anomaly, anomaly_score))
    }

    pub fn unreachable() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for StaticInferenceClient {
    async fn predict(&self, _: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.result {
            Some(result) => Ok(result),
            None => UnavailableSnafu {
                message: "connection refused",
            }
            .fail(),
        }
    }
}

enum Rejection {
    Nothing,
    All,
    Ids(HashSet<String>),
    First(AtomicUsize),
}

/// Wraps an in-memory store, records every upsert attempt and rejects the
/// writes selected at construction.
pub struct ScriptedDocumentStore {
    inner: InMemoryDocumentStore,
    rejection: Rejection,
    attempts: Mutex<Vec<PersistedRecord>>,
}

impl ScriptedDocumentStore {
    fn with_rejection(rejection: Rejection) -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            rejection,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::with_rejection(Rejection::Nothing)
    }

    pub fn always_failing() -> Self {
        Self::with_rejection(Rejection::All)
    }

    pub fn failing_ids(ids: &[&str]) -> Self {
        Self::with_rejection(Rejection::Ids(ids.iter().map(|id| id.to_string()).collect()))
    }

    /// Rejects the first `n` upserts, whatever their id.
    pub fn failing_first(n: usize) -> Self {
        Self::with_rejection(Rejection::First(AtomicUsize::new(n)))
    }

    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    /// Every record handed to `upsert`, accepted or not.
    pub fn attempts(&self) -> Vec<PersistedRecord> {
        self.attempts.lock().unwrap().clone()
    }

    fn rejects(&self, record: &PersistedRecord) -> bool {
        match &self.rejection {
            Rejection::Nothing => false,
            Rejection::All => true,
            Rejection::Ids(ids) => ids.contains(&record.id),
            Rejection::First(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

#[async_trait]
impl DocumentStore for ScriptedDocumentStore {
    async fn upsert(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        self.attempts.lock().unwrap().push(record.clone());

        if self.rejects(record) {
            return RejectedSnafu {
                id: record.id.clone(),
                message: "request rate too large",
            }
            .fail();
        }

        self.inner.upsert(record).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

pub struct RecordingPartition {
    id: String,
    fail: bool,
    checkpoints: Mutex<Vec<i64>>,
}

impl RecordingPartition {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fail: false,
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(id)
        }
    }

    pub fn checkpoints(&self) -> Vec<i64> {
        self.checkpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartitionContext for RecordingPartition {
    fn partition_id(&self) -> &str {
        &self.id
    }

    async fn update_checkpoint(&self, event: &RawEvent) -> Result<(), CheckpointError> {
        if self.fail {
            return CommitSnafu {
                partition: self.id.clone(),
                message: "lease lost",
            }
            .fail();
        }

        self.checkpoints.lock().unwrap().push(event.sequence_number);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    delay: Option<Duration>,
    payloads: Mutex<Vec<MetricsPayload>>,
}

impl RecordingSink {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn payloads(&self) -> Vec<MetricsPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn push(&self, payload: &MetricsPayload) -> Result<(), TelemetryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
