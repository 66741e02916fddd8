//! Streaming batch pipeline for IoT sensor readings.
//!
//! Each delivered batch is decoded into [`SensorReading`]s, classified by a
//! remote scoring endpoint through the [`InferenceGateway`], assembled into
//! [`PersistedRecord`]s, upserted into a [`DocumentStore`] and finally
//! checkpointed on the stream partition. The [`BatchOrchestrator`] sequences
//! these steps; [`lifecycle`] owns the long-lived clients.

pub mod checkpoint;
pub mod consumer;
pub mod error;
pub mod event;
pub mod inference;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod reading;
pub mod record;
pub mod store;
pub mod telemetry;
pub mod test_utils;
pub mod transport;
pub mod writer;

pub use self::checkpoint::CheckpointPolicy;
pub use self::consumer::{Pipeline, run_consumer};
pub use self::error::{
    CheckpointError, DecodeError, PipelineError, Result, StartupError, TransportError,
};
pub use self::event::RawEvent;
pub use self::inference::{
    HttpInferenceClient, InferenceClient, InferenceError, InferenceGateway, InferenceResult,
    ScoreSource,
};
pub use self::lifecycle::{
    ClientFactory, DefaultClientFactory, PipelineConfig, PipelineSettings, SharedClients,
    initialize, shutdown,
};
pub use self::orchestrator::{BatchOrchestrator, BatchReport, OrchestratorOptions};
pub use self::reading::{InferenceRequest, SensorReading};
pub use self::record::{PersistedRecord, assemble, record_id};
pub use self::store::{DocumentStore, InMemoryDocumentStore, StoreError};
pub use self::telemetry::{MetricSink, MetricsPayload, TelemetryClient, TelemetryEmitter};
pub use self::transport::{
    BatchHandler, InMemoryStream, PartitionContext, ReceiveOptions, StreamClient,
};
pub use self::writer::{WriteFailurePolicy, WriteOutcome, write_all};
