//! Wires the shared clients into a running consumer.

use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{MissingClientSnafu, Result, TransportSnafu};
use crate::inference::{HttpInferenceClient, InferenceClient, InferenceGateway};
use crate::lifecycle::SharedClients;
use crate::orchestrator::BatchOrchestrator;
use crate::telemetry::{HttpMetricSink, MetricSink, TelemetryEmitter, TelemetryOptions};
use crate::transport::{ReceiveOptions, StreamClient};

/// The orchestrator and the telemetry task that drains its metrics.
pub struct Pipeline {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub emitter: TelemetryEmitter,
}

impl Pipeline {
    /// Builds the pipeline on top of the shared HTTP session.
    pub fn new(clients: &SharedClients) -> Result<Self> {
        let http = clients.http.clone().context(MissingClientSnafu { name: "http" })?;
        let settings = &clients.settings;

        let inference = Arc::new(HttpInferenceClient::new(
            http.clone(),
            settings.inference_url.clone(),
        ));
        let sink = Arc::new(HttpMetricSink::new(
            http,
            settings.telemetry_url.clone(),
            settings.telemetry_api_key.clone(),
        ));

        Ok(Self::with_clients(clients, inference, sink))
    }

    pub fn with_clients(
        clients: &SharedClients,
        inference: Arc<dyn InferenceClient>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let settings = &clients.settings;
        let gateway = InferenceGateway::new(inference).with_timeout(settings.inference_timeout);
        let emitter = TelemetryEmitter::new(sink, TelemetryOptions::default());
        let orchestrator = BatchOrchestrator::new(
            clients.store.clone(),
            gateway,
            emitter.client(),
            settings.orchestrator.clone(),
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            emitter,
        }
    }

    /// Receives batches until `ct` is cancelled, then flushes telemetry.
    pub async fn run(
        self,
        stream: Arc<dyn StreamClient>,
        options: ReceiveOptions,
        ct: CancellationToken,
    ) -> Result<()> {
        let Self {
            orchestrator,
            emitter,
        } = self;

        let telemetry_ct = CancellationToken::new();
        let receive = async {
            let result = stream
                .receive_batch(orchestrator, options, ct)
                .await
                .context(TransportSnafu {});
            telemetry_ct.cancel();
            result
        };

        let (result, summary) = tokio::join!(receive, emitter.run(telemetry_ct.clone()));

        info!(
            pushed = summary.pushed,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "Consumer stopped"
        );

        result
    }
}

/// Runs the stream consumer with the HTTP inference client and metric sink.
pub async fn run_consumer(clients: &SharedClients, ct: CancellationToken) -> Result<()> {
    let stream = clients
        .stream
        .clone()
        .context(MissingClientSnafu { name: "stream" })?;
    let pipeline = Pipeline::new(clients)?;

    info!(
        stream = %clients.settings.stream_name,
        inference_url = %clients.settings.inference_url,
        "Starting consumer"
    );

    pipeline.run(stream, clients.settings.receive, ct).await
}
