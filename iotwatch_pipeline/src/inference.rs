//! Remote anomaly classification.
//!
//! The gateway never fails outward: any failure of the remote call (transport
//! error, timeout, non-success status, malformed body) turns into the
//! sentinel result returned by [`InferenceResult::fallback`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::{debug, error, warn};

use crate::reading::InferenceRequest;

pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Score stored when no classification could be obtained.
pub const FALLBACK_ANOMALY_SCORE: f64 = -999.0;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InferenceError {
    #[snafu(display("inference request failed"))]
    Request { source: reqwest::Error },
    #[snafu(display("inference endpoint returned status {status}"))]
    Status { status: StatusCode },
    #[snafu(display("inference response is malformed"))]
    MalformedResponse { source: reqwest::Error },
    #[snafu(display("inference request timed out after {timeout:?}"))]
    Timeout { timeout: Duration },
    #[snafu(display("inference endpoint unavailable: {message}"))]
    Unavailable { message: String },
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScoreSource {
    #[default]
    Remote,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(default)]
    pub is_anomaly: bool,
    #[serde(default)]
    pub anomaly_score: f64,
    #[serde(skip)]
    pub source: ScoreSource,
}

impl InferenceResult {
    pub fn remote(is_anomaly: bool, anomaly_score: f64) -> Self {
        Self {
            is_anomaly,
            anomaly_score,
            source: ScoreSource::Remote,
        }
    }

    /// The fail-open result: not an anomaly, with a score no model produces.
    pub fn fallback() -> Self {
        Self {
            is_anomaly: false,
            anomaly_score: FALLBACK_ANOMALY_SCORE,
            source: ScoreSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ScoreSource::Fallback
    }
}

/// A client for the remote scoring endpoint.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn predict(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError>;
}

/// Posts the request as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: Client,
    endpoint: String,
}

impl HttpInferenceClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn predict(&self, request: &InferenceRequest) -> Result<InferenceResult, InferenceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .context(RequestSnafu {})?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { status }.fail();
        }

        let result = response
            .json::<InferenceResult>()
            .await
            .context(MalformedResponseSnafu {})?;

        Ok(InferenceResult::remote(result.is_anomaly, result.anomaly_score))
    }
}

/// Applies the timeout and fallback policy around an [`InferenceClient`].
#[derive(Clone)]
pub struct InferenceGateway {
    client: Arc<dyn InferenceClient>,
    timeout: Duration,
}

impl InferenceGateway {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn classify(&self, request: &InferenceRequest) -> InferenceResult {
        let reading = request.reading();
        let outcome = tokio::time::timeout(self.timeout, self.client.predict(request))
            .await
            .unwrap_or_else(|_| {
                TimeoutSnafu {
                    timeout: self.timeout,
                }
                .fail()
            });

        match outcome {
            Ok(result) => {
                debug!(
                    unit_number = %reading.unit_number,
                    time_in_cycles = %reading.time_in_cycles,
                    is_anomaly = result.is_anomaly,
                    anomaly_score = result.anomaly_score,
                    "Classified reading"
                );
                result
            }
            Err(err) => {
                error!(
                    unit_number = %reading.unit_number,
                    time_in_cycles = %reading.time_in_cycles,
                    error = %err,
                    "Inference call failed"
                );
                warn!("Falling back to default anomaly status");
                InferenceResult::fallback()
            }
        }
    }
}
