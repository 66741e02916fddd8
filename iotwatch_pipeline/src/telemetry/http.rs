use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use snafu::ResultExt;
use tracing::debug;

use super::{DEFAULT_PUSH_TIMEOUT, MetricSink, MetricsPayload, RequestSnafu, TelemetryError};

pub const API_KEY_HEADER: &str = "DD-API-KEY";

/// Posts metric payloads to a series intake endpoint.
///
/// The response status is logged but otherwise ignored.
#[derive(Debug, Clone)]
pub struct HttpMetricSink {
    client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpMetricSink {
    pub fn new(client: Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

#[async_trait]
impl MetricSink for HttpMetricSink {
    async fn push(&self, payload: &MetricsPayload) -> Result<(), TelemetryError> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .context(RequestSnafu {})?;

        debug!(status = %response.status(), series = payload.series.len(), "Pushed metrics");

        Ok(())
    }
}
