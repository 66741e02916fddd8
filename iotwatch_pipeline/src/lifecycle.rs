//! Construction and teardown of the long-lived clients.
//!
//! [`initialize`] validates the configuration and opens the stream client,
//! the document store client and the HTTP session, in that order. If any step
//! fails the handles opened so far are closed before the error is returned.
//! [`shutdown`] closes whatever is still open and can be called any number of
//! times.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Args;
use reqwest::{Client, Url};
use snafu::ResultExt;
use tracing::{info, warn};

use crate::checkpoint::CheckpointPolicy;
use crate::error::{
    InvalidConfigurationSnafu, MissingConfigurationSnafu, StartupError, StreamClientSnafu,
    TransportError, UnsupportedConnectionSnafu,
};
use crate::inference::DEFAULT_INFERENCE_TIMEOUT;
use crate::orchestrator::{DEFAULT_ENVIRONMENT, OrchestratorOptions};
use crate::store::http::{DEFAULT_CONTAINER, DEFAULT_DATABASE};
use crate::store::{
    DocumentStore, HttpDocumentStore, HttpStoreOptions, InMemoryDocumentStore, InvalidEndpointSnafu,
    RequestSnafu as StoreRequestSnafu, StoreError,
};
use crate::transport::file::parse_partitions;
use crate::transport::{FileReplayStream, InMemoryStream, ReceiveOptions, StreamClient};
use crate::writer::WriteFailurePolicy;

pub const DEFAULT_CONSUMER_GROUP: &str = "$Default";

/// Pipeline configuration, read from flags or their environment variables.
#[derive(Debug, Clone, Args)]
pub struct PipelineConfig {
    /// Stream connection string (`memory://` or `file://<path>`).
    #[arg(long, env = "EVENT_HUB_CONNECTION_STR", hide_env_values = true)]
    pub stream_connection: Option<String>,
    /// Name of the stream to consume.
    #[arg(long, env = "EVENT_HUB_NAME")]
    pub stream_name: Option<String>,
    #[arg(long, env = "EVENT_HUB_CONSUMER_GROUP", default_value = DEFAULT_CONSUMER_GROUP)]
    pub consumer_group: String,
    /// Document store endpoint (`memory://` or an `http(s)://` URL).
    #[arg(long, env = "COSMOS_DB_URI")]
    pub store_uri: Option<String>,
    #[arg(long, env = "COSMOS_DB_KEY", hide_env_values = true)]
    pub store_key: Option<String>,
    #[arg(long, env = "COSMOS_DB_DATABASE", default_value = DEFAULT_DATABASE)]
    pub store_database: String,
    #[arg(long, env = "COSMOS_DB_CONTAINER", default_value = DEFAULT_CONTAINER)]
    pub store_container: String,
    /// Scoring endpoint receiving one reading per request.
    #[arg(long, env = "ML_ENDPOINT_URL")]
    pub inference_url: Option<String>,
    #[arg(long, env = "INFERENCE_TIMEOUT_MS", default_value_t = DEFAULT_INFERENCE_TIMEOUT.as_millis() as u64)]
    pub inference_timeout_ms: u64,
    /// Metric series intake URL.
    #[arg(long, env = "DD_API_METRICS_URL")]
    pub telemetry_url: Option<String>,
    #[arg(long, env = "DD_API_KEY_HEADER", hide_env_values = true)]
    pub telemetry_api_key: Option<String>,
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = crate::transport::DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,
    #[arg(long, env = "MAX_WAIT_MS", default_value_t = crate::transport::DEFAULT_MAX_WAIT.as_millis() as u64)]
    pub max_wait_ms: u64,
    #[arg(long, env = "WRITE_FAILURE_POLICY", value_enum, default_value_t = WriteFailurePolicy::Continue)]
    pub write_failure_policy: WriteFailurePolicy,
    #[arg(long, env = "CHECKPOINT_POLICY", value_enum, default_value_t = CheckpointPolicy::Always)]
    pub checkpoint_policy: CheckpointPolicy,
    /// Value of the `env:` telemetry tag.
    #[arg(long, env = "DEPLOY_ENV", default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_connection: None,
            stream_name: None,
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            store_uri: None,
            store_key: None,
            store_database: DEFAULT_DATABASE.to_string(),
            store_container: DEFAULT_CONTAINER.to_string(),
            inference_url: None,
            inference_timeout_ms: DEFAULT_INFERENCE_TIMEOUT.as_millis() as u64,
            telemetry_url: None,
            telemetry_api_key: None,
            max_batch_size: crate::transport::DEFAULT_MAX_BATCH_SIZE,
            max_wait_ms: crate::transport::DEFAULT_MAX_WAIT.as_millis() as u64,
            write_failure_policy: WriteFailurePolicy::default(),
            checkpoint_policy: CheckpointPolicy::default(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stream_connection: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub store: HttpStoreOptions,
    pub inference_url: String,
    pub inference_timeout: Duration,
    pub telemetry_url: String,
    pub telemetry_api_key: String,
    pub receive: ReceiveOptions,
    pub orchestrator: OrchestratorOptions,
}

impl PipelineConfig {
    /// Checks every required value and reports all the missing ones together.
    pub fn validate(&self) -> Result<PipelineSettings, StartupError> {
        let required = [
            ("EVENT_HUB_CONNECTION_STR", &self.stream_connection),
            ("EVENT_HUB_NAME", &self.stream_name),
            ("COSMOS_DB_URI", &self.store_uri),
            ("COSMOS_DB_KEY", &self.store_key),
            ("ML_ENDPOINT_URL", &self.inference_url),
            ("DD_API_METRICS_URL", &self.telemetry_url),
            ("DD_API_KEY_HEADER", &self.telemetry_api_key),
        ];

        let names: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();

        if !names.is_empty() {
            return MissingConfigurationSnafu { names }.fail();
        }

        if self.max_batch_size == 0 {
            return InvalidConfigurationSnafu {
                name: "MAX_BATCH_SIZE",
                message: "must be greater than zero",
            }
            .fail();
        }

        if self.inference_timeout_ms == 0 {
            return InvalidConfigurationSnafu {
                name: "INFERENCE_TIMEOUT_MS",
                message: "must be greater than zero",
            }
            .fail();
        }

        let value = |v: &Option<String>| v.clone().unwrap_or_default();

        Ok(PipelineSettings {
            stream_connection: value(&self.stream_connection),
            stream_name: value(&self.stream_name),
            consumer_group: self.consumer_group.clone(),
            store: HttpStoreOptions {
                endpoint: value(&self.store_uri),
                key: value(&self.store_key),
                database: self.store_database.clone(),
                container: self.store_container.clone(),
            },
            inference_url: value(&self.inference_url),
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
            telemetry_url: value(&self.telemetry_url),
            telemetry_api_key: value(&self.telemetry_api_key),
            receive: ReceiveOptions {
                max_batch_size: self.max_batch_size,
                max_wait: Duration::from_millis(self.max_wait_ms),
            },
            orchestrator: OrchestratorOptions {
                write_failure_policy: self.write_failure_policy,
                checkpoint_policy: self.checkpoint_policy,
                environment: self.environment.clone(),
            },
        })
    }
}

/// Opens the clients described by the settings.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn stream_client(
        &self,
        settings: &PipelineSettings,
    ) -> Result<Arc<dyn StreamClient>, TransportError>;

    async fn store_client(
        &self,
        settings: &PipelineSettings,
    ) -> Result<Arc<dyn DocumentStore>, StoreError>;

    fn http_session(&self, settings: &PipelineSettings) -> Result<Client, reqwest::Error>;
}

/// Picks client implementations from the URI scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClientFactory;

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    async fn stream_client(
        &self,
        settings: &PipelineSettings,
    ) -> Result<Arc<dyn StreamClient>, TransportError> {
        let connection = settings.stream_connection.as_str();
        let url = Url::parse(connection).map_err(|_| {
            UnsupportedConnectionSnafu {
                uri: connection.to_string(),
            }
            .build()
        })?;

        match url.scheme() {
            "memory" => {
                let partitions = parse_partitions(&url)?.unwrap_or(1);
                Ok(Arc::new(InMemoryStream::new(&settings.stream_name, partitions)))
            }
            "file" => Ok(Arc::new(
                FileReplayStream::open(connection, &settings.stream_name).await?,
            )),
            _ => UnsupportedConnectionSnafu {
                uri: connection.to_string(),
            }
            .fail(),
        }
    }

    async fn store_client(
        &self,
        settings: &PipelineSettings,
    ) -> Result<Arc<dyn DocumentStore>, StoreError> {
        let endpoint = settings.store.endpoint.as_str();
        if endpoint.starts_with("memory://") {
            return Ok(Arc::new(InMemoryDocumentStore::new()));
        }

        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return InvalidEndpointSnafu {
                uri: endpoint.to_string(),
            }
            .fail();
        }

        let client = Client::builder().build().context(StoreRequestSnafu {})?;
        let store = HttpDocumentStore::new(client, settings.store.clone())?;
        Ok(Arc::new(store))
    }

    fn http_session(&self, _settings: &PipelineSettings) -> Result<Client, reqwest::Error> {
        Client::builder().build()
    }
}

/// The clients shared by every partition task.
///
/// Handles are `None` once closed by [`shutdown`].
pub struct SharedClients {
    pub stream: Option<Arc<dyn StreamClient>>,
    pub store: Option<Arc<dyn DocumentStore>>,
    pub http: Option<Client>,
    pub settings: PipelineSettings,
}

impl SharedClients {
    pub fn is_closed(&self) -> bool {
        self.stream.is_none() && self.store.is_none() && self.http.is_none()
    }
}

pub async fn initialize(
    config: &PipelineConfig,
    factory: &dyn ClientFactory,
) -> Result<SharedClients, StartupError> {
    let settings = config.validate()?;

    info!(stream = %settings.stream_name, consumer_group = %settings.consumer_group, "Initializing stream client");
    let stream = factory
        .stream_client(&settings)
        .await
        .context(StreamClientSnafu {})?;

    info!(
        database = %settings.store.database,
        container = %settings.store.container,
        "Initializing document store client"
    );
    let store = match factory.store_client(&settings).await {
        Ok(store) => store,
        Err(source) => {
            close_stream(stream.as_ref()).await;
            return Err(StartupError::StoreClient { source });
        }
    };

    info!("Initializing HTTP session");
    let http = match factory.http_session(&settings) {
        Ok(http) => http,
        Err(source) => {
            close_stream(stream.as_ref()).await;
            close_store(store.as_ref()).await;
            return Err(StartupError::HttpSession { source });
        }
    };

    info!("Clients initialized");

    Ok(SharedClients {
        stream: Some(stream),
        store: Some(store),
        http: Some(http),
        settings,
    })
}

/// Closes every open handle. Close errors are logged.
pub async fn shutdown(clients: &mut SharedClients) {
    if let Some(stream) = clients.stream.take() {
        info!("Closing stream client");
        close_stream(stream.as_ref()).await;
    }

    if let Some(store) = clients.store.take() {
        info!("Closing document store client");
        close_store(store.as_ref()).await;
    }

    if clients.http.take().is_some() {
        info!("Closing HTTP session");
    }
}

async fn close_stream(stream: &dyn StreamClient) {
    if let Err(err) = stream.close().await {
        warn!(error = %err, "Failed to close stream client");
    }
}

async fn close_store(store: &dyn DocumentStore) {
    if let Err(err) = store.close().await {
        warn!(error = %err, "Failed to close document store client");
    }
}
