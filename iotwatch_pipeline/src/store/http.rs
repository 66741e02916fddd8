//! Generic REST document store client.
//!
//! Documents are upserted with `POST {endpoint}/dbs/{database}/colls/{container}/docs`.
//! The partition key is sent as a JSON array in a header and the configured key
//! verbatim in the `api-key` header. This suits gateways and emulators that
//! accept static key auth. It does not compute the per-request HMAC
//! authorization token a managed document database account requires; such an
//! account must be reached through a gateway that adds it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use reqwest::{Client, Url};
use snafu::ResultExt;

use super::{ClosedSnafu, DocumentStore, InvalidEndpointSnafu, RequestSnafu, StatusSnafu, StoreError};
use crate::record::PersistedRecord;

pub const UPSERT_HEADER: &str = "x-ms-documentdb-is-upsert";
pub const PARTITION_KEY_HEADER: &str = "x-ms-documentdb-partitionkey";
pub const API_KEY_HEADER: &str = "api-key";

pub const DEFAULT_DATABASE: &str = "iot-sensor-db";
pub const DEFAULT_CONTAINER: &str = "anomalies";

#[derive(Debug, Clone)]
pub struct HttpStoreOptions {
    pub endpoint: String,
    pub key: String,
    pub database: String,
    pub container: String,
}

#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: Client,
    documents_url: Url,
    key: String,
    closed: Arc<AtomicBool>,
}

impl HttpDocumentStore {
    pub fn new(client: Client, options: HttpStoreOptions) -> Result<Self, StoreError> {
        let endpoint = options.endpoint.trim_end_matches('/');
        let documents_url = Url::parse(&format!(
            "{endpoint}/dbs/{}/colls/{}/docs",
            options.database, options.container
        ))
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .ok_or_else(|| {
            InvalidEndpointSnafu {
                uri: options.endpoint.clone(),
            }
            .build()
        })?;

        Ok(Self {
            client,
            documents_url,
            key: options.key,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn documents_url(&self) -> &Url {
        &self.documents_url
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn upsert(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return ClosedSnafu {}.fail();
        }

        let partition_key = serde_json::json!([record.reading.unit_number]).to_string();

        let response = self
            .client
            .post(self.documents_url.clone())
            .header(UPSERT_HEADER, "true")
            .header(PARTITION_KEY_HEADER, partition_key)
            .header(API_KEY_HEADER, &self.key)
            .json(record)
            .send()
            .await
            .context(RequestSnafu {})?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        StatusSnafu { status, message }.fail()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
