//! Keyed document store used to persist classified readings.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use reqwest::StatusCode;
use snafu::Snafu;

pub use self::http::{HttpDocumentStore, HttpStoreOptions};
pub use self::memory::InMemoryDocumentStore;
use crate::record::PersistedRecord;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("document store request failed"))]
    Request { source: reqwest::Error },
    #[snafu(display("document store returned status {status}: {message}"))]
    Status { status: StatusCode, message: String },
    #[snafu(display("invalid document store endpoint {uri}"))]
    InvalidEndpoint { uri: String },
    #[snafu(display("document {id} rejected: {message}"))]
    Rejected { id: String, message: String },
    #[snafu(display("failed to serialize document {id}"))]
    Serialize {
        id: String,
        source: serde_json::Error,
    },
    #[snafu(display("document store client is closed"))]
    Closed,
}

/// Upsert-by-id document storage.
///
/// Implementations are shared by every partition task and must accept
/// concurrent calls.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts the record or replaces the document with the same id.
    async fn upsert(&self, record: &PersistedRecord) -> Result<(), StoreError>;

    /// Releases the client. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), StoreError>;
}
