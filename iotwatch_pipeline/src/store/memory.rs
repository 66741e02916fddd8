//! In-memory document store.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use snafu::ResultExt;

use super::{ClosedSnafu, DocumentStore, SerializeSnafu, StoreError};
use crate::record::PersistedRecord;

/// A stored document together with its partition key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub partition_key: String,
    pub body: Value,
}

/// Document store that keeps documents in a concurrent map.
///
/// Clones share the same documents. Intended for development and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<DashMap<String, StoredDocument>>,
    upserts: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<StoredDocument> {
        self.documents.get(id).map(|doc| doc.value().clone())
    }

    /// Number of distinct documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of upsert calls that succeeded, including overwrites.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.documents.iter().map(|doc| doc.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        if self.is_closed() {
            return ClosedSnafu {}.fail();
        }

        let body = serde_json::to_value(record).context(SerializeSnafu {
            id: record.id.clone(),
        })?;

        self.documents.insert(
            record.id.clone(),
            StoredDocument {
                partition_key: record.partition_key(),
                body,
            },
        );
        self.upserts.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceResult;
    use crate::reading::SensorReading;
    use crate::record::assemble;

    fn record(sensor: f64) -> PersistedRecord {
        let payload = serde_json::json!({
            "unit_number": 4, "time_in_cycles": 10, "message_id": "m", "sensor_1": sensor
        });
        let reading = SensorReading::from_json_str(&payload.to_string()).unwrap();
        assemble(reading, InferenceResult::remote(false, 0.1))
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let store = InMemoryDocumentStore::new();

        store.upsert(&record(1.0)).await.unwrap();
        store.upsert(&record(2.0)).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.upsert_count(), 2);
        let doc = store.get("4-10-None-m").unwrap();
        assert_eq!(doc.partition_key, "4");
        assert_eq!(doc.body["sensor_1"], serde_json::json!(2.0));
    }

    #[tokio::test]
    async fn test_upsert_after_close_fails() {
        let store = InMemoryDocumentStore::new();

        store.close().await.unwrap();
        store.close().await.unwrap();

        let err = store.upsert(&record(1.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
        assert!(store.is_empty());
    }
}
