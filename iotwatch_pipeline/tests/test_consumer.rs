mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::reading_payload;
use iotwatch_pipeline::{
    CheckpointPolicy, ClientFactory, DocumentStore, InMemoryDocumentStore, InMemoryStream,
    Pipeline, PipelineConfig, PipelineSettings, StoreError, StreamClient, TransportError,
    initialize, shutdown,
    test_utils::{RecordingSink, ScriptedDocumentStore, StaticInferenceClient},
};
use tokio_util::sync::CancellationToken;

struct SharedFactory {
    stream: InMemoryStream,
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl ClientFactory for SharedFactory {
    async fn stream_client(
        &self,
        _: &PipelineSettings,
    ) -> Result<Arc<dyn StreamClient>, TransportError> {
        Ok(Arc::new(self.stream.clone()))
    }

    async fn store_client(
        &self,
        _: &PipelineSettings,
    ) -> Result<Arc<dyn DocumentStore>, StoreError> {
        Ok(self.store.clone())
    }

    fn http_session(&self, _: &PipelineSettings) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder().build()
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        stream_connection: Some("memory://".to_string()),
        stream_name: Some("iot-sensor-data-stream".to_string()),
        store_uri: Some("memory://".to_string()),
        store_key: Some("key".to_string()),
        inference_url: Some("http://127.0.0.1:8000/predict".to_string()),
        telemetry_url: Some("http://127.0.0.1:8001/api/v1/series".to_string()),
        telemetry_api_key: Some("dd-key".to_string()),
        max_wait_ms: 20,
        ..Default::default()
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached");
}

fn fully_checkpointed(stream: &InMemoryStream) -> bool {
    stream.partition_ids().iter().all(|partition| {
        let last = stream.events(partition).last().map(|e| e.sequence_number);
        stream.checkpoint(partition) == last
    })
}

#[tokio::test]
async fn test_consumer_processes_all_partitions() {
    let stream = InMemoryStream::new("iot-sensor-data-stream", 2);
    let store = InMemoryDocumentStore::new();
    let factory = SharedFactory {
        stream: stream.clone(),
        store: Arc::new(store.clone()),
    };

    for unit in 1..=2 {
        for cycle in 1..=3 {
            stream.send_with_key(
                &unit.to_string(),
                reading_payload(unit, cycle).to_string(),
            );
        }
    }
    stream.send_to("0", "{\"unit_number\": \"broken\"").unwrap();

    let mut clients = initialize(&config(), &factory).await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Pipeline::with_clients(&clients, Arc::new(StaticInferenceClient::scoring(false, 0.05)), sink.clone());

    let ct = CancellationToken::new();
    let task = tokio::spawn(pipeline.run(
        clients.stream.clone().unwrap(),
        clients.settings.receive,
        ct.clone(),
    ));

    wait_until(|| fully_checkpointed(&stream)).await;
    ct.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(store.len(), 6);

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 6);
    assert!(payloads.iter().all(|p| p.series.len() == 2));

    shutdown(&mut clients).await;
    assert!(stream.is_closed());
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_consumer_resumes_from_checkpoint() {
    let stream = InMemoryStream::new("iot-sensor-data-stream", 1);
    let store = InMemoryDocumentStore::new();
    let factory = SharedFactory {
        stream: stream.clone(),
        store: Arc::new(store.clone()),
    };

    for cycle in 1..=2 {
        stream.send(reading_payload(1, cycle).to_string());
    }

    let clients = initialize(&config(), &factory).await.unwrap();
    let classifier = Arc::new(StaticInferenceClient::scoring(false, 0.05));

    let ct = CancellationToken::new();
    let pipeline = Pipeline::with_clients(&clients, classifier.clone(), Arc::new(RecordingSink::default()));
    let task = tokio::spawn(pipeline.run(
        clients.stream.clone().unwrap(),
        clients.settings.receive,
        ct.clone(),
    ));
    wait_until(|| stream.checkpoint("0") == Some(1)).await;
    ct.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(stream.checkpoint("0"), Some(1));

    stream.send(reading_payload(1, 3).to_string());

    let ct = CancellationToken::new();
    let pipeline = Pipeline::with_clients(&clients, classifier.clone(), Arc::new(RecordingSink::default()));
    let task = tokio::spawn(pipeline.run(
        clients.stream.clone().unwrap(),
        clients.settings.receive,
        ct.clone(),
    ));
    wait_until(|| stream.checkpoint("0") == Some(2)).await;
    ct.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(classifier.calls(), 3);
    assert_eq!(store.upsert_count(), 3);
    assert_eq!(stream.checkpoint("0"), Some(2));
}

#[tokio::test]
async fn test_require_full_write_redelivers_failed_batch() {
    let stream = InMemoryStream::new("iot-sensor-data-stream", 1);
    let store = Arc::new(ScriptedDocumentStore::failing_first(1));
    let factory = SharedFactory {
        stream: stream.clone(),
        store: store.clone(),
    };

    for cycle in 1..=2 {
        stream.send(reading_payload(1, cycle).to_string());
    }

    let config = PipelineConfig {
        max_batch_size: 1,
        checkpoint_policy: CheckpointPolicy::RequireFullWrite,
        ..config()
    };
    let clients = initialize(&config, &factory).await.unwrap();
    let pipeline = Pipeline::with_clients(
        &clients,
        Arc::new(StaticInferenceClient::scoring(false, 0.05)),
        Arc::new(RecordingSink::default()),
    );

    let ct = CancellationToken::new();
    let task = tokio::spawn(pipeline.run(
        clients.stream.clone().unwrap(),
        clients.settings.receive,
        ct.clone(),
    ));
    wait_until(|| stream.checkpoint("0") == Some(1)).await;
    ct.cancel();
    task.await.unwrap().unwrap();

    let attempted: Vec<_> = store.attempts().iter().map(|r| r.id.clone()).collect();
    let first = "1.0-1.0-2025-06-01T10:00:01.000000-msg_1_1.0_1.0".to_string();
    let second = "1.0-2.0-2025-06-01T10:00:02.000000-msg_2_1.0_2.0".to_string();
    assert_eq!(attempted, vec![first.clone(), first.clone(), second.clone()]);

    let mut stored = store.inner().ids();
    stored.sort();
    assert_eq!(stored, vec![first, second]);
}
