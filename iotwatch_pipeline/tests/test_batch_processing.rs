mod common;

use std::sync::Arc;

use common::{event, orchestrator, reading_payload};
use iotwatch_pipeline::{
    CheckpointPolicy, DocumentStore, OrchestratorOptions, PipelineError, WriteFailurePolicy,
    inference::FALLBACK_ANOMALY_SCORE,
    test_utils::{RecordingPartition, ScriptedDocumentStore, StaticInferenceClient},
};

#[tokio::test]
async fn test_decode_failure_is_isolated() {
    let store = Arc::new(ScriptedDocumentStore::accepting());
    let partition = RecordingPartition::new("0");
    let orchestrator = orchestrator(
        Some(store.clone()),
        Arc::new(StaticInferenceClient::scoring(false, 0.12)),
        OrchestratorOptions::default(),
    );

    let mut bad = reading_payload(1, 2);
    bad["sensor_1"] = serde_json::json!("not-a-number");
    let events = vec![
        event(10, &reading_payload(1, 1)),
        event(11, &bad),
        event(12, &reading_payload(1, 3)),
    ];

    let report = orchestrator.process_batch(&partition, &events).await.unwrap();

    assert_eq!(report.received, 3);
    assert_eq!(report.decoded, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.written, 2);
    assert!(report.checkpointed);

    let written: Vec<_> = store.attempts().iter().map(|r| r.id.clone()).collect();
    assert_eq!(
        written,
        vec![
            "1.0-1.0-2025-06-01T10:00:01.000000-msg_1_1.0_1.0".to_string(),
            "1.0-3.0-2025-06-01T10:00:03.000000-msg_3_1.0_3.0".to_string(),
        ]
    );
    assert_eq!(partition.checkpoints(), vec![12]);
}

#[tokio::test]
async fn test_unreachable_classifier_stores_fallback() {
    let store = Arc::new(ScriptedDocumentStore::accepting());
    let partition = RecordingPartition::new("0");
    let classifier = Arc::new(StaticInferenceClient::unreachable());
    let orchestrator = orchestrator(
        Some(store.clone()),
        classifier.clone(),
        OrchestratorOptions::default(),
    );

    let events: Vec<_> = (0..5)
        .map(|i| event(i, &reading_payload(2, i as u32 + 1)))
        .collect();

    let report = orchestrator.process_batch(&partition, &events).await.unwrap();

    assert_eq!(classifier.calls(), 5);
    assert_eq!(report.fallbacks, 5);
    assert_eq!(report.written, 5);

    let upserted = store.attempts();
    assert_eq!(upserted.len(), 5);
    for record in &upserted {
        assert!(!record.is_anomaly);
        assert_eq!(record.anomaly_score, FALLBACK_ANOMALY_SCORE);
    }
    assert_eq!(partition.checkpoints(), vec![4]);
}

#[tokio::test]
async fn test_missing_store_does_not_checkpoint() {
    let partition = RecordingPartition::new("0");
    let classifier = Arc::new(StaticInferenceClient::scoring(true, 0.97));
    let orchestrator = orchestrator(None, classifier.clone(), OrchestratorOptions::default());

    let events = vec![event(0, &reading_payload(3, 1)), event(1, &reading_payload(3, 2))];

    let report = orchestrator.process_batch(&partition, &events).await.unwrap();

    assert_eq!(report.decoded, 2);
    assert_eq!(classifier.calls(), 2);
    assert!(!report.checkpointed);
    assert!(partition.checkpoints().is_empty());
}

#[tokio::test]
async fn test_failed_write_still_checkpoints() {
    let store = Arc::new(ScriptedDocumentStore::always_failing());
    let partition = RecordingPartition::new("0");
    let orchestrator = orchestrator(
        Some(store.clone()),
        Arc::new(StaticInferenceClient::scoring(false, 0.3)),
        OrchestratorOptions::default(),
    );

    let events = vec![event(7, &reading_payload(4, 1)), event(8, &reading_payload(4, 2))];

    let report = orchestrator.process_batch(&partition, &events).await.unwrap();

    assert_eq!(report.written, 0);
    assert_eq!(report.write_failures, 2);
    assert!(report.checkpointed);
    assert_eq!(partition.checkpoints(), vec![8]);
}

#[tokio::test]
async fn test_abort_policy_stops_after_first_failed_write() {
    let store = Arc::new(ScriptedDocumentStore::always_failing());
    let partition = RecordingPartition::new("0");
    let orchestrator = orchestrator(
        Some(store.clone()),
        Arc::new(StaticInferenceClient::scoring(false, 0.3)),
        OrchestratorOptions {
            write_failure_policy: WriteFailurePolicy::Abort,
            ..Default::default()
        },
    );

    let events: Vec<_> = (0..3).map(|i| event(i, &reading_payload(5, i as u32))).collect();

    let report = orchestrator.process_batch(&partition, &events).await.unwrap();

    assert_eq!(store.attempts().len(), 1);
    assert_eq!(report.write_failures, 1);
    assert!(report.checkpointed);
}

#[tokio::test]
async fn test_require_full_write_leaves_batch_uncommitted() {
    let store = Arc::new(ScriptedDocumentStore::always_failing());
    let partition = RecordingPartition::new("0");
    let orchestrator = orchestrator(
        Some(store),
        Arc::new(StaticInferenceClient::scoring(false, 0.3)),
        OrchestratorOptions {
            checkpoint_policy: CheckpointPolicy::RequireFullWrite,
            ..Default::default()
        },
    );

    let events = vec![event(0, &reading_payload(6, 1))];

    let report = orchestrator.process_batch(&partition, &events).await.unwrap();

    assert!(!report.checkpointed);
    assert!(partition.checkpoints().is_empty());
}

#[tokio::test]
async fn test_checkpoint_failure_propagates() {
    let store = Arc::new(ScriptedDocumentStore::accepting());
    let partition = RecordingPartition::failing("0");
    let orchestrator = orchestrator(
        Some(store.clone()),
        Arc::new(StaticInferenceClient::scoring(false, 0.3)),
        OrchestratorOptions::default(),
    );

    let events = vec![event(0, &reading_payload(7, 1))];

    let err = orchestrator.process_batch(&partition, &events).await.unwrap_err();

    assert!(matches!(err, PipelineError::Checkpoint { .. }));
    assert_eq!(store.inner().len(), 1);
}

#[tokio::test]
async fn test_redelivery_overwrites_records() {
    let store = Arc::new(ScriptedDocumentStore::accepting());
    let partition = RecordingPartition::new("0");
    let orchestrator = orchestrator(
        Some(store.clone()),
        Arc::new(StaticInferenceClient::scoring(true, 0.8)),
        OrchestratorOptions::default(),
    );

    let events: Vec<_> = (0..3).map(|i| event(i, &reading_payload(8, i as u32))).collect();

    orchestrator.process_batch(&partition, &events).await.unwrap();
    orchestrator.process_batch(&partition, &events).await.unwrap();

    assert_eq!(store.attempts().len(), 6);
    assert_eq!(store.inner().len(), 3);
    assert_eq!(partition.checkpoints(), vec![2, 2]);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_persisted_document_shape() {
    let store = Arc::new(ScriptedDocumentStore::accepting());
    let partition = RecordingPartition::new("0");
    let orchestrator = orchestrator(
        Some(store.clone()),
        Arc::new(StaticInferenceClient::scoring(true, 0.91)),
        OrchestratorOptions::default(),
    );

    let mut payload = reading_payload(9, 4);
    payload["raw_message_id"] = serde_json::json!("raw-1");
    payload["raw_data_sample"] = serde_json::json!({"unit_number": 9.0});
    payload["sensor_2_value"] = serde_json::json!(641.82);

    orchestrator
        .process_batch(&partition, &[event(0, &payload)])
        .await
        .unwrap();

    let id = "9.0-4.0-2025-06-01T10:00:04.000000-msg_4_9.0_4.0";
    let doc = store.inner().get(id).unwrap();
    assert_eq!(doc.partition_key, "9.0");
    assert_eq!(doc.body["id"], id);
    assert_eq!(doc.body["is_anomaly"], true);
    assert_eq!(doc.body["anomaly_score"], 0.91);
    assert_eq!(doc.body["sensor_3"], 1589.7);
    for excluded in ["raw_message_id", "raw_data_sample", "sensor_2_value"] {
        assert!(doc.body.get(excluded).is_none(), "{excluded} persisted");
    }
}
