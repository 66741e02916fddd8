#![allow(dead_code)]

use std::sync::Arc;

use iotwatch_pipeline::{
    BatchOrchestrator, DocumentStore, InferenceClient, InferenceGateway, OrchestratorOptions,
    RawEvent, TelemetryClient,
};

pub fn reading_payload(unit: u32, cycle: u32) -> serde_json::Value {
    serde_json::json!({
        "unit_number": unit as f64,
        "time_in_cycles": cycle as f64,
        "setting_1": -0.0007,
        "setting_2": -0.0004,
        "sensor_1": 518.67,
        "sensor_2": 641.82,
        "sensor_3": 1589.7,
        "message_id": format!("msg_{cycle}_{unit}.0_{cycle}.0"),
        "event_timestamp": format!("2025-06-01T10:00:{:02}.000000", cycle % 60),
    })
}

pub fn event(sequence_number: i64, payload: &serde_json::Value) -> RawEvent {
    RawEvent::new("0", sequence_number, payload.to_string())
}

pub fn orchestrator(
    store: Option<Arc<dyn DocumentStore>>,
    classifier: Arc<dyn InferenceClient>,
    options: OrchestratorOptions,
) -> BatchOrchestrator {
    BatchOrchestrator::new(
        store,
        InferenceGateway::new(classifier),
        TelemetryClient::disabled(),
        options,
    )
}
