#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use iotwatch_pipeline::{
    BatchOrchestrator, DocumentStore, InMemoryDocumentStore, InferenceGateway,
    OrchestratorOptions, TelemetryClient, test_utils::StaticInferenceClient,
};
use iotwatch_trigger_http::{TRIGGER_ROUTE, TriggerAdapter};
use serde_json::Value;
use tower::ServiceExt;

pub fn router(store: Option<InMemoryDocumentStore>) -> Router {
    let store = store.map(|s| Arc::new(s) as Arc<dyn DocumentStore>);
    let gateway = InferenceGateway::new(Arc::new(StaticInferenceClient::scoring(true, 0.93)));
    let orchestrator = BatchOrchestrator::new(
        store,
        gateway,
        TelemetryClient::disabled(),
        OrchestratorOptions::default(),
    );
    TriggerAdapter::new(Arc::new(orchestrator)).into_router()
}

pub fn reading(unit: u32, cycle: u32) -> Value {
    serde_json::json!({
        "unit_number": unit as f64,
        "time_in_cycles": cycle as f64,
        "sensor_1": 518.67,
        "sensor_2": 641.82,
        "message_id": format!("msg_{cycle}_{unit}_{cycle}"),
        "event_timestamp": "2025-06-01T10:00:00",
    })
}

pub async fn invoke(router: Router, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(TRIGGER_ROUTE)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}
