use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::{Json as JsonExtractor, extract::State, http::StatusCode, response::Json};
use iotwatch_pipeline::{CheckpointError, PartitionContext, RawEvent};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::TriggerState;
use crate::error::{Result, TriggerError};
use crate::types::{EVENTS_BINDING, ErrorResponse, InvocationRequest, InvocationResponse};

/// Partition used when the host does not send a partition context.
pub const UNKNOWN_PARTITION: &str = "0";

/// Handler for the /api/ConsumeEventHubData endpoint.
pub async fn invoke_handler(
    State(state): State<TriggerState>,
    JsonExtractor(request): JsonExtractor<InvocationRequest>,
) -> impl IntoResponse {
    match process_invocation(&state, request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => map_error_to_response(err),
    }
}

/// Runs one host-delivered batch through the orchestrator.
async fn process_invocation(
    state: &TriggerState,
    request: InvocationRequest,
) -> Result<InvocationResponse> {
    let partition_id = request
        .metadata
        .partition_context
        .as_ref()
        .and_then(|ctx| ctx.partition_id.clone())
        .unwrap_or_else(|| UNKNOWN_PARTITION.to_string());

    let bodies = event_bodies(&request.data)?;
    let sequence_numbers = &request.metadata.sequence_number_array;

    let events: Vec<RawEvent> = bodies
        .into_iter()
        .enumerate()
        .map(|(index, body)| {
            let sequence_number = sequence_numbers
                .get(index)
                .copied()
                .unwrap_or(index as i64);
            let mut event = RawEvent::new(partition_id.clone(), sequence_number, body);
            if let Some(offset) = request.metadata.offset_array.get(index) {
                event.offset = offset.clone();
            }
            event
        })
        .collect();

    let partition = HostManagedPartition::new(partition_id.clone());
    let report = state.orchestrator.process_batch(&partition, &events).await?;

    info!(
        partition = %report.partition_id,
        received = report.received,
        written = report.written,
        skipped = report.skipped,
        "Invocation completed"
    );

    let logs = vec![format!(
        "Processed {} events on partition {}: {} written, {} skipped, {} fallbacks",
        report.received, report.partition_id, report.written, report.skipped, report.fallbacks
    )];

    Ok(InvocationResponse {
        outputs: Map::new(),
        logs,
        return_value: Some(report),
    })
}

/// Extracts the raw event bodies from the `events` binding.
///
/// The host sends either an array of events, a JSON string encoding that
/// array, or a single event.
fn event_bodies(data: &Map<String, Value>) -> Result<Vec<String>> {
    let binding = data
        .get(EVENTS_BINDING)
        .ok_or_else(|| TriggerError::BadRequest {
            message: format!("missing `{EVENTS_BINDING}` binding"),
        })?;

    let bodies = match binding {
        Value::Array(items) => items.iter().map(body_of).collect(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items.iter().map(body_of).collect(),
            _ => vec![text.clone()],
        },
        Value::Null => {
            return Err(TriggerError::BadRequest {
                message: format!("`{EVENTS_BINDING}` binding is null"),
            });
        }
        other => vec![other.to_string()],
    };

    Ok(bodies)
}

fn body_of(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Partition view for host-triggered batches. The host commits checkpoints
/// itself once the invocation returns successfully.
pub struct HostManagedPartition {
    partition_id: String,
}

impl HostManagedPartition {
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
        }
    }
}

#[async_trait]
impl PartitionContext for HostManagedPartition {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    async fn update_checkpoint(&self, event: &RawEvent) -> Result<(), CheckpointError> {
        debug!(
            partition = %self.partition_id,
            sequence_number = event.sequence_number,
            "Checkpoint left to the host"
        );
        Ok(())
    }
}

fn map_error_to_response(error: TriggerError) -> Response {
    let status_code = match error {
        TriggerError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        TriggerError::Pipeline { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let response = Json(ErrorResponse {
        message: error.to_string(),
    });

    (status_code, response).into_response()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(binding: Value) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(EVENTS_BINDING.to_string(), binding);
        data
    }

    #[test]
    fn test_event_bodies_from_array() {
        let bodies = event_bodies(&data(json!([{"unit_number": 1.0}, "{\"unit_number\": 2.0}"])))
            .unwrap();
        assert_eq!(bodies, vec!["{\"unit_number\":1.0}", "{\"unit_number\": 2.0}"]);
    }

    #[test]
    fn test_event_bodies_from_encoded_array() {
        let bodies = event_bodies(&data(json!("[{\"a\":1},{\"a\":2}]"))).unwrap();
        assert_eq!(bodies, vec!["{\"a\":1}", "{\"a\":2}"]);
    }

    #[test]
    fn test_event_bodies_single_event() {
        let bodies = event_bodies(&data(json!({"a": 1}))).unwrap();
        assert_eq!(bodies, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_event_bodies_missing_binding() {
        let err = event_bodies(&Map::new()).unwrap_err();
        assert!(matches!(err, TriggerError::BadRequest { .. }));
    }
}
