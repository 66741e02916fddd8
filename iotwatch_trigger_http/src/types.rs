//! Invocation payloads exchanged with the function host.
//!
//! The host posts `{"Data": {...}, "Metadata": {...}}` and expects
//! `{"Outputs": {...}, "Logs": [...], "ReturnValue": ...}` back.

use iotwatch_pipeline::BatchReport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the binding carrying the event batch.
pub const EVENTS_BINDING: &str = "events";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationRequest {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: InvocationMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationMetadata {
    #[serde(default)]
    pub partition_context: Option<HostPartitionContext>,
    #[serde(default)]
    pub sequence_number_array: Vec<i64>,
    #[serde(default)]
    pub offset_array: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostPartitionContext {
    #[serde(default)]
    pub event_hub_name: Option<String>,
    #[serde(default)]
    pub consumer_group: Option<String>,
    #[serde(default)]
    pub partition_id: Option<String>,
}

/// Only ever sent back to the host, so it is not deserializable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationResponse {
    pub outputs: Map<String, Value>,
    pub logs: Vec<String>,
    pub return_value: Option<BatchReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
}
