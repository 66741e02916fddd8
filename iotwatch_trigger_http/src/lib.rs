//! HTTP trigger adapter.
//!
//! Serves the `/api/ConsumeEventHubData` endpoint a function host calls with
//! each event batch it receives. The batch is handed to the same
//! [`BatchOrchestrator`] the stream consumer uses; checkpoints are left to
//! the host.

pub mod error;
pub mod invoke;
pub mod types;

use std::sync::Arc;

use axum::{Router, routing::post};
use iotwatch_pipeline::BatchOrchestrator;

pub use error::{Result, TriggerError};
pub use invoke::HostManagedPartition;
pub use types::{InvocationRequest, InvocationResponse};

use crate::invoke::invoke_handler;

pub const TRIGGER_ROUTE: &str = "/api/ConsumeEventHubData";

/// HTTP server that receives host-delivered batches via POST requests.
pub struct TriggerAdapter {
    state: TriggerState,
}

#[derive(Clone)]
pub struct TriggerState {
    orchestrator: Arc<BatchOrchestrator>,
}

impl TriggerAdapter {
    pub fn new(orchestrator: Arc<BatchOrchestrator>) -> Self {
        let state = TriggerState { orchestrator };
        Self { state }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .route(TRIGGER_ROUTE, post(invoke_handler))
            .with_state(self.state)
    }
}
