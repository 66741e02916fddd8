use std::net::AddrParseError;

use iotwatch_observability::ObservabilityError;
use iotwatch_pipeline::{PipelineError, StartupError};
use snafu::Snafu;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Failed to start the pipeline"))]
    Startup { source: StartupError },
    #[snafu(display("Pipeline error"))]
    Pipeline { source: PipelineError },
    #[snafu(display("Invalid server address"))]
    InvalidServerUrl { source: AddrParseError },
    #[snafu(display("Malformed dataset row {line}: {message}"))]
    DatasetRow { line: usize, message: String },
    #[snafu(display("JSON serialization error"))]
    Json { source: serde_json::Error },
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
