use snafu::Snafu;

use crate::store::StoreError;

/// Errors raised while turning a raw event payload into a sensor reading.
///
/// These are isolated to a single event: the orchestrator logs them and moves
/// on to the next event in the batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    #[snafu(display("payload is not valid UTF-8"))]
    InvalidUtf8 { source: std::str::Utf8Error },
    #[snafu(display("payload is not valid JSON"))]
    InvalidJson { source: serde_json::Error },
    #[snafu(display("payload is not a JSON object"))]
    NotAnObject,
    #[snafu(display("missing required field {field}"))]
    MissingField { field: &'static str },
    #[snafu(display("field {field} is not numeric: {value}"))]
    NonNumericField { field: String, value: String },
}

/// Errors from the transport's offset commit.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    #[snafu(display("failed to commit checkpoint for partition {partition}: {message}"))]
    Commit { partition: String, message: String },
    #[snafu(display("stream client is closed, cannot checkpoint partition {partition}"))]
    StreamClosed { partition: String },
}

/// Errors from the stream transport.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("unsupported stream connection string {uri}"))]
    UnsupportedConnection { uri: String },
    #[snafu(display("invalid stream option {name}: {message}"))]
    InvalidOption { name: &'static str, message: String },
    #[snafu(display("failed to read events from {path}"))]
    ReadEvents {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("stream client is closed"))]
    Closed,
}

/// Errors that prevent the pipeline from starting.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StartupError {
    #[snafu(display("missing configuration values: {}", names.join(", ")))]
    MissingConfiguration { names: Vec<&'static str> },
    #[snafu(display("invalid configuration value {name}: {message}"))]
    InvalidConfiguration { name: &'static str, message: String },
    #[snafu(display("failed to create stream client"))]
    StreamClient { source: TransportError },
    #[snafu(display("failed to create document store client"))]
    StoreClient { source: StoreError },
    #[snafu(display("failed to create HTTP session"))]
    HttpSession { source: reqwest::Error },
}

/// Errors that stop a delivered batch or the consumer itself.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("checkpoint failed"))]
    Checkpoint { source: CheckpointError },
    #[snafu(display("stream transport failed"))]
    Transport { source: TransportError },
    #[snafu(display("{name} client is not available"))]
    MissingClient { name: &'static str },
    #[snafu(display("batch on partition {partition} left uncommitted: {reason}"))]
    Uncommitted {
        partition: String,
        reason: &'static str,
    },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
