use iotwatch_pipeline::PipelineError;
use thiserror::Error;

/// Errors that can occur while handling a trigger invocation.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("pipeline error: {source}")]
    Pipeline {
        #[from]
        source: PipelineError,
    },
}

pub type Result<T, E = TriggerError> = std::result::Result<T, E>;
