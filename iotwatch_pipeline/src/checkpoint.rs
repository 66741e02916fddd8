use std::fmt;

use clap::ValueEnum;
use tracing::debug;

use crate::error::CheckpointError;
use crate::event::RawEvent;
use crate::transport::PartitionContext;
use crate::writer::WriteOutcome;

/// When a batch's read position is committed after a write attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CheckpointPolicy {
    /// Commit after every attempted write, even a failed one. Failed records
    /// are not redelivered (at-most-once).
    #[default]
    Always,
    /// Commit only when every record of the batch was written. A failed batch
    /// is redelivered (at-least-once).
    RequireFullWrite,
}

impl CheckpointPolicy {
    pub fn should_commit(&self, outcome: &WriteOutcome) -> bool {
        match self {
            Self::Always => true,
            Self::RequireFullWrite => outcome.is_complete(),
        }
    }
}

impl fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::RequireFullWrite => write!(f, "require-full-write"),
        }
    }
}

/// Advances the partition's read position to `last`. Errors are not handled here.
pub async fn commit(partition: &dyn PartitionContext, last: &RawEvent) -> Result<(), CheckpointError> {
    partition.update_checkpoint(last).await?;

    debug!(
        partition = partition.partition_id(),
        sequence_number = last.sequence_number,
        offset = %last.offset,
        "Checkpoint committed"
    );

    Ok(())
}
