//! Stream transport seams.
//!
//! A [`StreamClient`] delivers batches of [`RawEvent`]s per partition to a
//! [`BatchHandler`]. Delivery within one partition is sequential: the next
//! batch is handed over only after the handler returns. Partitions are
//! delivered concurrently.

pub mod file;
pub mod memory;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use self::file::FileReplayStream;
pub use self::memory::InMemoryStream;
use crate::error::{CheckpointError, PipelineError, TransportError};
use crate::event::RawEvent;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

/// Per partition view handed to the batch handler.
#[async_trait]
pub trait PartitionContext: Send + Sync {
    fn partition_id(&self) -> &str;

    /// Commits the read position of the partition up to and including `event`.
    async fn update_checkpoint(&self, event: &RawEvent) -> Result<(), CheckpointError>;
}

/// Receives the batches delivered by a [`StreamClient`].
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn on_event_batch(
        &self,
        partition: &dyn PartitionContext,
        events: Vec<RawEvent>,
    ) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Upper bound on the number of events per batch.
    pub max_batch_size: usize,
    /// How long to wait for the first event of a batch before polling again.
    pub max_wait: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Delivers batches to `handler` until `ct` is cancelled or the client is closed.
    ///
    /// Partitions start from their last checkpoint, or from the beginning of
    /// the stream if they have none. When the handler returns an error the
    /// partition waits `max_wait` and resumes from its last checkpoint.
    async fn receive_batch(
        &self,
        handler: Arc<dyn BatchHandler>,
        options: ReceiveOptions,
        ct: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Releases the client. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}
