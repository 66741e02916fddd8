//! In-memory partitioned stream.

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::{StreamExt, stream::FuturesUnordered};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{BatchHandler, PartitionContext, ReceiveOptions, StreamClient};
use crate::error::{
    CheckpointError, ClosedSnafu, InvalidOptionSnafu, StreamClosedSnafu, TransportError,
};
use crate::event::RawEvent;

/// A stream whose partitions are vectors of events held in memory.
///
/// Clones share the same partitions and checkpoints, so a test can keep a
/// handle to publish events and inspect checkpoints while a consumer runs.
#[derive(Debug, Clone)]
pub struct InMemoryStream {
    inner: Arc<StreamState>,
}

#[derive(Debug)]
struct StreamState {
    name: String,
    partition_ids: Vec<String>,
    events: DashMap<String, Vec<RawEvent>>,
    checkpoints: DashMap<String, i64>,
    next_partition: AtomicUsize,
    appended: Notify,
    closed: AtomicBool,
}

struct MemoryPartitionContext {
    state: Arc<StreamState>,
    partition_id: String,
}

impl InMemoryStream {
    pub fn new(name: impl Into<String>, partition_count: usize) -> Self {
        let partition_ids: Vec<String> = (0..partition_count.max(1)).map(|p| p.to_string()).collect();
        let events = partition_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        Self {
            inner: Arc::new(StreamState {
                name: name.into(),
                partition_ids,
                events,
                checkpoints: DashMap::new(),
                next_partition: AtomicUsize::new(0),
                appended: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn partition_ids(&self) -> &[String] {
        &self.inner.partition_ids
    }

    /// Appends an event, assigning partitions round robin.
    pub fn send(&self, body: impl Into<Bytes>) -> RawEvent {
        let count = self.inner.partition_ids.len();
        let index = self.inner.next_partition.fetch_add(1, Ordering::Relaxed) % count;
        self.append(index, body.into())
    }

    /// Appends an event to the partition selected by hashing `key`.
    pub fn send_with_key(&self, key: &str, body: impl Into<Bytes>) -> RawEvent {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.inner.partition_ids.len() as u64) as usize;
        self.append(index, body.into())
    }

    pub fn send_to(&self, partition_id: &str, body: impl Into<Bytes>) -> Result<RawEvent, TransportError> {
        let Some(index) = self.inner.partition_ids.iter().position(|p| p == partition_id) else {
            return InvalidOptionSnafu {
                name: "partition",
                message: format!("unknown partition {partition_id}"),
            }
            .fail();
        };

        Ok(self.append(index, body.into()))
    }

    /// Sequence number of the last checkpointed event of the partition.
    pub fn checkpoint(&self, partition_id: &str) -> Option<i64> {
        self.inner.checkpoints.get(partition_id).map(|seq| *seq)
    }

    pub fn events(&self, partition_id: &str) -> Vec<RawEvent> {
        self.inner
            .events
            .get(partition_id)
            .map(|events| events.value().clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn append(&self, index: usize, body: Bytes) -> RawEvent {
        let partition_id = &self.inner.partition_ids[index];
        let event = {
            let mut events = self.inner.events.entry(partition_id.clone()).or_default();
            let event = RawEvent::new(partition_id.clone(), events.len() as i64, body)
                .with_enqueued_time(Utc::now());
            events.push(event.clone());
            event
        };

        self.inner.appended.notify_waiters();
        event
    }
}

impl StreamState {
    fn read(&self, partition_id: &str, position: usize, max: usize) -> Vec<RawEvent> {
        self.events
            .get(partition_id)
            .map(|events| events.iter().skip(position).take(max).cloned().collect())
            .unwrap_or_default()
    }

    fn start_position(&self, partition_id: &str) -> usize {
        self.checkpoints
            .get(partition_id)
            .map(|seq| (*seq + 1).max(0) as usize)
            .unwrap_or(0)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PartitionContext for MemoryPartitionContext {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    async fn update_checkpoint(&self, event: &RawEvent) -> Result<(), CheckpointError> {
        if self.state.is_closed() {
            return StreamClosedSnafu {
                partition: self.partition_id.clone(),
            }
            .fail();
        }

        self.state
            .checkpoints
            .entry(self.partition_id.clone())
            .and_modify(|seq| *seq = (*seq).max(event.sequence_number))
            .or_insert(event.sequence_number);

        Ok(())
    }
}

async fn receive_partition(
    state: Arc<StreamState>,
    partition_id: String,
    handler: Arc<dyn BatchHandler>,
    options: ReceiveOptions,
    ct: CancellationToken,
) {
    let mut position = state.start_position(&partition_id);
    let context = MemoryPartitionContext {
        state: state.clone(),
        partition_id: partition_id.clone(),
    };

    debug!(partition = %partition_id, position, "Receiving partition");

    loop {
        if ct.is_cancelled() || state.is_closed() {
            break;
        }

        let appended = state.appended.notified();
        tokio::pin!(appended);
        appended.as_mut().enable();

        let batch = state.read(&partition_id, position, options.max_batch_size.max(1));
        if batch.is_empty() {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = &mut appended => {},
                _ = tokio::time::sleep(options.max_wait) => {},
            }
            continue;
        }

        position += batch.len();
        if let Err(err) = handler.on_event_batch(&context, batch).await {
            position = state.start_position(&partition_id);
            error!(
                partition = %partition_id,
                error = %err,
                resume_position = position,
                "Batch handler failed, redelivering from last checkpoint"
            );

            tokio::select! {
                _ = ct.cancelled() => break,
                _ = tokio::time::sleep(options.max_wait) => {},
            }
        }
    }

    debug!(partition = %partition_id, "Stopped receiving partition");
}

#[async_trait]
impl StreamClient for InMemoryStream {
    async fn receive_batch(
        &self,
        handler: Arc<dyn BatchHandler>,
        options: ReceiveOptions,
        ct: CancellationToken,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return ClosedSnafu {}.fail();
        }

        info!(
            stream = %self.inner.name,
            partitions = self.inner.partition_ids.len(),
            max_batch_size = options.max_batch_size,
            "Starting to receive events"
        );

        let mut partitions = self
            .inner
            .partition_ids
            .iter()
            .map(|partition_id| {
                receive_partition(
                    self.inner.clone(),
                    partition_id.clone(),
                    handler.clone(),
                    options,
                    ct.clone(),
                )
            })
            .collect::<FuturesUnordered<_>>();

        while partitions.next().await.is_some() {}

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.appended.notify_waiters();
        }
        Ok(())
    }
}
