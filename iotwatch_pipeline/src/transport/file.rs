//! Replays a JSON-lines file as a partitioned stream.
//!
//! Connection strings look like `file:///data/readings.jsonl?partitions=4`.
//! Each non-empty line becomes one event. Lines are routed by their
//! `unit_number` so that every unit keeps its order within one partition.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{BatchHandler, InMemoryStream, ReceiveOptions, StreamClient};
use crate::error::{InvalidOptionSnafu, ReadEventsSnafu, TransportError, UnsupportedConnectionSnafu};
use crate::reading::UNIT_NUMBER;

pub const DEFAULT_REPLAY_PARTITIONS: usize = 2;

#[derive(Debug, Clone)]
pub struct FileReplayStream {
    stream: InMemoryStream,
}

impl FileReplayStream {
    /// Loads every line of the file referenced by a `file://` connection string.
    pub async fn open(connection: &str, name: &str) -> Result<Self, TransportError> {
        let (path, partitions) = parse_connection(connection)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .context(ReadEventsSnafu {
                path: path.display().to_string(),
            })?;

        let stream = InMemoryStream::new(name, partitions);
        let mut count = 0;
        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            stream.send_with_key(&partition_key(line), line.to_string());
            count += 1;
        }

        info!(path = %path.display(), events = count, partitions, "Loaded events for replay");

        Ok(Self { stream })
    }

    /// The in-memory stream holding the replayed events and their checkpoints.
    pub fn stream(&self) -> &InMemoryStream {
        &self.stream
    }
}

#[async_trait]
impl StreamClient for FileReplayStream {
    async fn receive_batch(
        &self,
        handler: Arc<dyn BatchHandler>,
        options: ReceiveOptions,
        ct: CancellationToken,
    ) -> Result<(), TransportError> {
        self.stream.receive_batch(handler, options, ct).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.stream.close().await
    }
}

fn parse_connection(connection: &str) -> Result<(PathBuf, usize), TransportError> {
    let url = Url::parse(connection)
        .ok()
        .filter(|url| url.scheme() == "file")
        .ok_or_else(|| {
            UnsupportedConnectionSnafu {
                uri: connection.to_string(),
            }
            .build()
        })?;

    let path = url.to_file_path().map_err(|_| {
        UnsupportedConnectionSnafu {
            uri: connection.to_string(),
        }
        .build()
    })?;

    let partitions = parse_partitions(&url)?.unwrap_or(DEFAULT_REPLAY_PARTITIONS);

    Ok((path, partitions))
}

/// Reads the optional `partitions` query parameter.
pub(crate) fn parse_partitions(url: &Url) -> Result<Option<usize>, TransportError> {
    let Some((_, value)) = url.query_pairs().find(|(key, _)| key == "partitions") else {
        return Ok(None);
    };

    match value.parse::<usize>() {
        Ok(count) if count > 0 => Ok(Some(count)),
        _ => InvalidOptionSnafu {
            name: "partitions",
            message: format!("expected a positive integer, got {value}"),
        }
        .fail(),
    }
}

fn partition_key(line: &str) -> String {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|value| value.get(UNIT_NUMBER).map(Value::to_string))
        .unwrap_or_default()
}
