use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Maximum number of payload characters included in log lines.
pub const BODY_PREVIEW_CHARS: usize = 200;

/// An event as delivered by the stream transport.
///
/// The payload is opaque at this level; decoding happens in
/// [`SensorReading::decode`](crate::SensorReading::decode).
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// The partition the event was read from.
    pub partition_id: String,
    /// Position of the event within its partition.
    pub sequence_number: i64,
    /// Transport specific offset token, used when committing checkpoints.
    pub offset: String,
    /// When the transport accepted the event, if known.
    pub enqueued_time: Option<DateTime<Utc>>,
    /// The payload.
    pub body: Bytes,
}

impl RawEvent {
    pub fn new(partition_id: impl Into<String>, sequence_number: i64, body: impl Into<Bytes>) -> Self {
        Self {
            partition_id: partition_id.into(),
            sequence_number,
            offset: sequence_number.to_string(),
            enqueued_time: None,
            body: body.into(),
        }
    }

    pub fn with_enqueued_time(mut self, enqueued_time: DateTime<Utc>) -> Self {
        self.enqueued_time = Some(enqueued_time);
        self
    }

    pub fn body_as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// A lossy, truncated rendering of the payload for log lines.
    pub fn body_preview(&self) -> String {
        String::from_utf8_lossy(&self.body)
            .chars()
            .take(BODY_PREVIEW_CHARS)
            .collect()
    }
}
