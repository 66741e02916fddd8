use serde::Serialize;

use crate::inference::InferenceResult;
use crate::reading::SensorReading;

/// The document written to the store for each classified reading.
///
/// Serializes as the flat reading fields plus `id`, `is_anomaly` and
/// `anomaly_score`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub id: String,
    #[serde(flatten)]
    pub reading: SensorReading,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

impl PersistedRecord {
    pub fn partition_key(&self) -> String {
        self.reading.partition_key()
    }
}

/// Keys the record sets itself. Payload fields with these names are dropped.
pub const RESERVED_FIELDS: [&str; 3] = ["id", "is_anomaly", "anomaly_score"];

/// Builds `{unit}-{cycle}-{event_timestamp}-{message_id}`.
///
/// Equal correlation tuples give equal ids, so redelivered readings overwrite
/// their earlier copy. Missing parts render as `None`.
pub fn record_id(reading: &SensorReading) -> String {
    format!(
        "{}-{}-{}-{}",
        reading.unit_number,
        reading.time_in_cycles,
        reading.event_timestamp.as_deref().unwrap_or("None"),
        reading.message_id.as_deref().unwrap_or("None"),
    )
}

pub fn assemble(reading: SensorReading, result: InferenceResult) -> PersistedRecord {
    let id = record_id(&reading);
    let mut reading = reading.without_excluded();
    for name in RESERVED_FIELDS {
        reading.extra.remove(name);
    }

    PersistedRecord {
        id,
        reading,
        is_anomaly: result.is_anomaly,
        anomaly_score: result.anomaly_score,
    }
}
