//! Typed sensor readings decoded from raw event payloads.
//!
//! A payload is a flat JSON object. `unit_number` and `time_in_cycles` are
//! required numbers, every `setting_<n>` and `sensor_<n>` channel must be
//! numeric, and `message_id`/`event_timestamp` are optional correlation
//! fields. Anything else is carried through untouched so that new producer
//! fields reach the classifier and the store without a code change.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use snafu::{OptionExt, ResultExt};

use crate::error::{
    DecodeError, InvalidJsonSnafu, InvalidUtf8Snafu, MissingFieldSnafu, NonNumericFieldSnafu,
    NotAnObjectSnafu,
};
use crate::event::RawEvent;

pub const UNIT_NUMBER: &str = "unit_number";
pub const TIME_IN_CYCLES: &str = "time_in_cycles";
pub const MESSAGE_ID: &str = "message_id";
pub const EVENT_TIMESTAMP: &str = "event_timestamp";

/// Fields that are neither sent to the classifier nor persisted.
pub const EXCLUDED_FIELDS: [&str; 3] = ["raw_message_id", "raw_data_sample", "sensor_2_value"];

const CHANNEL_PREFIXES: [&str; 2] = ["setting_", "sensor_"];

/// A single sensor reading.
///
/// Serializes back to a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub unit_number: Number,
    pub time_in_cycles: Number,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<String>,
    /// `setting_<n>` and `sensor_<n>` values.
    #[serde(flatten)]
    pub channels: BTreeMap<String, f64>,
    /// Every other field of the payload.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The subset of a reading accepted by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InferenceRequest(SensorReading);

impl SensorReading {
    pub fn decode(event: &RawEvent) -> Result<Self, DecodeError> {
        let body = event.body_as_str().context(InvalidUtf8Snafu {})?;
        Self::from_json_str(body)
    }

    pub fn from_json_str(payload: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(payload).context(InvalidJsonSnafu {})?;
        let Value::Object(fields) = value else {
            return NotAnObjectSnafu {}.fail();
        };
        Self::from_fields(fields)
    }

    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self, DecodeError> {
        let unit_number = take_number(&mut fields, UNIT_NUMBER)?;
        let time_in_cycles = take_number(&mut fields, TIME_IN_CYCLES)?;
        let message_id = fields.remove(MESSAGE_ID).and_then(scalar_text);
        let event_timestamp = fields.remove(EVENT_TIMESTAMP).and_then(scalar_text);

        let mut channels = BTreeMap::new();
        let mut extra = Map::new();
        for (name, value) in fields {
            if !is_channel(&name) {
                extra.insert(name, value);
                continue;
            }

            let Some(reading) = value.as_f64() else {
                return NonNumericFieldSnafu {
                    field: name,
                    value: value.to_string(),
                }
                .fail();
            };
            channels.insert(name, reading);
        }

        Ok(Self {
            unit_number,
            time_in_cycles,
            message_id,
            event_timestamp,
            channels,
            extra,
        })
    }

    pub fn channel(&self, name: &str) -> Option<f64> {
        self.channels.get(name).copied()
    }

    /// The document store partition key.
    pub fn partition_key(&self) -> String {
        self.unit_number.to_string()
    }

    /// Drops the fields listed in [`EXCLUDED_FIELDS`].
    pub fn without_excluded(mut self) -> Self {
        for name in EXCLUDED_FIELDS {
            self.extra.remove(name);
            self.channels.remove(name);
        }
        self
    }
}

impl InferenceRequest {
    pub fn reading(&self) -> &SensorReading {
        &self.0
    }
}

impl From<&SensorReading> for InferenceRequest {
    fn from(reading: &SensorReading) -> Self {
        Self(reading.clone().without_excluded())
    }
}

fn take_number(fields: &mut Map<String, Value>, field: &'static str) -> Result<Number, DecodeError> {
    match fields.remove(field).context(MissingFieldSnafu { field })? {
        Value::Number(number) => Ok(number),
        other => NonNumericFieldSnafu {
            field,
            value: other.to_string(),
        }
        .fail(),
    }
}

fn is_channel(name: &str) -> bool {
    CHANNEL_PREFIXES
        .iter()
        .filter_map(|prefix| name.strip_prefix(prefix))
        .any(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

/// Renders a correlation field as text. `null` counts as absent.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload() -> Value {
        json!({
            "unit_number": 1.0,
            "time_in_cycles": 7.0,
            "setting_1": -0.0007,
            "sensor_1": 518.67,
            "sensor_2": 641.82,
            "message_id": "msg_6_1.0_7.0",
            "event_timestamp": "2025-06-01T10:00:00.000000",
            "raw_message_id": "abc",
            "raw_data_sample": {"unit_number": 1.0},
            "sensor_2_value": 641.82,
            "site": "plant-a"
        })
    }

    #[test]
    fn test_decode_valid_payload() {
        let reading = SensorReading::from_json_str(&payload().to_string()).unwrap();

        assert_eq!(reading.unit_number.to_string(), "1.0");
        assert_eq!(reading.time_in_cycles.to_string(), "7.0");
        assert_eq!(reading.message_id.as_deref(), Some("msg_6_1.0_7.0"));
        assert_eq!(reading.channel("sensor_1"), Some(518.67));
        assert_eq!(reading.channels.len(), 3);
        assert!(reading.extra.contains_key("site"));
        assert!(reading.extra.contains_key("sensor_2_value"));
    }

    #[test]
    fn test_decode_rejects_non_numeric_channel() {
        let mut value = payload();
        value["sensor_1"] = json!("n/a");

        let err = SensorReading::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, DecodeError::NonNumericField { ref field, .. } if field == "sensor_1"));
    }

    #[test]
    fn test_decode_rejects_missing_unit_number() {
        let mut value = payload();
        value.as_object_mut().unwrap().remove("unit_number");

        let err = SensorReading::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { field: "unit_number" }));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = SensorReading::from_json_str("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject));

        let err = SensorReading::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson { .. }));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let event = RawEvent::new("0", 0, vec![0xc3, 0x28]);
        let err = SensorReading::decode(&event).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8 { .. }));
    }

    #[test]
    fn test_correlation_fields_accept_scalars() {
        let reading = SensorReading::from_json_str(
            r#"{"unit_number": 3, "time_in_cycles": 9, "message_id": 12, "event_timestamp": null}"#,
        )
        .unwrap();

        assert_eq!(reading.message_id.as_deref(), Some("12"));
        assert!(reading.event_timestamp.is_none());
    }

    #[test]
    fn test_channel_names() {
        assert!(is_channel("sensor_21"));
        assert!(is_channel("setting_3"));
        assert!(!is_channel("sensor_2_value"));
        assert!(!is_channel("sensor_"));
        assert!(!is_channel("sensors_1"));
    }

    #[test]
    fn test_inference_request_drops_excluded_fields() {
        let reading = SensorReading::from_json_str(&payload().to_string()).unwrap();
        let request = InferenceRequest::from(&reading);

        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();
        for name in EXCLUDED_FIELDS {
            assert!(!object.contains_key(name), "{name} should be excluded");
        }
        assert_eq!(object["sensor_1"], json!(518.67));
        assert_eq!(object["unit_number"], json!(1.0));
        assert_eq!(object["site"], json!("plant-a"));
    }
}
