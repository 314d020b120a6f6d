use crate::{cdc::Row, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// What a sink writes for each event.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub tag: &'a str,
    #[serde(serialize_with = "serialize_time")]
    pub time: DateTime<Utc>,
    pub record: &'a Row,
}

fn serialize_time<S: serde::Serializer>(
    time: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    Json,
    #[default]
    JsonCompact,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    format: SerializationFormat,
}

impl JsonSerializer {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    pub fn serialize(&self, envelope: &Envelope<'_>) -> Result<String> {
        let json = match self.format {
            SerializationFormat::Json => serde_json::to_string_pretty(envelope)?,
            SerializationFormat::JsonCompact => serde_json::to_string(envelope)?,
        };
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn envelope_parts() -> (DateTime<Utc>, Row) {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = Row::new().with("id", 1i64).with("name", "alice");
        (time, record)
    }

    #[test]
    fn test_compact_envelope() {
        let (time, record) = envelope_parts();
        let envelope = Envelope {
            tag: "repl.insert.id",
            time,
            record: &record,
        };

        let json = JsonSerializer::new(SerializationFormat::JsonCompact)
            .serialize(&envelope)
            .unwrap();
        assert_eq!(
            json,
            r#"{"tag":"repl.insert.id","time":"2024-01-02T03:04:05.000Z","record":{"id":1,"name":"alice"}}"#
        );
    }

    #[test]
    fn test_pretty_envelope_has_newlines() {
        let (time, record) = envelope_parts();
        let envelope = Envelope {
            tag: "t",
            time,
            record: &record,
        };

        let json = JsonSerializer::new(SerializationFormat::Json)
            .serialize(&envelope)
            .unwrap();
        assert!(json.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["record"]["name"], "alice");
    }
}
