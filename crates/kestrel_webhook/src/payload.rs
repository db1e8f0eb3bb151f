use chrono::{DateTime, SecondsFormat, Utc};
use kestrel_core::events::JobEvent;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// One notification, in the event-grid shape receivers expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookPayload {
    pub event_type: String,
    pub subject: String,
    pub id: String,
    pub data: Map<String, Value>,
    pub topic: String,
    pub event_time: String,
    pub data_version: String,
    #[serde(rename = "metadataVersion")]
    pub metadata_version: String,
}

impl WebhookPayload {
    /// Wraps the event's message. `metadata` is attached under `Data.Metadata`.
    pub fn new(
        event: &JobEvent,
        metadata: Option<&Map<String, Value>>,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let mut data = event.message()?;
        if let Some(metadata) = metadata {
            data.insert("Metadata".into(), Value::Object(metadata.clone()));
        }
        data.insert("ResultsUrl".into(), Value::String(String::new()));

        let event_type = event.event_type().to_string();
        Ok(Self {
            subject: event_type.clone(),
            topic: event_type.clone(),
            event_type,
            id: Uuid::new_v4().to_string(),
            data,
            event_time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            data_version: "1.0".into(),
            metadata_version: "1".into(),
        })
    }
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
