//! Status and bug events reported by running containers.
//!
//! On disk every event is one JSON file of the form
//! `{"EventType": "BugFound" | "JobStatus", "Message": {...}}`. Keys are matched without regard to
//! case, since tools written in different languages disagree on capitalization.

use crate::constants::events::{BUG_FOUND, JOB_STATUS};
use crate::error::EventParseError;
use crate::normalize::lowercase_keys;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Free-form sections that are forwarded as written.
const OPAQUE_KEYS: &[&str] = &["details", "bugdetails", "responsecodecounts"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "EventType", content = "Message")]
pub enum JobEvent {
    BugFound(BugFound),
    JobStatus(JobStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "PascalCase"))]
pub struct BugFound {
    #[serde(default)]
    pub tool: String,
    #[serde(rename(deserialize = "jobid"))]
    pub job_id: String,
    #[serde(rename(deserialize = "agentname"))]
    pub agent_name: String,
    #[serde(rename(deserialize = "bugdetails"), default)]
    pub bug_details: Map<String, Value>,
    /// The `Message` object exactly as the container wrote it. Empty for events built in code.
    #[serde(skip)]
    pub written: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "PascalCase"))]
pub struct JobStatus {
    #[serde(default)]
    pub tool: String,
    #[serde(rename(deserialize = "jobid"))]
    pub job_id: String,
    #[serde(rename(deserialize = "agentname"))]
    pub agent_name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    #[serde(rename(deserialize = "utceventtime"), deserialize_with = "event_time")]
    pub utc_event_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StatusMetrics>,
    /// The `Message` object exactly as the container wrote it. Empty for events built in code.
    #[serde(skip)]
    pub written: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct StatusMetrics {
    #[serde(rename(deserialize = "totalrequestcount"), default)]
    pub total_request_count: u64,
    #[serde(rename(deserialize = "responsecodecounts"), default)]
    pub response_code_counts: BTreeMap<String, u64>,
}

impl JobStatus {
    /// The status of the job as a whole is reported under an agent named after the job.
    pub fn is_job_level(&self) -> bool {
        self.agent_name == self.job_id
    }
}

impl JobEvent {
    /// Parses one event file body.
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let raw: Value = serde_json::from_str(text)?;
        let written = raw
            .as_object()
            .and_then(|envelope| envelope.iter().find(|(k, _)| k.eq_ignore_ascii_case("message")))
            .and_then(|(_, message)| message.as_object().cloned())
            .unwrap_or_default();
        let Value::Object(mut envelope) = lowercase_keys(raw, OPAQUE_KEYS) else {
            return Err(EventParseError::MissingField("EventType"));
        };

        let event_type = match envelope.remove("eventtype") {
            Some(Value::String(t)) => t,
            _ => return Err(EventParseError::MissingField("EventType")),
        };
        let message = envelope
            .remove("message")
            .ok_or(EventParseError::MissingField("Message"))?;

        if event_type.eq_ignore_ascii_case(BUG_FOUND) {
            let mut bug: BugFound = serde_json::from_value(message)?;
            bug.written = written;
            Ok(JobEvent::BugFound(bug))
        } else if event_type.eq_ignore_ascii_case(JOB_STATUS) {
            let mut status: JobStatus = serde_json::from_value(message)?;
            status.written = written;
            Ok(JobEvent::JobStatus(status))
        } else {
            Err(EventParseError::UnknownType(event_type))
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::BugFound(_) => BUG_FOUND,
            JobEvent::JobStatus(_) => JOB_STATUS,
        }
    }

    pub fn agent_name(&self) -> &str {
        match self {
            JobEvent::BugFound(bug) => &bug.agent_name,
            JobEvent::JobStatus(status) => &status.agent_name,
        }
    }

    /// The `Message` section on its own: as written when the event was parsed, otherwise
    /// serialized from the typed fields.
    pub fn message(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let written = match self {
            JobEvent::BugFound(bug) => &bug.written,
            JobEvent::JobStatus(status) => &status.written,
        };
        if !written.is_empty() {
            return Ok(written.clone());
        }
        let value = match self {
            JobEvent::BugFound(bug) => serde_json::to_value(bug)?,
            JobEvent::JobStatus(status) => serde_json::to_value(status)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD HH:MM:SS[.fff]`, which is taken as UTC.
pub fn parse_event_time(text: &str) -> Result<DateTime<Utc>, EventParseError> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|t| t.and_utc())
        .ok_or_else(|| EventParseError::EventTime(text.to_string()))
}

fn event_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_event_time(&text).map_err(serde::de::Error::custom)
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
