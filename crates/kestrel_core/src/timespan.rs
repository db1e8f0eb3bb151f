//! `[d.]HH:MM:SS` time spans, as used for durations in job documents.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Parses `HH:MM:SS` or `d.HH:MM:SS`.
pub fn parse(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::TimeSpan(text.to_string());

    let mut parts = text.trim().split(':');
    let (Some(head), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let (days, hours) = match head.split_once('.') {
        Some((days, hours)) => (field(days, u64::MAX).ok_or_else(invalid)?, hours),
        None => (0, head),
    };
    let hours = field(hours, 23).ok_or_else(invalid)?;
    let minutes = field(minutes, 59).ok_or_else(invalid)?;
    let seconds = field(seconds, 59).ok_or_else(invalid)?;

    days.checked_mul(SECONDS_PER_DAY)
        .and_then(|d| d.checked_add(hours * 3600 + minutes * 60 + seconds))
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

fn field(text: &str, max: u64) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok().filter(|v| *v <= max)
}

/// Formats a duration back into `[d.]HH:MM:SS`, dropping sub-second precision.
pub fn format(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / SECONDS_PER_DAY;
    let rest = total % SECONDS_PER_DAY;
    let (h, m, s) = (rest / 3600, (rest % 3600) / 60, rest % 60);
    if days > 0 {
        format!("{days}.{h:02}:{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}

pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(t) => parse(t).map(Some).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn serialize_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&format(*d)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
#[path = "timespan_tests.rs"]
mod tests;
