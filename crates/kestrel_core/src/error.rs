use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the job template or a descriptor from disk failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The resolved document is not well-formed JSON, or does not match the schema.
    #[error("Malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required section is absent (e.g. `testTasks.tasks`).
    #[error("Missing section: {0}")]
    Missing(String),

    /// A time span did not match `[d.]HH:MM:SS`.
    #[error("Invalid time span '{0}'")]
    TimeSpan(String),

    /// The document parsed but describes something that cannot run.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A failed call into the container execution backend.
///
/// `invocation` names the operation and its arguments, so that a log line is enough to
/// reproduce the call by hand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{invocation}: {message}")]
pub struct RuntimeError {
    pub message: String,
    pub invocation: String,
}

impl RuntimeError {
    pub fn new(invocation: impl Into<String>, message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
            invocation: invocation.into(),
        }
    }
}

/// A single event file could not be turned into a [`JobEvent`](crate::events::JobEvent).
///
/// Never fatal: the sink logs it and moves on to the next file.
#[derive(Error, Debug)]
pub enum EventParseError {
    #[error("Malformed event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown event type '{0}'")]
    UnknownType(String),

    #[error("Event is missing '{0}'")]
    MissingField(&'static str),

    #[error("Unrecognized event time '{0}'")]
    EventTime(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    /// The receiver could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The receiver answered with a non-success status.
    #[error("Receiver returned error {0}: {1}")]
    Rejected(u16, String),

    /// The payload could not be built.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
