//! Structured JSONL test logs.

use chrono::DateTime;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

/// Fields every structured test log entry carries.
pub const REQUIRED_FIELDS: [&str; 6] = [
    "timestamp",
    "test_name",
    "module",
    "phase",
    "result",
    "assertions",
];

/// Reasons a log entry is rejected.
#[derive(Debug, Error)]
pub enum LogCaptureError {
    #[error("log entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log entry is not an object")]
    NotAnObject,

    #[error("log entry is missing `{0}`")]
    MissingField(&'static str),

    #[error("log entry timestamp is not RFC 3339: {0}")]
    Timestamp(String),
}

/// In-memory sink for structured test log lines.
#[derive(Debug, Default)]
pub struct LogCapture {
    lines: Mutex<Vec<String>>,
}

impl LogCapture {
    /// Create an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw JSONL line.
    pub fn push_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    /// Validate and record one entry.
    pub fn push_value(&self, entry: &Value) -> Result<(), LogCaptureError> {
        validate_entry(entry)?;
        self.push_line(&serde_json::to_string(entry)?);
        Ok(())
    }

    /// Captured lines joined as JSONL.
    #[must_use]
    pub fn jsonl(&self) -> String {
        self.lines.lock().join("\n")
    }

    /// Number of captured lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Assert every captured line is a valid entry.
    ///
    /// # Panics
    ///
    /// Panics on the first invalid line.
    pub fn assert_valid(&self) {
        for (index, line) in self.lines.lock().iter().enumerate() {
            let result = serde_json::from_str::<Value>(line)
                .map_err(LogCaptureError::from)
                .and_then(|entry| validate_entry(&entry));
            if let Err(err) = result {
                panic!("invalid log line {}: {err}", index + 1);
            }
        }
    }
}

fn validate_entry(entry: &Value) -> Result<(), LogCaptureError> {
    let object = entry.as_object().ok_or(LogCaptureError::NotAnObject)?;
    for field in REQUIRED_FIELDS {
        if !object.contains_key(field) {
            return Err(LogCaptureError::MissingField(field));
        }
    }
    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default();
    DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| LogCaptureError::Timestamp(timestamp.to_string()))?;
    Ok(())
}
