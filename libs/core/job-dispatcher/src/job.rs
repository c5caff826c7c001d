//! Job envelopes and lifecycle records
//!
//! A job travels through the store as a single JSON string
//! `{"name": "...", "args": <any JSON>}`.

use crate::error::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::HashMap;

/// The wire envelope pushed by producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub name: String,
    pub args: Value,
}

impl JobEnvelope {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Serialize to the single string stored in the queue.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A job read back from the store, ready for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJob {
    pub name: String,
    /// Arguments as handed to the handler.
    pub args: String,
}

impl ParsedJob {
    /// Parse a raw payload.
    ///
    /// Parsing is lenient about `args` and strict about `name`: a missing,
    /// non-string or empty name rejects the job. Non-string `args` reach the
    /// handler as the exact text the producer wrote.
    pub fn parse(raw: &str) -> Result<Self, RejectReason> {
        let fields: HashMap<String, &RawValue> = serde_json::from_str(raw).map_err(|e| {
            if e.is_data() {
                RejectReason::EmptyName
            } else {
                RejectReason::Malformed(e.to_string())
            }
        })?;

        let name = fields
            .get("name")
            .and_then(|name| serde_json::from_str::<String>(name.get()).ok())
            .filter(|name| !name.is_empty())
            .ok_or(RejectReason::EmptyName)?;

        Ok(Self {
            name,
            args: render_raw(fields.get("args").copied()),
        })
    }
}

fn render_raw(value: Option<&RawValue>) -> String {
    let Some(value) = value else {
        return String::new();
    };

    match value.get() {
        "null" => String::new(),
        text if text.starts_with('"') => {
            serde_json::from_str::<String>(text).unwrap_or_else(|_| text.to_string())
        }
        text => text.to_string(),
    }
}

/// Render a JSON value the way handlers and admin filters see it.
///
/// Strings come back without quotes, absent or null values as an empty
/// string, everything else as compact JSON.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Look up a dotted path (`user.id`, `items.0`) inside a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Lifecycle status reported for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Processing,
    Success,
    Failure,
}

impl WorkStatus {
    /// Numeric status code, also written into every [`StatusRecord`].
    pub fn code(&self) -> u8 {
        match self {
            WorkStatus::Processing => 1,
            WorkStatus::Success => 2,
            WorkStatus::Failure => 3,
        }
    }
}

/// Record pushed onto a queue's callback list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub status: WorkStatus,
    pub code: u8,
    pub info: String,
    pub reported_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(name: impl Into<String>, status: WorkStatus, info: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            code: status.code(),
            info: info.into(),
            reported_at: Utc::now(),
        }
    }
}
