use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CoreError;

/// Severity class of a notification event.
///
/// The wire and storage representation is the upper-case label; anything else
/// is rejected by `FromStr` and callers decide whether to coerce (the
/// ingestion path downgrades unknown values to `Notification` with a warning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Notification,
    Alert,
    Warning,
    Info,
}

impl EventType {
    /// The persisted/wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "NOTIFICATION",
            Self::Alert => "ALERT",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOTIFICATION" => Ok(Self::Notification),
            "ALERT" => Ok(Self::Alert),
            "WARNING" => Ok(Self::Warning),
            "INFO" => Ok(Self::Info),
            other => Err(CoreError::InvalidEventType(other.to_string())),
        }
    }
}

/// A single addressable notification record.
///
/// `event_id` is globally unique across the store. Multi-recipient bus
/// messages fan out to one event per recipient with a derived id (see
/// [`Event::derived_id`]), so recipients never share a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub user_id: String,
    pub event_type: EventType,
    pub message: String,
    pub sender: String,
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Per-recipient id for fanned-out events: `{original_id}-{user_id}`.
    pub fn derived_id(original_id: &str, user_id: &str) -> String {
        format!("{original_id}-{user_id}")
    }
}
