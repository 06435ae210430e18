use std::collections::HashMap;
use std::str::FromStr;

use serde::Deserialize;
use time::OffsetDateTime;

use arxiv_messaging_core::{Event, EventType, parse_timestamp};

use crate::error::IngestError;

/// `user_id` on the wire is either a single id or a list to fan out over.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

/// Where a decoded message is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `email_to` with no `user_id`: a single best-effort SMTP send that
    /// bypasses the store.
    Gateway(String),
    /// Recipient user ids, already normalized to a non-empty list.
    Recipients(Vec<String>),
    /// No addressing information; log and discard.
    Undeliverable,
}

/// Decoded bus message. Every field is optional on the wire; routing and
/// validation decide what is fatal.
#[derive(Debug, Clone, Deserialize)]
pub struct BusEnvelope {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<Recipients>,
    #[serde(default)]
    pub email_to: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BusEnvelope {
    pub fn decode(payload: &[u8]) -> Result<Self, IngestError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// The producer-assigned id, `unknown` when the producer sent none.
    pub fn event_id(&self) -> &str {
        self.event_id.as_deref().unwrap_or("unknown")
    }

    pub fn route(&self) -> Route {
        let email_to = self.email_to.as_deref().filter(|e| !e.is_empty());
        if let Some(email) = email_to
            && self.user_id.is_none()
        {
            return Route::Gateway(email.to_string());
        }

        match &self.user_id {
            None => Route::Undeliverable,
            Some(Recipients::One(user)) if user.is_empty() => Route::Undeliverable,
            Some(Recipients::One(user)) => Route::Recipients(vec![user.clone()]),
            Some(Recipients::Many(users)) => {
                let users: Vec<String> =
                    users.iter().filter(|u| !u.is_empty()).cloned().collect();
                if users.is_empty() {
                    Route::Undeliverable
                } else {
                    Route::Recipients(users)
                }
            }
        }
    }

    /// Producer timestamp; `Ok(None)` when absent, error when unparseable.
    pub fn parsed_timestamp(&self) -> Result<Option<OffsetDateTime>, IngestError> {
        match self.timestamp.as_deref() {
            None => Ok(None),
            Some(raw) => Ok(Some(parse_timestamp(raw)?)),
        }
    }

    /// Event type with the lenient coercion: unknown labels downgrade to
    /// `NOTIFICATION` with a warning, never an error.
    pub fn coerced_event_type(&self, user_id: &str) -> EventType {
        let raw = self.event_type.as_deref().unwrap_or("NOTIFICATION");
        EventType::from_str(raw).unwrap_or_else(|_| {
            tracing::warn!(
                event_type = raw,
                event_id = self.event_id(),
                user_id,
                "unknown event_type, defaulting to NOTIFICATION"
            );
            EventType::Notification
        })
    }

    /// The event stored for one recipient. A multi-recipient fan-out mints
    /// the derived id `{event_id}-{user_id}` so recipients get distinct
    /// documents; a single-recipient message keeps the producer's id.
    pub fn event_for(&self, user_id: &str, timestamp: OffsetDateTime, fan_out: bool) -> Event {
        let event_id = if fan_out {
            Event::derived_id(self.event_id(), user_id)
        } else {
            self.event_id().to_string()
        };
        Event {
            event_id,
            user_id: user_id.to_string(),
            event_type: self.coerced_event_type(user_id),
            message: self.message.clone(),
            sender: self.sender.clone(),
            subject: self.subject.clone(),
            timestamp,
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn decode(json: serde_json::Value) -> BusEnvelope {
        BusEnvelope::decode(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(BusEnvelope::decode(b"{not json").is_err());
        assert!(BusEnvelope::decode(b"[1, 2]").is_err());
    }

    #[test]
    fn test_route_single_recipient() {
        let env = decode(serde_json::json!({"event_id": "e1", "user_id": "u1"}));
        assert_eq!(env.route(), Route::Recipients(vec!["u1".into()]));
    }

    #[test]
    fn test_route_fan_out_list() {
        let env = decode(serde_json::json!({"event_id": "e1", "user_id": ["u1", "u2"]}));
        assert_eq!(
            env.route(),
            Route::Recipients(vec!["u1".into(), "u2".into()])
        );
    }

    #[test]
    fn test_route_gateway_only_without_user_id() {
        let env = decode(serde_json::json!({"event_id": "e2", "email_to": "x@y"}));
        assert_eq!(env.route(), Route::Gateway("x@y".into()));

        // both present: treated as a normal user-addressed message
        let env = decode(serde_json::json!({"event_id": "e2", "email_to": "x@y", "user_id": "u1"}));
        assert_eq!(env.route(), Route::Recipients(vec!["u1".into()]));
    }

    #[test]
    fn test_route_undeliverable_without_addressing() {
        let env = decode(serde_json::json!({"event_id": "e3"}));
        assert_eq!(env.route(), Route::Undeliverable);

        let env = decode(serde_json::json!({"event_id": "e3", "user_id": []}));
        assert_eq!(env.route(), Route::Undeliverable);

        let env = decode(serde_json::json!({"event_id": "e3", "user_id": ""}));
        assert_eq!(env.route(), Route::Undeliverable);
    }

    #[test]
    fn test_invalid_user_id_type_fails_decode() {
        assert!(BusEnvelope::decode(br#"{"event_id": "e1", "user_id": 42}"#).is_err());
    }

    #[test]
    fn test_unknown_event_type_coerces_to_notification() {
        let env = decode(serde_json::json!({"event_id": "e1", "event_type": "CRITICAL"}));
        assert_eq!(env.coerced_event_type("u1"), EventType::Notification);

        let env = decode(serde_json::json!({"event_id": "e1", "event_type": "ALERT"}));
        assert_eq!(env.coerced_event_type("u1"), EventType::Alert);
    }

    #[test]
    fn test_timestamp_parsing() {
        let env = decode(serde_json::json!({"timestamp": "2024-01-01T00:00:00Z"}));
        assert_eq!(
            env.parsed_timestamp().unwrap(),
            Some(datetime!(2024-01-01 00:00:00 UTC))
        );

        let env = decode(serde_json::json!({}));
        assert_eq!(env.parsed_timestamp().unwrap(), None);

        let env = decode(serde_json::json!({"timestamp": "not-a-time"}));
        assert!(env.parsed_timestamp().is_err());
    }

    #[test]
    fn test_event_for_derives_per_recipient_id_on_fan_out() {
        let env = decode(serde_json::json!({
            "event_id": "e1",
            "user_id": ["u1", "u2"],
            "event_type": "INFO",
            "message": "m",
            "sender": "s@x",
            "subject": "hi",
        }));
        let event = env.event_for("u2", datetime!(2024-01-01 00:00:00 UTC), true);
        assert_eq!(event.event_id, "e1-u2");
        assert_eq!(event.user_id, "u2");
        assert_eq!(event.event_type, EventType::Info);
        assert_eq!(event.subject, "hi");
    }

    #[test]
    fn test_event_for_keeps_original_id_for_single_recipient() {
        let env = decode(serde_json::json!({"event_id": "e1", "user_id": "u1"}));
        let event = env.event_for("u1", datetime!(2024-01-01 00:00:00 UTC), false);
        assert_eq!(event.event_id, "e1");
    }
}
