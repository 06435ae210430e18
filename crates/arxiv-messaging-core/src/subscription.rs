use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Delivery channel for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Email,
    Webhook,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            other => Err(CoreError::InvalidDeliveryMethod(other.to_string())),
        }
    }
}

/// How often events addressed to the owner are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFrequency {
    /// Deliver as part of ingestion, never batched
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

impl AggregationFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    /// True for every frequency handled by the digest scheduler rather than
    /// the ingestion path.
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, Self::Immediate)
    }
}

impl fmt::Display for AggregationFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationFrequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(CoreError::InvalidAggregationFrequency(other.to_string())),
        }
    }
}

/// Digest body encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Plain,
    Mime,
    Html,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Mime => "mime",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "mime" => Ok(Self::Mime),
            "html" => Ok(Self::Html),
            other => Err(CoreError::InvalidAggregationMethod(other.to_string())),
        }
    }
}

/// What a failed immediate delivery does to the surrounding bus message.
///
/// `Retry` marks the recipient failed so the message is nacked and redelivered
/// (guaranteed delivery); `Ignore` swallows the failure (avoids duplicates at
/// the cost of possible loss).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryErrorStrategy {
    #[default]
    Retry,
    Ignore,
}

impl DeliveryErrorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Ignore => "ignore",
        }
    }
}

impl fmt::Display for DeliveryErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryErrorStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "ignore" => Ok(Self::Ignore),
            other => Err(CoreError::InvalidErrorStrategy(other.to_string())),
        }
    }
}

fn default_delivery_time() -> String {
    "09:00".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A user's named delivery contract: channel, cadence, format and error
/// policy. Stored by `subscription_id`; a user may own any number of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub user_id: String,
    pub delivery_method: DeliveryMethod,
    pub aggregation_frequency: AggregationFrequency,
    #[serde(default)]
    pub aggregation_method: AggregationMethod,
    #[serde(default)]
    pub delivery_error_strategy: DeliveryErrorStrategy,
    /// "HH:MM", used by daily/weekly schedules
    #[serde(default = "default_delivery_time")]
    pub delivery_time: String,
    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// A disabled subscription is never a delivery target and never drives
    /// event retention.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Subscription {
    /// Transient pseudo-subscription for gateway messages (`email_to` with no
    /// `user_id`). Exists only to carry address, channel and immediate
    /// frequency into the delivery service; never persisted.
    pub fn gateway(email_to: &str) -> Self {
        Self {
            subscription_id: format!("gateway-{email_to}"),
            user_id: format!("gateway-{email_to}"),
            delivery_method: DeliveryMethod::Email,
            aggregation_frequency: AggregationFrequency::Immediate,
            aggregation_method: AggregationMethod::Plain,
            delivery_error_strategy: DeliveryErrorStrategy::Ignore,
            delivery_time: default_delivery_time(),
            timezone: default_timezone(),
            email_address: Some(email_to.to_string()),
            webhook_url: None,
            enabled: true,
        }
    }

    /// Integrity rules: the channel's address field must be present and
    /// non-empty, and `delivery_time` must be shaped `HH:MM`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.subscription_id.is_empty() {
            return Err(CoreError::invalid_subscription("subscription_id is empty"));
        }
        if self.user_id.is_empty() {
            return Err(CoreError::invalid_subscription("user_id is empty"));
        }
        match self.delivery_method {
            DeliveryMethod::Email => {
                if self.email_address.as_deref().unwrap_or("").is_empty() {
                    return Err(CoreError::invalid_subscription(
                        "email delivery requires email_address",
                    ));
                }
            }
            DeliveryMethod::Webhook => {
                if self.webhook_url.as_deref().unwrap_or("").is_empty() {
                    return Err(CoreError::invalid_subscription(
                        "webhook delivery requires webhook_url",
                    ));
                }
            }
        }
        if !is_valid_delivery_time(&self.delivery_time) {
            return Err(CoreError::invalid_subscription(format!(
                "delivery_time '{}' is not HH:MM",
                self.delivery_time
            )));
        }
        Ok(())
    }
}

fn is_valid_delivery_time(s: &str) -> bool {
    let Some((hh, mm)) = s.split_once(':') else {
        return false;
    };
    if hh.len() != 2 || mm.len() != 2 {
        return false;
    }
    if !hh.chars().all(|c| c.is_ascii_digit()) || !mm.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let (Ok(h), Ok(m)) = (hh.parse::<u8>(), mm.parse::<u8>()) else {
        return false;
    };
    h < 24 && m < 60
}
