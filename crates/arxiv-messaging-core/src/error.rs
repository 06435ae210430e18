use thiserror::Error;

/// Core error types for messaging domain operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    #[error("Invalid delivery method: {0}")]
    InvalidDeliveryMethod(String),

    #[error("Invalid aggregation frequency: {0}")]
    InvalidAggregationFrequency(String),

    #[error("Invalid aggregation method: {0}")]
    InvalidAggregationMethod(String),

    #[error("Invalid error strategy: {0}")]
    InvalidErrorStrategy(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid subscription: {message}")]
    InvalidSubscription { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidTimestamp error
    pub fn invalid_timestamp(message: impl Into<String>) -> Self {
        Self::InvalidTimestamp(message.into())
    }

    /// Create a new InvalidSubscription error
    pub fn invalid_subscription(message: impl Into<String>) -> Self {
        Self::InvalidSubscription {
            message: message.into(),
        }
    }
}

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
