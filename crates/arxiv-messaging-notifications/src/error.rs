use thiserror::Error;

/// Failures inside delivery providers. These never escape a provider's
/// `send`; they are logged with the correlation id and collapsed to `false`.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Recipient address not configured for subscription {0}")]
    MissingAddress(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl NotificationError {
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }
}
