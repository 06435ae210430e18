pub mod email;
pub mod webhook;

pub use email::{EmailProvider, SmtpSettings, TlsMode};
pub use webhook::WebhookProvider;

use arxiv_messaging_core::{DeliveryMethod, Subscription};

/// Channel-specific sender. One variant per delivery method; dispatch is a
/// match, not a trait object.
///
/// Providers contain their own failures: `send` logs with the correlation id
/// and subscription id and returns `false`, never an error.
pub enum ChannelProvider {
    Email(EmailProvider),
    Webhook(WebhookProvider),
}

impl ChannelProvider {
    /// Delivery method this provider serves.
    pub fn method(&self) -> DeliveryMethod {
        match self {
            Self::Email(_) => DeliveryMethod::Email,
            Self::Webhook(_) => DeliveryMethod::Webhook,
        }
    }

    pub async fn send(
        &self,
        subscription: &Subscription,
        body: &str,
        subject: &str,
        sender: &str,
        correlation_id: &str,
    ) -> bool {
        match self {
            Self::Email(provider) => {
                provider
                    .send(subscription, body, subject, sender, correlation_id)
                    .await
            }
            Self::Webhook(provider) => {
                provider
                    .send(subscription, body, subject, sender, correlation_id)
                    .await
            }
        }
    }
}
