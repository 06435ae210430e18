use std::collections::HashMap;

use async_trait::async_trait;

use arxiv_messaging_core::{DeliveryMethod, Subscription};

use crate::adapters::{ChannelProvider, EmailProvider, SmtpSettings, WebhookProvider};

/// Capability consumed by the ingestion, scheduled and flush paths: deliver a
/// `(recipient, subject, body)` tuple and report success or failure.
///
/// Implementations never retry; retry policy belongs to the caller and is
/// governed by the subscription's error strategy.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        subscription: &Subscription,
        body: &str,
        subject: &str,
        sender: &str,
        correlation_id: &str,
    ) -> bool;
}

/// Dispatcher that routes a subscription to the provider for its channel.
pub struct DeliveryService {
    providers: HashMap<DeliveryMethod, ChannelProvider>,
}

impl DeliveryService {
    /// Service with both built-in channels wired.
    pub fn new(smtp: SmtpSettings) -> Self {
        Self::with_providers(vec![
            ChannelProvider::Email(EmailProvider::new(smtp)),
            ChannelProvider::Webhook(WebhookProvider::new()),
        ])
    }

    pub fn with_providers(providers: Vec<ChannelProvider>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.method(), p)).collect(),
        }
    }
}

#[async_trait]
impl Deliverer for DeliveryService {
    async fn deliver(
        &self,
        subscription: &Subscription,
        body: &str,
        subject: &str,
        sender: &str,
        correlation_id: &str,
    ) -> bool {
        let Some(provider) = self.providers.get(&subscription.delivery_method) else {
            tracing::error!(
                delivery_method = %subscription.delivery_method,
                user_id = %subscription.user_id,
                subscription_id = %subscription.subscription_id,
                correlation_id,
                "no delivery provider for method"
            );
            return false;
        };
        provider
            .send(subscription, body, subject, sender, correlation_id)
            .await
    }
}
