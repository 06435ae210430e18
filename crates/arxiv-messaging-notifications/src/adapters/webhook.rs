use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use arxiv_messaging_core::Subscription;

/// HTTP request timeout for webhook posts.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook delivery provider. The target URL is carried on the subscription;
/// the payload is a JSON object `{subject, message, sender}` and success is
/// any 2xx response.
pub struct WebhookProvider {
    http_client: Client,
}

impl WebhookProvider {
    pub fn new() -> Self {
        Self {
            http_client: Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .unwrap_or_default(),
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
        let Some(url) = subscription
            .webhook_url
            .as_deref()
            .filter(|u| !u.is_empty())
        else {
            tracing::error!(
                user_id = %subscription.user_id,
                subscription_id = %subscription.subscription_id,
                correlation_id,
                "webhook URL not configured for subscription"
            );
            return false;
        };

        tracing::info!(
            subject,
            sender,
            user_id = %subscription.user_id,
            subscription_id = %subscription.subscription_id,
            correlation_id,
            "webhook delivery initiated"
        );

        let payload = json!({
            "subject": subject,
            "message": body,
            "sender": sender,
        });

        match self.http_client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    status = %response.status(),
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.subscription_id,
                    correlation_id,
                    "webhook delivered"
                );
                true
            }
            Ok(response) => {
                let status = response.status();
                let kind = if status.is_client_error() {
                    "permanent"
                } else {
                    "transient"
                };
                tracing::error!(
                    status = %status,
                    kind,
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.subscription_id,
                    correlation_id,
                    "webhook rejected"
                );
                false
            }
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "transport" };
                tracing::error!(
                    error = %e,
                    kind,
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.subscription_id,
                    correlation_id,
                    "webhook delivery failed"
                );
                false
            }
        }
    }
}

impl Default for WebhookProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arxiv_messaging_core::{
        AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod,
    };
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook_subscription(url: String) -> Subscription {
        Subscription {
            subscription_id: "s1".into(),
            user_id: "u1".into(),
            delivery_method: DeliveryMethod::Webhook,
            aggregation_frequency: AggregationFrequency::Immediate,
            aggregation_method: AggregationMethod::Plain,
            delivery_error_strategy: DeliveryErrorStrategy::Retry,
            delivery_time: "09:00".into(),
            timezone: "UTC".into(),
            email_address: None,
            webhook_url: Some(url),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_posts_subject_message_sender_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "subject": "hi",
                "message": "the body",
                "sender": "ops@arxiv.org",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = WebhookProvider::new();
        let sub = webhook_subscription(format!("{}/hook", server.uri()));
        assert!(
            provider
                .send(&sub, "the body", "hi", "ops@arxiv.org", "cid")
                .await
        );
    }

    #[tokio::test]
    async fn test_non_2xx_maps_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = WebhookProvider::new();
        let sub = webhook_subscription(server.uri());
        assert!(!provider.send(&sub, "b", "s", "x", "cid").await);
    }

    #[tokio::test]
    async fn test_client_error_maps_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = WebhookProvider::new();
        let sub = webhook_subscription(server.uri());
        assert!(!provider.send(&sub, "b", "s", "x", "cid").await);
    }

    #[tokio::test]
    async fn test_missing_url_maps_to_false() {
        let provider = WebhookProvider::new();
        let mut sub = webhook_subscription(String::new());
        sub.webhook_url = None;
        assert!(!provider.send(&sub, "b", "s", "x", "cid").await);
    }

    #[tokio::test]
    async fn test_unreachable_host_maps_to_false() {
        let provider = WebhookProvider::new();
        // nothing listens on port 1
        let sub = webhook_subscription("http://127.0.0.1:1/hook".into());
        assert!(!provider.send(&sub, "b", "s", "x", "cid").await);
    }
}
