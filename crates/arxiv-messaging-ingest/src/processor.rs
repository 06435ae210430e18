use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use arxiv_messaging_core::{
    AggregationFrequency, DeliveryErrorStrategy, Subscription, correlation_id, now_utc,
};
use arxiv_messaging_notifications::Deliverer;
use arxiv_messaging_storage::EventStore;

use crate::envelope::{BusEnvelope, Route};

/// Sender used for gateway sends when the producer left the field empty.
const GATEWAY_FALLBACK_SENDER: &str = "no-reply@arxiv.org";

/// What the consumer should tell the bus about a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Result of processing one recipient of a fan-out. The outer loop derives
/// the message disposition from the aggregate: any `Failed` recipient nacks
/// the whole message for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// Recipient handled. `purge_before` is set for immediate-only users
    /// whose deliveries all actually succeeded; the stored event is dropped
    /// once the whole message acks.
    Completed {
        purge_before: Option<OffsetDateTime>,
    },
    /// Recipient has no enabled subscriptions; skipped without failing the
    /// message.
    NoSubscriptions,
    Failed {
        subscription_ids: Vec<String>,
    },
}

impl RecipientOutcome {
    fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Decodes, routes and fans out bus messages.
///
/// Redelivery is idempotent at the event-id granularity: events are upserts
/// keyed by the per-recipient derived id, a recipient whose derived event is
/// already stored is not delivered to again, and a retry-failed recipient
/// rolls its stored event back so the next attempt starts clean.
pub struct EventProcessor<S, D> {
    store: Arc<S>,
    delivery: Arc<D>,
}

impl<S, D> EventProcessor<S, D>
where
    S: EventStore,
    D: Deliverer,
{
    pub fn new(store: Arc<S>, delivery: Arc<D>) -> Self {
        Self { store, delivery }
    }

    /// Handle one bus payload end to end and decide its disposition.
    /// Messages that no retry can fix (malformed JSON, bad timestamp, no
    /// addressing) are acked and discarded.
    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let envelope = match BusEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "malformed bus message, discarding");
                return Disposition::Ack;
            }
        };
        let event_id = envelope.event_id().to_string();

        let timestamp = match envelope.parsed_timestamp() {
            Ok(Some(timestamp)) => timestamp,
            Ok(None) => now_utc(),
            Err(e) => {
                tracing::warn!(event_id, error = %e, "invalid timestamp, discarding message");
                return Disposition::Ack;
            }
        };

        match envelope.route() {
            Route::Gateway(email_to) => {
                self.process_gateway(&envelope, &email_to).await;
                Disposition::Ack
            }
            Route::Undeliverable => {
                tracing::warn!(
                    event_id,
                    "message has neither user_id nor email_to, discarding"
                );
                Disposition::Ack
            }
            Route::Recipients(user_ids) => self.fan_out(&envelope, &user_ids, timestamp).await,
        }
    }

    /// Gateway mode is fire-and-forget: one delivery attempt, nothing
    /// stored, acked regardless of the outcome.
    async fn process_gateway(&self, envelope: &BusEnvelope, email_to: &str) {
        let cid = correlation_id();
        tracing::info!(
            email_to,
            subject = %envelope.subject,
            event_id = envelope.event_id(),
            correlation_id = %cid,
            "processing email gateway message"
        );

        let subscription = Subscription::gateway(email_to);
        let sender = if envelope.sender.is_empty() {
            GATEWAY_FALLBACK_SENDER
        } else {
            &envelope.sender
        };
        let delivered = self
            .delivery
            .deliver(
                &subscription,
                &envelope.message,
                &envelope.subject,
                sender,
                &cid,
            )
            .await;
        if !delivered {
            tracing::warn!(
                email_to,
                event_id = envelope.event_id(),
                correlation_id = %cid,
                "gateway delivery failed, message not retried"
            );
        }
    }

    async fn fan_out(
        &self,
        envelope: &BusEnvelope,
        user_ids: &[String],
        timestamp: OffsetDateTime,
    ) -> Disposition {
        let cid = correlation_id();
        tracing::info!(
            event_id = envelope.event_id(),
            user_count = user_ids.len(),
            correlation_id = %cid,
            "processing event for recipients"
        );

        let fan_out = user_ids.len() > 1;
        let mut failed_users = Vec::new();
        let mut purges: Vec<(String, OffsetDateTime)> = Vec::new();
        for user_id in user_ids {
            let outcome = self
                .process_recipient(envelope, user_id, timestamp, fan_out, &cid)
                .await;
            match outcome {
                RecipientOutcome::Completed {
                    purge_before: Some(before),
                } => purges.push((user_id.clone(), before)),
                RecipientOutcome::Completed { purge_before: None }
                | RecipientOutcome::NoSubscriptions => {}
                RecipientOutcome::Failed { .. } => failed_users.push(user_id.clone()),
            }
        }

        if !failed_users.is_empty() {
            tracing::error!(
                event_id = envelope.event_id(),
                failed_users = ?failed_users,
                correlation_id = %cid,
                "recipients failed, message will be redelivered"
            );
            return Disposition::Nack;
        }

        // The message is about to ack; stored events of immediate-only
        // recipients have served their purpose (delivery and redelivery
        // dedup) and can go.
        for (user_id, before) in purges {
            match self.store.clear_user_events(&user_id, before).await {
                Ok(_) => {
                    tracing::info!(
                        user_id,
                        event_id = envelope.event_id(),
                        correlation_id = %cid,
                        "event purged after immediate delivery"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        error = %e,
                        correlation_id = %cid,
                        "failed to purge event after delivery, it may be reprocessed"
                    );
                }
            }
        }

        tracing::info!(
            event_id = envelope.event_id(),
            total_users = user_ids.len(),
            correlation_id = %cid,
            "all recipients processed"
        );
        Disposition::Ack
    }

    async fn process_recipient(
        &self,
        envelope: &BusEnvelope,
        user_id: &str,
        timestamp: OffsetDateTime,
        fan_out: bool,
        correlation_id: &str,
    ) -> RecipientOutcome {
        let event = envelope.event_for(user_id, timestamp, fan_out);

        let subscriptions = match self.store.get_user_subscriptions(user_id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                tracing::error!(
                    user_id,
                    event_id = %event.event_id,
                    error = %e,
                    correlation_id,
                    "failed to load subscriptions"
                );
                return RecipientOutcome::Failed {
                    subscription_ids: Vec::new(),
                };
            }
        };
        if subscriptions.is_empty() {
            tracing::warn!(
                user_id,
                event_id = %event.event_id,
                correlation_id,
                "no subscriptions found, skipping user"
            );
            return RecipientOutcome::NoSubscriptions;
        }

        let purge_before = purge_cursor(&subscriptions, &event.timestamp);

        // A stored event under the derived id means an earlier delivery
        // attempt already completed this recipient; don't send twice.
        match self.store.get_user_events(user_id, None).await {
            Ok(existing) if existing.iter().any(|e| e.event_id == event.event_id) => {
                tracing::info!(
                    user_id,
                    event_id = %event.event_id,
                    correlation_id,
                    "event already stored from an earlier attempt, skipping delivery"
                );
                return RecipientOutcome::Completed { purge_before };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    user_id,
                    event_id = %event.event_id,
                    error = %e,
                    correlation_id,
                    "failed to read events for redelivery check"
                );
                return RecipientOutcome::Failed {
                    subscription_ids: Vec::new(),
                };
            }
        }

        // Exactly one persisted document per recipient, however many
        // subscriptions fan off it.
        if let Err(e) = self.store.store_event(&event).await {
            tracing::error!(
                user_id,
                event_id = %event.event_id,
                error = %e,
                correlation_id,
                "failed to store event"
            );
            return RecipientOutcome::Failed {
                subscription_ids: Vec::new(),
            };
        }

        let mut failed = Vec::new();
        let mut all_delivered = true;
        for subscription in &subscriptions {
            if subscription.aggregation_frequency != AggregationFrequency::Immediate {
                continue;
            }
            tracing::info!(
                user_id,
                subscription_id = %subscription.subscription_id,
                delivery_method = %subscription.delivery_method,
                correlation_id,
                "immediate delivery"
            );

            let delivered = self
                .delivery
                .deliver(
                    subscription,
                    &event.message,
                    &event.subject,
                    &event.sender,
                    correlation_id,
                )
                .await;
            if delivered {
                continue;
            }
            all_delivered = false;
            match subscription.delivery_error_strategy {
                DeliveryErrorStrategy::Retry => {
                    tracing::warn!(
                        user_id,
                        subscription_id = %subscription.subscription_id,
                        event_id = %event.event_id,
                        strategy = %subscription.delivery_error_strategy,
                        correlation_id,
                        "delivery failed, recipient marked for redelivery"
                    );
                    failed.push(subscription.subscription_id.clone());
                }
                DeliveryErrorStrategy::Ignore => {
                    tracing::warn!(
                        user_id,
                        subscription_id = %subscription.subscription_id,
                        event_id = %event.event_id,
                        strategy = %subscription.delivery_error_strategy,
                        correlation_id,
                        "delivery failed, ignored per subscription preference"
                    );
                }
            }
        }

        if !failed.is_empty() {
            // Roll the stored event back so the next delivery attempt starts
            // clean instead of tripping the dedup check.
            if let Err(e) = self.store.delete_event_by_id(&event.event_id).await {
                tracing::warn!(
                    user_id,
                    event_id = %event.event_id,
                    error = %e,
                    correlation_id,
                    "failed to roll back event after delivery failure"
                );
            }
            return RecipientOutcome::Failed {
                subscription_ids: failed,
            };
        }

        // A failed-but-ignored delivery keeps the event in the store, where
        // a flush can still recover it.
        let purge_before = if all_delivered { purge_before } else { None };
        RecipientOutcome::Completed { purge_before }
    }
}

/// Immediate-only users get their events dropped once the message acks;
/// anything aggregated keeps them for the scheduler.
fn purge_cursor(
    subscriptions: &[Subscription],
    event_timestamp: &OffsetDateTime,
) -> Option<OffsetDateTime> {
    let has_immediate = subscriptions
        .iter()
        .any(|s| s.aggregation_frequency == AggregationFrequency::Immediate);
    let has_aggregated = subscriptions
        .iter()
        .any(|s| s.aggregation_frequency.is_aggregated());
    (has_immediate && !has_aggregated).then(|| *event_timestamp + Duration::seconds(1))
}
