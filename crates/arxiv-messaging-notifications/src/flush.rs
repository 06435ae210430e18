use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use arxiv_messaging_core::{Clock, Event};
use arxiv_messaging_storage::EventStore;

use crate::digest;
use crate::service::Deliverer;

/// From line on flush deliveries.
pub const FLUSH_SENDER: &str = "arxiv-messaging-flush@arxiv.org";

/// Parameters of an on-demand drain.
#[derive(Debug, Clone, Default)]
pub struct FlushRequest {
    /// Restrict the flush to one user; `None` drains everybody.
    pub user_id: Option<String>,
    /// Report what would be processed without delivering or purging.
    pub dry_run: bool,
    /// Purge a user's events even when no delivery succeeded.
    pub force_delivery: bool,
}

/// Per-run accounting returned to the caller. Errors accumulate; they never
/// abort the loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    pub users_processed: usize,
    pub messages_delivered: usize,
    pub messages_failed: usize,
    pub events_cleared: usize,
    pub errors: Vec<String>,
}

/// On-demand variant of the scheduled path: gather everything pending,
/// format per subscription, deliver, purge on success (or unconditionally
/// with `force_delivery`).
pub struct FlushOrchestrator<S, D> {
    store: Arc<S>,
    delivery: Arc<D>,
    clock: Arc<dyn Clock>,
}

impl<S, D> FlushOrchestrator<S, D>
where
    S: EventStore,
    D: Deliverer,
{
    pub fn new(store: Arc<S>, delivery: Arc<D>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            delivery,
            clock,
        }
    }

    pub async fn flush(&self, request: &FlushRequest) -> FlushReport {
        let mut report = FlushReport::default();

        let pending = match self.gather_pending(request, &mut report).await {
            Some(pending) => pending,
            None => return report,
        };

        tracing::info!(
            total_users = pending.len(),
            total_events = pending.values().map(Vec::len).sum::<usize>(),
            target_user = request.user_id.as_deref().unwrap_or("all"),
            dry_run = request.dry_run,
            force_delivery = request.force_delivery,
            "starting flush of undelivered events"
        );

        let mut users: Vec<(String, Vec<Event>)> = pending.into_iter().collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));

        for (user_id, events) in users {
            report.users_processed += 1;
            if request.dry_run {
                continue;
            }
            self.flush_user(&user_id, &events, request, &mut report)
                .await;
        }

        tracing::info!(
            users_processed = report.users_processed,
            messages_delivered = report.messages_delivered,
            messages_failed = report.messages_failed,
            events_cleared = report.events_cleared,
            error_count = report.errors.len(),
            "flush of undelivered events complete"
        );
        report
    }

    async fn gather_pending(
        &self,
        request: &FlushRequest,
        report: &mut FlushReport,
    ) -> Option<HashMap<String, Vec<Event>>> {
        match &request.user_id {
            Some(user_id) => match self.store.get_undelivered_events_by_user(user_id).await {
                Ok(events) if events.is_empty() => Some(HashMap::new()),
                Ok(events) => Some(HashMap::from([(user_id.clone(), events)])),
                Err(e) => {
                    report
                        .errors
                        .push(format!("failed to gather events for user {user_id}: {e}"));
                    None
                }
            },
            None => match self.store.get_undelivered_events(None).await {
                Ok(pending) => Some(pending),
                Err(e) => {
                    report
                        .errors
                        .push(format!("failed to gather undelivered events: {e}"));
                    None
                }
            },
        }
    }

    async fn flush_user(
        &self,
        user_id: &str,
        events: &[Event],
        request: &FlushRequest,
        report: &mut FlushReport,
    ) {
        let subscriptions = match self.store.get_user_subscriptions(user_id).await {
            Ok(subs) => subs,
            Err(e) => {
                report
                    .errors
                    .push(format!("failed to load subscriptions for {user_id}: {e}"));
                return;
            }
        };
        if subscriptions.is_empty() {
            tracing::warn!(
                user_id,
                undelivered_events = events.len(),
                "no enabled subscriptions for user, events retained"
            );
            return;
        }

        let mut delivered_for_user = 0usize;
        for subscription in &subscriptions {
            let body = digest::render(user_id, events, subscription.aggregation_method);
            if body.is_empty() {
                continue;
            }

            let subject = format!("Undelivered Messages Summary for {user_id}");
            let cid = format!("flush-{user_id}-{}", self.clock.now().unix_timestamp());

            tracing::info!(
                user_id,
                subscription_id = %subscription.subscription_id,
                event_count = events.len(),
                delivery_method = %subscription.delivery_method,
                aggregation_method = %subscription.aggregation_method,
                correlation_id = %cid,
                "flushing undelivered events"
            );

            if self
                .delivery
                .deliver(subscription, &body, &subject, FLUSH_SENDER, &cid)
                .await
            {
                report.messages_delivered += 1;
                delivered_for_user += 1;
            } else {
                report.messages_failed += 1;
                report.errors.push(format!(
                    "failed to deliver flush message for user {user_id}, subscription {}",
                    subscription.subscription_id
                ));
            }
        }

        if delivered_for_user == 0 && !request.force_delivery {
            return;
        }

        let now = self.clock.now();
        match self.store.clear_user_events(user_id, now).await {
            Ok(_) => {
                report.events_cleared += events.len();
                for subscription in subscriptions
                    .iter()
                    .filter(|s| s.aggregation_frequency.is_aggregated())
                {
                    if let Err(e) = self
                        .store
                        .set_delivery_watermark(user_id, &subscription.subscription_id, now)
                        .await
                    {
                        tracing::warn!(
                            user_id,
                            subscription_id = %subscription.subscription_id,
                            error = %e,
                            "failed to advance watermark after flush"
                        );
                    }
                }
                tracing::info!(
                    user_id,
                    events_cleared = events.len(),
                    "cleared undelivered events after flush"
                );
            }
            Err(e) => {
                report
                    .errors
                    .push(format!("failed to clear events for {user_id}: {e}"));
            }
        }
    }
}
