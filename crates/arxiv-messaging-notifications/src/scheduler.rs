use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime, Time};
use tokio::sync::{Mutex, watch};

use arxiv_messaging_core::{AggregationFrequency, Clock, Subscription, correlation_id};
use arxiv_messaging_storage::EventStore;

use crate::digest;
use crate::service::Deliverer;

/// From line on every scheduled digest.
pub const AGGREGATE_SENDER: &str = "arXiv Messaging System";

/// How often the run loop re-checks the clock.
const POLL_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Scheduled delivery cadence. Hourly fires at the top of each hour; daily
/// and weekly fire at the scheduler's configured time (weekly on Mondays).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
}

impl Cadence {
    pub fn frequency(&self) -> AggregationFrequency {
        match self {
            Self::Hourly => AggregationFrequency::Hourly,
            Self::Daily => AggregationFrequency::Daily,
            Self::Weekly => AggregationFrequency::Weekly,
        }
    }

    /// Gather window for a subscription that has never delivered.
    pub fn window(&self) -> Duration {
        match self {
            Self::Hourly => Duration::hours(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::weeks(1),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hourly => "Hourly",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
        }
    }

    /// Most recent fire instant at or before `now`.
    fn anchor(&self, now: OffsetDateTime, fire_time: Time) -> OffsetDateTime {
        match self {
            Self::Hourly => {
                now - Duration::minutes(i64::from(now.minute()))
                    - Duration::seconds(i64::from(now.second()))
                    - Duration::nanoseconds(i64::from(now.nanosecond()))
            }
            Self::Daily => {
                let candidate = now.replace_time(fire_time);
                if candidate > now {
                    candidate - Duration::days(1)
                } else {
                    candidate
                }
            }
            Self::Weekly => {
                let today = now.replace_time(fire_time);
                let back = i64::from(today.weekday().number_days_from_monday());
                let candidate = today - Duration::days(back);
                if candidate > now {
                    candidate - Duration::weeks(1)
                } else {
                    candidate
                }
            }
        }
    }
}

/// Tracks the last fired anchor per cadence so each period fires exactly
/// once, regardless of how often the loop polls.
#[derive(Debug, Default)]
struct CadenceTracker {
    last: HashMap<Cadence, OffsetDateTime>,
}

const ALL_CADENCES: [Cadence; 3] = [Cadence::Hourly, Cadence::Daily, Cadence::Weekly];

impl CadenceTracker {
    /// Mark the current period of every cadence as already fired, so a
    /// process started mid-period waits for the next boundary.
    fn prime(&mut self, now: OffsetDateTime, fire_time: Time) {
        for cadence in ALL_CADENCES {
            self.last.insert(cadence, cadence.anchor(now, fire_time));
        }
    }

    fn due(&mut self, now: OffsetDateTime, fire_time: Time) -> Vec<Cadence> {
        let mut due = Vec::new();
        for cadence in ALL_CADENCES {
            let anchor = cadence.anchor(now, fire_time);
            let fired = self.last.get(&cadence).is_some_and(|last| *last >= anchor);
            if !fired {
                self.last.insert(cadence, anchor);
                due.push(cadence);
            }
        }
        due
    }
}

/// Tally of one cadence run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CadenceOutcome {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum SubscriptionOutcome {
    Delivered,
    Failed,
    Skipped,
}

/// Time-triggered digest delivery.
///
/// Owns its schedule state and takes the clock as a seam, so tests drive
/// [`run_cadence`](Self::run_cadence) directly with a fake clock instead of
/// sleeping. Per-subscription failures are contained: the run continues and
/// retained events are picked up by the next tick.
pub struct DigestScheduler<S, D> {
    store: Arc<S>,
    delivery: Arc<D>,
    clock: Arc<dyn Clock>,
    fire_time: Time,
    tracker: Mutex<CadenceTracker>,
}

impl<S, D> DigestScheduler<S, D>
where
    S: EventStore,
    D: Deliverer,
{
    pub fn new(store: Arc<S>, delivery: Arc<D>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            delivery,
            clock,
            fire_time: time::macros::time!(09:00),
            tracker: Mutex::new(CadenceTracker::default()),
        }
    }

    /// Override the daily/weekly fire time (default 09:00).
    pub fn with_fire_time(mut self, fire_time: Time) -> Self {
        self.fire_time = fire_time;
        self
    }

    /// Wake every minute, dispatch due cadences, stop on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        {
            let now = self.clock.now();
            self.tracker.lock().await.prime(now, self.fire_time);
        }
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        tracing::info!("digest scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("digest scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Run every cadence whose period boundary has passed since the last
    /// poll. Returns what fired, for observability and tests.
    pub async fn tick(&self) -> Vec<(Cadence, CadenceOutcome)> {
        let now = self.clock.now();
        let due = self.tracker.lock().await.due(now, self.fire_time);
        let mut fired = Vec::with_capacity(due.len());
        for cadence in due {
            let outcome = self.run_cadence(cadence).await;
            fired.push((cadence, outcome));
        }
        fired
    }

    /// Walk every enabled subscription of the cadence's frequency:
    /// gather -> format -> deliver -> advance watermark -> purge.
    pub async fn run_cadence(&self, cadence: Cadence) -> CadenceOutcome {
        tracing::info!(cadence = cadence.label(), "starting scheduled digest run");
        let mut outcome = CadenceOutcome::default();

        let users = match self.store.get_all_users_with_subscriptions().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "failed to list users for scheduled run");
                return outcome;
            }
        };

        for user_id in users {
            let subscriptions = match self.store.get_user_subscriptions(&user_id).await {
                Ok(subs) => subs,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "failed to load subscriptions, skipping user");
                    continue;
                }
            };

            for subscription in subscriptions
                .iter()
                .filter(|s| s.aggregation_frequency == cadence.frequency())
            {
                match self
                    .process_subscription(subscription, &subscriptions, cadence)
                    .await
                {
                    SubscriptionOutcome::Delivered => outcome.delivered += 1,
                    SubscriptionOutcome::Failed => outcome.failed += 1,
                    SubscriptionOutcome::Skipped => outcome.skipped += 1,
                }
            }
        }

        tracing::info!(
            cadence = cadence.label(),
            delivered = outcome.delivered,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "scheduled digest run complete"
        );
        outcome
    }

    async fn process_subscription(
        &self,
        subscription: &Subscription,
        all_subscriptions: &[Subscription],
        cadence: Cadence,
    ) -> SubscriptionOutcome {
        let now = self.clock.now();
        let user_id = &subscription.user_id;

        let since = match self
            .store
            .get_delivery_watermark(user_id, &subscription.subscription_id)
            .await
        {
            Ok(Some(watermark)) => watermark,
            Ok(None) => now - cadence.window(),
            Err(e) => {
                tracing::warn!(
                    user_id,
                    subscription_id = %subscription.subscription_id,
                    error = %e,
                    "failed to read delivery watermark"
                );
                return SubscriptionOutcome::Failed;
            }
        };

        let events = match self.store.get_user_events(user_id, Some(since)).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "failed to gather events");
                return SubscriptionOutcome::Failed;
            }
        };
        if events.is_empty() {
            return SubscriptionOutcome::Skipped;
        }

        let body = digest::render(user_id, &events, subscription.aggregation_method);
        let subject = format!("{} Summary - {} events", cadence.label(), events.len());
        let cid = correlation_id();

        tracing::info!(
            user_id,
            subscription_id = %subscription.subscription_id,
            event_count = events.len(),
            delivery_method = %subscription.delivery_method,
            aggregation_method = %subscription.aggregation_method,
            correlation_id = %cid,
            "delivering scheduled digest"
        );

        if !self
            .delivery
            .deliver(subscription, &body, &subject, AGGREGATE_SENDER, &cid)
            .await
        {
            tracing::warn!(
                user_id,
                subscription_id = %subscription.subscription_id,
                correlation_id = %cid,
                "digest delivery failed, events retained for next tick"
            );
            return SubscriptionOutcome::Failed;
        }

        if let Err(e) = self
            .store
            .set_delivery_watermark(user_id, &subscription.subscription_id, now)
            .await
        {
            tracing::warn!(
                user_id,
                subscription_id = %subscription.subscription_id,
                error = %e,
                "failed to advance delivery watermark, digest may be redelivered"
            );
        }

        self.purge_delivered(user_id, all_subscriptions).await;
        SubscriptionOutcome::Delivered
    }

    /// Delete events every aggregated subscription of the user has digested:
    /// everything below the minimum watermark. A subscription that has never
    /// delivered blocks purging entirely.
    async fn purge_delivered(&self, user_id: &str, subscriptions: &[Subscription]) {
        let mut min_watermark: Option<OffsetDateTime> = None;
        for subscription in subscriptions
            .iter()
            .filter(|s| s.enabled && s.aggregation_frequency.is_aggregated())
        {
            match self
                .store
                .get_delivery_watermark(user_id, &subscription.subscription_id)
                .await
            {
                Ok(Some(watermark)) => {
                    min_watermark =
                        Some(min_watermark.map_or(watermark, |m| m.min(watermark)));
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "failed to read watermark, retaining events"
                    );
                    return;
                }
            }
        }

        let Some(before) = min_watermark else { return };
        match self.store.clear_user_events(user_id, before).await {
            Ok(cleared) if cleared > 0 => {
                tracing::info!(user_id, events_cleared = cleared, "digested events purged");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "failed to purge digested events, they may be redelivered"
                );
            }
        }
    }
}
