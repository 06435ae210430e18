use std::collections::HashMap;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use time::OffsetDateTime;

use arxiv_messaging_core::{Event, Subscription};
use arxiv_messaging_storage::{BulkDeleteOutcome, EventStore, StorageError, UndeliveredStats};

/// Reference write-batch cap of the underlying document store.
const WRITE_BATCH_LIMIT: usize = 500;

fn watermark_key(user_id: &str, subscription_id: &str) -> String {
    format!("{user_id}/{subscription_id}")
}

/// In-memory [`EventStore`] backed by papaya lock-free maps.
///
/// Guards are confined to block scopes so they never live across an await;
/// every method collects owned values before returning.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: PapayaHashMap<String, Event>,
    subscriptions: PapayaHashMap<String, Subscription>,
    /// Keyed `user_id/subscription_id`
    watermarks: PapayaHashMap<String, OffsetDateTime>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events, any user.
    pub fn event_count(&self) -> usize {
        self.events.pin().len()
    }

    fn sorted_user_events(&self, user_id: &str, since: Option<OffsetDateTime>) -> Vec<Event> {
        let mut events: Vec<Event> = {
            let guard = self.events.pin();
            guard
                .values()
                .filter(|e| e.user_id == user_id)
                .filter(|e| since.is_none_or(|s| e.timestamp >= s))
                .cloned()
                .collect()
        };
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        events
    }

    fn user_subscriptions(&self, user_id: &str, enabled_only: bool) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = {
            let guard = self.subscriptions.pin();
            guard
                .values()
                .filter(|s| s.user_id == user_id)
                .filter(|s| !enabled_only || s.enabled)
                .cloned()
                .collect()
        };
        subs.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        subs
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn store_event(&self, event: &Event) -> Result<(), StorageError> {
        let guard = self.events.pin();
        guard.insert(event.event_id.clone(), event.clone());
        tracing::debug!(
            event_id = %event.event_id,
            user_id = %event.user_id,
            event_type = %event.event_type,
            "event stored"
        );
        Ok(())
    }

    async fn get_user_events(
        &self,
        user_id: &str,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<Event>, StorageError> {
        Ok(self.sorted_user_events(user_id, since))
    }

    async fn clear_user_events(
        &self,
        user_id: &str,
        before: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        let doomed: Vec<String> = {
            let guard = self.events.pin();
            guard
                .values()
                .filter(|e| e.user_id == user_id && e.timestamp < before)
                .map(|e| e.event_id.clone())
                .collect()
        };

        for batch in doomed.chunks(WRITE_BATCH_LIMIT) {
            let guard = self.events.pin();
            for id in batch {
                guard.remove(id);
            }
        }

        tracing::debug!(
            user_id,
            events_cleared = doomed.len(),
            "events cleared for user"
        );
        Ok(doomed.len())
    }

    async fn delete_event_by_id(&self, event_id: &str) -> Result<bool, StorageError> {
        let guard = self.events.pin();
        Ok(guard.remove(event_id).is_some())
    }

    async fn delete_events_by_ids(
        &self,
        ids: &[String],
    ) -> Result<BulkDeleteOutcome, StorageError> {
        let mut outcome = BulkDeleteOutcome::default();
        for batch in ids.chunks(WRITE_BATCH_LIMIT) {
            let guard = self.events.pin();
            for id in batch {
                if guard.remove(id).is_some() {
                    outcome.deleted += 1;
                } else {
                    outcome.failed_ids.push(id.clone());
                }
            }
        }
        Ok(outcome)
    }

    async fn store_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        subscription
            .validate()
            .map_err(|e| StorageError::invalid_document(e.to_string()))?;
        let guard = self.subscriptions.pin();
        guard.insert(subscription.subscription_id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_user_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, StorageError> {
        Ok(self.user_subscriptions(user_id, true))
    }

    async fn list_user_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, StorageError> {
        Ok(self.user_subscriptions(user_id, false))
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StorageError> {
        let guard = self.subscriptions.pin();
        Ok(guard.remove(subscription_id).is_some())
    }

    async fn get_undelivered_events(
        &self,
        limit: Option<usize>,
    ) -> Result<HashMap<String, Vec<Event>>, StorageError> {
        let mut all: Vec<Event> = {
            let guard = self.events.pin();
            guard.values().cloned().collect()
        };
        all.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        if let Some(limit) = limit {
            all.truncate(limit);
        }

        let mut by_user: HashMap<String, Vec<Event>> = HashMap::new();
        for event in all {
            by_user.entry(event.user_id.clone()).or_default().push(event);
        }
        Ok(by_user)
    }

    async fn get_undelivered_events_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Event>, StorageError> {
        Ok(self.sorted_user_events(user_id, None))
    }

    async fn get_undelivered_stats(&self) -> Result<UndeliveredStats, StorageError> {
        let mut stats = UndeliveredStats::default();
        let guard = self.events.pin();
        for event in guard.values() {
            stats.total_events += 1;
            *stats
                .per_user_counts
                .entry(event.user_id.clone())
                .or_default() += 1;
            *stats
                .per_type_counts
                .entry(event.event_type.as_str().to_string())
                .or_default() += 1;
        }
        stats.total_users = stats.per_user_counts.len();
        Ok(stats)
    }

    async fn get_all_users_with_subscriptions(&self) -> Result<Vec<String>, StorageError> {
        let mut users: Vec<String> = {
            let guard = self.subscriptions.pin();
            guard.values().map(|s| s.user_id.clone()).collect()
        };
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn set_delivery_watermark(
        &self,
        user_id: &str,
        subscription_id: &str,
        at: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let guard = self.watermarks.pin();
        guard.insert(watermark_key(user_id, subscription_id), at);
        Ok(())
    }

    async fn get_delivery_watermark(
        &self,
        user_id: &str,
        subscription_id: &str,
    ) -> Result<Option<OffsetDateTime>, StorageError> {
        let guard = self.watermarks.pin();
        Ok(guard.get(&watermark_key(user_id, subscription_id)).copied())
    }
}
