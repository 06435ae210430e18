use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;

use arxiv_messaging_core::{Event, Subscription};

use crate::error::StorageError;
use crate::types::{BulkDeleteOutcome, UndeliveredStats};

/// Repository over the two logical collections (`events` keyed by event_id,
/// `subscriptions` keyed by subscription_id) plus per-subscription delivery
/// watermarks.
///
/// `store_event` and `store_subscription` are upserts by primary key, which
/// is what makes bus redelivery idempotent at the event-id granularity.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upsert an event by `event_id`.
    async fn store_event(&self, event: &Event) -> Result<(), StorageError>;

    /// Events for a user with `timestamp >= since` (if given), ordered by
    /// timestamp ascending.
    async fn get_user_events(
        &self,
        user_id: &str,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<Event>, StorageError>;

    /// Delete events for a user with `timestamp < before`, in batches bounded
    /// by the backend's write-batch limit. Returns the number deleted.
    async fn clear_user_events(
        &self,
        user_id: &str,
        before: OffsetDateTime,
    ) -> Result<usize, StorageError>;

    /// Delete one event; `false` when it does not exist.
    async fn delete_event_by_id(&self, event_id: &str) -> Result<bool, StorageError>;

    /// Delete many events, reporting ids that could not be removed.
    async fn delete_events_by_ids(&self, ids: &[String])
    -> Result<BulkDeleteOutcome, StorageError>;

    /// Upsert a subscription by `subscription_id`.
    async fn store_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;

    /// Enabled subscriptions for a user. The ingestion and scheduled paths
    /// use this; administrative listing goes through
    /// [`list_user_subscriptions`](Self::list_user_subscriptions).
    async fn get_user_subscriptions(&self, user_id: &str)
    -> Result<Vec<Subscription>, StorageError>;

    /// All subscriptions for a user regardless of `enabled`.
    async fn list_user_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<Subscription>, StorageError>;

    /// Delete a subscription; `false` when it does not exist.
    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StorageError>;

    /// Pending events grouped by user, optionally truncated to `limit`
    /// documents overall.
    async fn get_undelivered_events(
        &self,
        limit: Option<usize>,
    ) -> Result<HashMap<String, Vec<Event>>, StorageError>;

    /// Pending events for one user, ordered by timestamp ascending.
    async fn get_undelivered_events_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Event>, StorageError>;

    /// Counts of pending events by user and by type.
    async fn get_undelivered_stats(&self) -> Result<UndeliveredStats, StorageError>;

    /// Distinct user ids owning at least one subscription (any state).
    async fn get_all_users_with_subscriptions(&self) -> Result<Vec<String>, StorageError>;

    /// Record that `subscription_id` delivered everything up to `at`.
    async fn set_delivery_watermark(
        &self,
        user_id: &str,
        subscription_id: &str,
        at: OffsetDateTime,
    ) -> Result<(), StorageError>;

    /// Last recorded delivery watermark for a subscription, if any.
    async fn get_delivery_watermark(
        &self,
        user_id: &str,
        subscription_id: &str,
    ) -> Result<Option<OffsetDateTime>, StorageError>;
}
