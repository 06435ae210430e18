//! End-to-end ingestion scenarios against the in-memory store and bus, with
//! a recording delivery double standing in for the SMTP/webhook providers.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use arxiv_messaging_core::{
    AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod, EventType,
    Subscription,
};
use arxiv_messaging_db_memory::MemoryEventStore;
use arxiv_messaging_ingest::{BusConsumer, BusSubscriber, Disposition, EventProcessor, MemoryBus};
use arxiv_messaging_notifications::Deliverer;
use arxiv_messaging_storage::EventStore;

#[derive(Debug, Clone)]
struct SendRecord {
    subscription_id: String,
    user_id: String,
    body: String,
    subject: String,
    sender: String,
}

/// Delivery double: records every send and fails the subscriptions it is
/// told to fail.
#[derive(Default)]
struct RecordingDeliverer {
    sends: Mutex<Vec<SendRecord>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingDeliverer {
    fn fail_subscription(&self, subscription_id: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(subscription_id.to_string());
    }

    fn heal_subscription(&self, subscription_id: &str) {
        self.failing.lock().unwrap().remove(subscription_id);
    }

    fn sends(&self) -> Vec<SendRecord> {
        self.sends.lock().unwrap().clone()
    }

    fn sends_for(&self, subscription_id: &str) -> usize {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.subscription_id == subscription_id)
            .count()
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    async fn deliver(
        &self,
        subscription: &Subscription,
        body: &str,
        subject: &str,
        sender: &str,
        _correlation_id: &str,
    ) -> bool {
        self.sends.lock().unwrap().push(SendRecord {
            subscription_id: subscription.subscription_id.clone(),
            user_id: subscription.user_id.clone(),
            body: body.to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
        });
        !self
            .failing
            .lock()
            .unwrap()
            .contains(&subscription.subscription_id)
    }
}

fn subscription(
    id: &str,
    user: &str,
    frequency: AggregationFrequency,
    strategy: DeliveryErrorStrategy,
) -> Subscription {
    Subscription {
        subscription_id: id.into(),
        user_id: user.into(),
        delivery_method: DeliveryMethod::Email,
        aggregation_frequency: frequency,
        aggregation_method: AggregationMethod::Plain,
        delivery_error_strategy: strategy,
        delivery_time: "09:00".into(),
        timezone: "UTC".into(),
        email_address: Some(format!("{user}@x")),
        webhook_url: None,
        enabled: true,
    }
}

fn harness() -> (
    Arc<MemoryEventStore>,
    Arc<RecordingDeliverer>,
    EventProcessor<MemoryEventStore, RecordingDeliverer>,
) {
    let store = Arc::new(MemoryEventStore::new());
    let deliverer = Arc::new(RecordingDeliverer::default());
    let processor = EventProcessor::new(Arc::clone(&store), Arc::clone(&deliverer));
    (store, deliverer, processor)
}

fn single_recipient_payload() -> Vec<u8> {
    serde_json::json!({
        "event_id": "e1",
        "user_id": "u1",
        "subject": "hi",
        "message": "m",
        "sender": "s@x",
        "event_type": "INFO",
        "timestamp": "2024-01-01T00:00:00Z",
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_immediate_email_success_delivers_acks_and_purges() {
    let (store, deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s1",
            "u1",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Retry,
        ))
        .await
        .unwrap();

    let (publisher, mut bus) = MemoryBus::channel();
    publisher.publish(single_recipient_payload());

    let message = bus.next().await.unwrap();
    match processor.process(message.payload()).await {
        Disposition::Ack => message.ack().await,
        Disposition::Nack => message.nack().await,
    }

    let stats = publisher.stats();
    assert_eq!(stats.acked(), 1);
    assert_eq!(stats.nacked(), 0);

    let sends = deliverer.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].subject, "hi");
    assert_eq!(sends[0].body, "m");
    assert_eq!(sends[0].sender, "s@x");
    assert_eq!(sends[0].user_id, "u1");

    // no aggregated subscriptions: nothing left in the store
    assert!(store.get_user_events("u1", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_immediate_plus_daily_retains_event_for_digest() {
    let (store, deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s1",
            "u1",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Retry,
        ))
        .await
        .unwrap();
    let mut daily = subscription(
        "s2",
        "u1",
        AggregationFrequency::Daily,
        DeliveryErrorStrategy::Retry,
    );
    daily.aggregation_method = AggregationMethod::Html;
    store.store_subscription(&daily).await.unwrap();

    let disposition = processor.process(&single_recipient_payload()).await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(deliverer.sends().len(), 1);

    // single recipient: the event keeps the producer's id
    let events = store.get_user_events("u1", None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, "e1");
}

#[tokio::test]
async fn test_fan_out_partial_failure_nacks_and_redelivery_converges() {
    let (store, deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s-u1",
            "u1",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Retry,
        ))
        .await
        .unwrap();
    store
        .store_subscription(&subscription(
            "s-u2",
            "u2",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Ignore,
        ))
        .await
        .unwrap();
    deliverer.fail_subscription("s-u1");

    let payload = serde_json::json!({
        "event_id": "e1",
        "user_id": ["u1", "u2"],
        "subject": "hi",
        "message": "m",
        "sender": "s@x",
        "event_type": "INFO",
        "timestamp": "2024-01-01T00:00:00Z",
    })
    .to_string()
    .into_bytes();

    let (publisher, mut bus) = MemoryBus::channel();
    publisher.publish(payload);

    // first attempt: u1 fails with strategy retry, message is nacked
    let message = bus.next().await.unwrap();
    match processor.process(message.payload()).await {
        Disposition::Ack => message.ack().await,
        Disposition::Nack => message.nack().await,
    }
    assert_eq!(publisher.stats().nacked(), 1);

    // the provider recovers before redelivery
    deliverer.heal_subscription("s-u1");

    let message = bus.next().await.unwrap();
    match processor.process(message.payload()).await {
        Disposition::Ack => message.ack().await,
        Disposition::Nack => message.nack().await,
    }
    assert_eq!(publisher.stats().acked(), 1);

    // u1 was attempted twice (fail then success), u2 exactly once
    assert_eq!(deliverer.sends_for("s-u1"), 2);
    assert_eq!(deliverer.sends_for("s-u2"), 1);

    // immediate-only users end with an empty store
    assert!(store.get_user_events("u1", None).await.unwrap().is_empty());
    assert!(store.get_user_events("u2", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_mode_sends_without_storing() {
    let (store, deliverer, processor) = harness();

    let payload = serde_json::json!({
        "event_id": "e2",
        "email_to": "x@y",
        "subject": "s",
        "message": "m",
        "sender": "a@b",
    })
    .to_string()
    .into_bytes();

    let disposition = processor.process(&payload).await;
    assert_eq!(disposition, Disposition::Ack);

    let sends = deliverer.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].subscription_id, "gateway-x@y");
    assert_eq!(sends[0].subject, "s");
    assert_eq!(sends[0].sender, "a@b");

    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn test_gateway_failure_still_acks() {
    let (store, deliverer, processor) = harness();
    deliverer.fail_subscription("gateway-x@y");

    let payload = serde_json::json!({
        "event_id": "e2",
        "email_to": "x@y",
        "message": "m",
    })
    .to_string()
    .into_bytes();

    assert_eq!(processor.process(&payload).await, Disposition::Ack);
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn test_recipient_without_subscriptions_is_skipped() {
    let (store, deliverer, processor) = harness();

    let disposition = processor.process(&single_recipient_payload()).await;
    assert_eq!(disposition, Disposition::Ack);
    assert!(deliverer.sends().is_empty());
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn test_ignore_strategy_failure_acks_and_keeps_event() {
    let (store, deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s1",
            "u1",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Ignore,
        ))
        .await
        .unwrap();
    deliverer.fail_subscription("s1");

    let disposition = processor.process(&single_recipient_payload()).await;
    assert_eq!(disposition, Disposition::Ack);

    // exactly one attempt, no retry, and the event stays recoverable
    assert_eq!(deliverer.sends_for("s1"), 1);
    let events = store.get_user_events("u1", None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, "e1");
}

#[tokio::test]
async fn test_retry_strategy_failure_nacks_and_rolls_back() {
    let (store, deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s1",
            "u1",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Retry,
        ))
        .await
        .unwrap();
    deliverer.fail_subscription("s1");

    let disposition = processor.process(&single_recipient_payload()).await;
    assert_eq!(disposition, Disposition::Nack);
    assert!(store.get_user_events("u1", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_and_unaddressed_messages_are_discarded() {
    let (store, _deliverer, processor) = harness();

    assert_eq!(processor.process(b"{not json").await, Disposition::Ack);

    let no_addressing = serde_json::json!({"event_id": "e9", "message": "m"})
        .to_string()
        .into_bytes();
    assert_eq!(processor.process(&no_addressing).await, Disposition::Ack);

    let bad_timestamp = serde_json::json!({
        "event_id": "e9",
        "user_id": "u1",
        "timestamp": "not-a-time",
    })
    .to_string()
    .into_bytes();
    assert_eq!(processor.process(&bad_timestamp).await, Disposition::Ack);

    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn test_unknown_event_type_is_stored_as_notification() {
    let (store, _deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s1",
            "u1",
            AggregationFrequency::Daily,
            DeliveryErrorStrategy::Retry,
        ))
        .await
        .unwrap();

    let payload = serde_json::json!({
        "event_id": "e1",
        "user_id": "u1",
        "event_type": "CRITICAL",
        "message": "m",
        "timestamp": "2024-01-01T00:00:00Z",
    })
    .to_string()
    .into_bytes();

    assert_eq!(processor.process(&payload).await, Disposition::Ack);
    let events = store.get_user_events("u1", None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Notification);
}

#[tokio::test]
async fn test_fan_out_stores_one_derived_event_per_recipient() {
    let (store, _deliverer, processor) = harness();
    for user in ["u1", "u2", "u3"] {
        store
            .store_subscription(&subscription(
                &format!("s-{user}"),
                user,
                AggregationFrequency::Hourly,
                DeliveryErrorStrategy::Retry,
            ))
            .await
            .unwrap();
    }

    let payload = serde_json::json!({
        "event_id": "e1",
        "user_id": ["u1", "u2", "u3"],
        "message": "m",
        "event_type": "ALERT",
        "timestamp": "2024-01-01T00:00:00Z",
    })
    .to_string()
    .into_bytes();

    assert_eq!(processor.process(&payload).await, Disposition::Ack);
    for user in ["u1", "u2", "u3"] {
        let events = store.get_user_events(user, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, format!("e1-{user}"));
    }

    // reprocessing the same message converges on the same state
    assert_eq!(processor.process(&payload).await, Disposition::Ack);
    assert_eq!(store.event_count(), 3);
}

#[tokio::test]
async fn test_consumer_loop_drains_messages_and_stops_on_shutdown() {
    let (store, deliverer, processor) = harness();
    store
        .store_subscription(&subscription(
            "s1",
            "u1",
            AggregationFrequency::Immediate,
            DeliveryErrorStrategy::Retry,
        ))
        .await
        .unwrap();

    let (publisher, bus) = MemoryBus::channel();
    publisher.publish(single_recipient_payload());
    let second = serde_json::json!({
        "event_id": "e2",
        "user_id": "u1",
        "subject": "again",
        "message": "m2",
        "sender": "s@x",
        "timestamp": "2024-01-01T00:01:00Z",
    })
    .to_string()
    .into_bytes();
    publisher.publish(second);

    let consumer = BusConsumer::new(Arc::new(processor)).with_max_in_flight(4);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(bus, shutdown_rx).await });

    let stats = publisher.stats();
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while stats.acked() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("messages were not acked in time");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(deliverer.sends().len(), 2);
}
