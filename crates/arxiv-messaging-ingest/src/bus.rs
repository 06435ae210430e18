use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One in-flight bus message. The transport guarantees at-least-once
/// delivery: a message must be acked or nacked exactly once, and a nack puts
/// it back in line for redelivery.
#[async_trait]
pub trait IncomingMessage: Send {
    fn payload(&self) -> &[u8];

    /// Confirm processing; the transport will not redeliver.
    async fn ack(self: Box<Self>);

    /// Reject processing; the transport redelivers the whole message.
    async fn nack(self: Box<Self>);
}

/// Source of bus messages. `next` resolves when a message is available and
/// returns `None` once the transport is closed.
#[async_trait]
pub trait BusSubscriber: Send {
    async fn next(&mut self) -> Option<Box<dyn IncomingMessage>>;
}

/// Ack/nack counters, observable from tests and health reporting.
#[derive(Debug, Default)]
pub struct BusStats {
    acked: AtomicUsize,
    nacked: AtomicUsize,
}

impl BusStats {
    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> usize {
        self.nacked.load(Ordering::SeqCst)
    }
}

struct QueuedMessage {
    payload: Vec<u8>,
    attempt: u32,
}

/// In-process bus with real ack/nack semantics: nacked messages are requeued
/// and redelivered with an incremented attempt counter. Used by tests and
/// single-process deployments; production transports implement the same pair
/// of traits.
pub struct MemoryBus;

impl MemoryBus {
    pub fn channel() -> (MemoryPublisher, MemorySubscriber) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(BusStats::default());
        (
            MemoryPublisher {
                tx: tx.clone(),
                stats: Arc::clone(&stats),
            },
            MemorySubscriber { tx, rx, stats },
        )
    }
}

#[derive(Clone)]
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<QueuedMessage>,
    stats: Arc<BusStats>,
}

impl MemoryPublisher {
    /// Enqueue a payload for delivery. Returns `false` when the subscriber
    /// side is gone.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> bool {
        self.tx
            .send(QueuedMessage {
                payload: payload.into(),
                attempt: 1,
            })
            .is_ok()
    }

    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }
}

pub struct MemorySubscriber {
    tx: mpsc::UnboundedSender<QueuedMessage>,
    rx: mpsc::UnboundedReceiver<QueuedMessage>,
    stats: Arc<BusStats>,
}

impl MemorySubscriber {
    /// Messages currently waiting for delivery.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[async_trait]
impl BusSubscriber for MemorySubscriber {
    async fn next(&mut self) -> Option<Box<dyn IncomingMessage>> {
        let queued = self.rx.recv().await?;
        Some(Box::new(MemoryMessage {
            queued,
            requeue: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MemoryMessage {
    queued: QueuedMessage,
    requeue: mpsc::UnboundedSender<QueuedMessage>,
    stats: Arc<BusStats>,
}

#[async_trait]
impl IncomingMessage for MemoryMessage {
    fn payload(&self) -> &[u8] {
        &self.queued.payload
    }

    async fn ack(self: Box<Self>) {
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
    }

    async fn nack(self: Box<Self>) {
        self.stats.nacked.fetch_add(1, Ordering::SeqCst);
        let redelivery = QueuedMessage {
            payload: self.queued.payload,
            attempt: self.queued.attempt + 1,
        };
        if self.requeue.send(redelivery).is_err() {
            tracing::warn!("memory bus closed, nacked message dropped");
        }
    }
}
