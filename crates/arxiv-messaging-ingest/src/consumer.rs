use std::sync::Arc;

use tokio::sync::{Semaphore, watch};

use arxiv_messaging_notifications::Deliverer;
use arxiv_messaging_storage::EventStore;

use crate::bus::BusSubscriber;
use crate::processor::{Disposition, EventProcessor};

/// Flow-control window: messages pulled but not yet acked/nacked.
pub const MAX_IN_FLIGHT: usize = 100;

/// Pull loop over a bus subscription. Each message is handled on its own
/// task inside a bounded in-flight window; on shutdown the loop stops
/// pulling and drains in-flight handlers so every message is acked or nacked
/// before exit.
pub struct BusConsumer<S, D> {
    processor: Arc<EventProcessor<S, D>>,
    max_in_flight: usize,
}

impl<S, D> BusConsumer<S, D>
where
    S: EventStore + 'static,
    D: Deliverer + 'static,
{
    pub fn new(processor: Arc<EventProcessor<S, D>>) -> Self {
        Self {
            processor,
            max_in_flight: MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub async fn run<B: BusSubscriber>(&self, mut bus: B, mut shutdown: watch::Receiver<bool>) {
        let in_flight = Arc::new(Semaphore::new(self.max_in_flight));
        tracing::info!(max_in_flight = self.max_in_flight, "bus consumer started");

        loop {
            // Take a permit before pulling so the window bounds the pull
            // itself, not just the processing.
            let permit = tokio::select! {
                permit = in_flight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let message = tokio::select! {
                message = bus.next() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };

            let processor = Arc::clone(&self.processor);
            tokio::spawn(async move {
                let disposition = processor.process(message.payload()).await;
                match disposition {
                    Disposition::Ack => message.ack().await,
                    Disposition::Nack => message.nack().await,
                }
                drop(permit);
            });
        }

        // Every in-flight handler acks or nacks before releasing its permit;
        // waiting for the full window means nothing is silently dropped.
        let _ = in_flight.acquire_many(self.max_in_flight as u32).await;
        tracing::info!("bus consumer stopped");
    }
}
