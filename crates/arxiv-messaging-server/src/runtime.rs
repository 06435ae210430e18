use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use arxiv_messaging_core::{Clock, SystemClock};
use arxiv_messaging_db_memory::MemoryEventStore;
use arxiv_messaging_ingest::{BusConsumer, EventProcessor, MemoryBus};
use arxiv_messaging_notifications::{DeliveryService, DigestScheduler};

use crate::config::AppConfig;

fn report_exit(name: &str, outcome: Result<(), JoinError>) {
    match outcome {
        Ok(()) => tracing::info!("{name} exited gracefully"),
        Err(e) => tracing::error!(error = %e, "{name} task failed"),
    }
}

/// Wire the configured activities together and run until a shutdown signal.
///
/// The store and bus are bound here at the composition root: this binary
/// wires the in-process backends, while deployment-specific transports
/// (Pub/Sub pull, Firestore) implement the same traits outside this
/// codebase.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemoryEventStore::new());
    let delivery = Arc::new(DeliveryService::new(config.smtp.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers: Vec<(&str, JoinHandle<()>)> = Vec::new();

    if config.service_mode.runs_ingest() {
        let processor = Arc::new(EventProcessor::new(Arc::clone(&store), Arc::clone(&delivery)));
        let consumer = BusConsumer::new(processor);
        let (publisher, subscriber) = MemoryBus::channel();
        let shutdown = shutdown_rx.clone();
        tracing::info!(
            subscription = %config.subscription_name,
            "starting bus consumer"
        );
        workers.push((
            "bus consumer",
            tokio::spawn(async move {
                consumer.run(subscriber, shutdown).await;
                drop(publisher);
            }),
        ));
    }

    if config.service_mode.runs_scheduler() {
        let scheduler = DigestScheduler::new(
            Arc::clone(&store),
            Arc::clone(&delivery),
            Arc::clone(&clock),
        );
        let shutdown = shutdown_rx.clone();
        workers.push((
            "digest scheduler",
            tokio::spawn(async move { scheduler.run(shutdown).await }),
        ));
    }

    tracing::info!(
        project_id = %config.project_id,
        database_id = %config.database_id,
        service_mode = %config.service_mode,
        "arXiv messaging service running"
    );

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for (name, handle) in workers {
        report_exit(name, handle.await);
    }
    Ok(())
}
