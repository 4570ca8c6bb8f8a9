pub mod dispatch;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use dispatch::{Dispatcher, Disposition};
pub use traits::{JetStreamSink, PayloadFetcher, ReplySink};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use docpipe_bus::{Bus, BusError};
use docpipe_common::NormalizerMode;
use docpipe_engine::DocumentEngine;
use s3_store::S3Store;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Durable consumer name, shared by every instance of this worker
    /// class; also stamped into result metadata as `processed_by`.
    pub worker_name: String,
    /// How long one pull waits before coming back empty.
    pub fetch_expiry: Duration,
    pub normalizer_mode: NormalizerMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: "docling_worker".to_string(),
            fetch_expiry: Duration::from_secs(10),
            normalizer_mode: NormalizerMode::Permissive,
        }
    }
}

/// The dispatch loop: pull one message at a time off the shared durable
/// consumer, hand it to the dispatcher, ack or nack. Per-request faults
/// never terminate the loop; only the shutdown signal does.
pub struct Worker {
    bus: Bus,
    dispatcher: Dispatcher,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        bus: Bus,
        store: S3Store,
        engine: Arc<dyn DocumentEngine>,
        config: WorkerConfig,
    ) -> Self {
        let sink = Arc::new(JetStreamSink::new(bus.clone()));
        let dispatcher = Dispatcher::new(Arc::new(store), sink, engine, config.clone());
        Self {
            bus,
            dispatcher,
            config,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        self.bus.ensure_request_stream().await?;
        let consumer = self.bus.worker_consumer(&self.config.worker_name).await?;
        info!(
            worker = %self.config.worker_name,
            subject = %self.bus.config().process_wildcard(),
            "Worker listening"
        );

        let mut processed = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                fetched = Bus::fetch_one(&consumer, self.config.fetch_expiry) => match fetched {
                    Ok(Some(message)) => {
                        let disposition = self.dispatcher.handle(&message.payload).await;
                        let acked = match disposition {
                            Disposition::Ack => Bus::ack(&message).await,
                            Disposition::Nack => Bus::nack(&message).await,
                        };
                        if let Err(err) = acked {
                            warn!(error = %err, ?disposition, "Failed to settle message");
                        }
                        processed += 1;
                        debug!(processed, "Request handled");
                    }
                    Ok(None) => {
                        debug!("No messages, waiting");
                    }
                    Err(err) => {
                        warn!(error = %err, "Fetch failed");
                        // Keep a broker outage from becoming a tight loop.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }

        info!(processed, "Worker stopped");
        Ok(())
    }
}
