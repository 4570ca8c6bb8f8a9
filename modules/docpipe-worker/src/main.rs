use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docpipe_bus::Bus;
use docpipe_common::NatsConfig;
use docpipe_engine::PdfTextEngine;
use docpipe_worker::{Worker, WorkerConfig};
use s3_store::{S3Config, S3Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("docpipe_worker=info".parse()?),
        )
        .init();

    info!("Docpipe worker starting...");

    let nats_config = NatsConfig::from_env();
    let s3_config = S3Config::from_env()?;

    let bus = Bus::connect(&nats_config).await?;
    let store = S3Store::connect(s3_config).await?;
    store.ensure_bucket().await?;

    let worker = Worker::new(
        bus,
        store,
        Arc::new(PdfTextEngine),
        WorkerConfig::default(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await?;
    Ok(())
}
