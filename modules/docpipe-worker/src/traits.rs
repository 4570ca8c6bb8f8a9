// Trait abstractions for the dispatcher's two I/O dependencies.
//
// PayloadFetcher hides the object store; ReplySink hides the broker's
// result side. Both have mocks in `testing`, so the ack/nack decision table
// is testable without NATS or S3.

use async_trait::async_trait;
use bytes::Bytes;

use docpipe_bus::{Bus, BusError};
use docpipe_common::ReplyEnvelope;
use s3_store::{S3Error, S3Store};

#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    /// Download a payload, from `bucket` when the envelope names one, else
    /// from the configured default.
    async fn fetch(&self, bucket: Option<&str>, key: &str) -> Result<Bytes, S3Error>;
}

#[async_trait]
impl PayloadFetcher for S3Store {
    async fn fetch(&self, bucket: Option<&str>, key: &str) -> Result<Bytes, S3Error> {
        match bucket {
            Some(bucket) => self.get_from(bucket, key).await,
            None => self.get(key).await,
        }
    }
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn publish_reply(&self, reply: &ReplyEnvelope) -> Result<(), BusError>;

    /// Best-effort observer event; implementations must not fail.
    async fn publish_status(&self, request_id: &str, state: &str);
}

/// Publishes replies through JetStream, lazily ensuring the result stream
/// the first time. The client may or may not have created it already; the
/// idempotent ensure resolves the race either way.
pub struct JetStreamSink {
    bus: Bus,
    ensured: tokio::sync::OnceCell<()>,
}

impl JetStreamSink {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            ensured: tokio::sync::OnceCell::new(),
        }
    }
}

#[async_trait]
impl ReplySink for JetStreamSink {
    async fn publish_reply(&self, reply: &ReplyEnvelope) -> Result<(), BusError> {
        self.ensured
            .get_or_try_init(|| async { self.bus.ensure_result_stream().await.map(|_| ()) })
            .await?;
        self.bus.publish_reply(reply).await
    }

    async fn publish_status(&self, request_id: &str, state: &str) {
        self.bus.publish_status(request_id, state).await;
    }
}
