pub mod error;

pub use error::{BusError, Result};

use std::time::Duration;

use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{self, DiscardPolicy, RetentionPolicy, StorageType};
use async_nats::{jetstream, ConnectOptions};
use futures::StreamExt;
use tracing::{debug, info, warn};

use docpipe_common::{NatsConfig, ReplyEnvelope, RequestEnvelope};

pub use async_nats::jetstream::AckKind;
pub use async_nats::jetstream::Message;

/// Pull consumer handle as used throughout the service.
pub type PullConsumer = jetstream::consumer::Consumer<pull::Config>;

const MAX_STREAM_MESSAGES: i64 = 1000;
const MAX_STREAM_BYTES: i64 = 100 * 1024 * 1024;
const RESULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Connection to the broker plus the stream and consumer lifecycle around it.
#[derive(Clone)]
pub struct Bus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl Bus {
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        let options = match &config.token {
            Some(token) => ConnectOptions::with_token(token.clone()),
            None => ConnectOptions::new(),
        };
        let client = options
            .connection_timeout(config.connect_timeout)
            .max_reconnects(config.max_reconnect_attempts)
            .connect(config.url.as_str())
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());
        info!(url = %config.url, "Connected to NATS");
        Ok(Self {
            client,
            jetstream,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    fn storage(&self) -> StorageType {
        if self.config.file_storage {
            StorageType::File
        } else {
            StorageType::Memory
        }
    }

    /// Work-queue stream carrying request envelopes; messages leave the
    /// stream once a worker acks them.
    fn request_stream_config(&self) -> stream::Config {
        stream::Config {
            name: self.config.request_stream().to_string(),
            subjects: vec![self.config.process_wildcard()],
            retention: RetentionPolicy::WorkQueue,
            storage: self.storage(),
            max_messages: MAX_STREAM_MESSAGES,
            max_bytes: MAX_STREAM_BYTES,
            discard: DiscardPolicy::New,
            ..Default::default()
        }
    }

    /// Time-bounded stream carrying reply envelopes; replies nobody reads
    /// expire after an hour.
    fn result_stream_config(&self) -> stream::Config {
        stream::Config {
            name: self.config.result_stream(),
            subjects: vec![self.config.result_wildcard()],
            retention: RetentionPolicy::Limits,
            storage: self.storage(),
            max_messages: MAX_STREAM_MESSAGES,
            max_bytes: MAX_STREAM_BYTES,
            max_age: RESULT_MAX_AGE,
            ..Default::default()
        }
    }

    pub async fn ensure_request_stream(&self) -> Result<stream::Stream> {
        self.ensure_stream(self.request_stream_config()).await
    }

    pub async fn ensure_result_stream(&self) -> Result<stream::Stream> {
        self.ensure_stream(self.result_stream_config()).await
    }

    /// Idempotent stream creation. An existing stream with an equivalent
    /// configuration is success; a divergent one is an error. Creation races
    /// between client and worker resolve by re-reading.
    async fn ensure_stream(&self, wanted: stream::Config) -> Result<stream::Stream> {
        let name = wanted.name.clone();
        match self.jetstream.get_stream(&name).await {
            Ok(existing) => {
                if stream_matches(&existing.cached_info().config, &wanted) {
                    Ok(existing)
                } else {
                    Err(BusError::StreamDiverged { name })
                }
            }
            Err(_) => match self.jetstream.create_stream(wanted.clone()).await {
                Ok(created) => {
                    info!(stream = %name, "Created stream");
                    Ok(created)
                }
                Err(create_err) => match self.jetstream.get_stream(&name).await {
                    Ok(existing) if stream_matches(&existing.cached_info().config, &wanted) => {
                        Ok(existing)
                    }
                    Ok(_) => Err(BusError::StreamDiverged { name }),
                    Err(_) => Err(BusError::Stream {
                        name,
                        message: create_err.to_string(),
                    }),
                },
            },
        }
    }

    /// Per-request reply consumer. Durable name equals the request id so a
    /// reconnecting client can recover it within the result retention
    /// window; created BEFORE the request publish so the worker cannot win
    /// the race.
    pub async fn result_consumer(&self, request_id: &str) -> Result<PullConsumer> {
        let stream = self.ensure_result_stream().await?;
        let config = pull::Config {
            durable_name: Some(request_id.to_string()),
            filter_subject: self.config.result_subject(request_id),
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        };
        stream
            .get_or_create_consumer(request_id, config)
            .await
            .map_err(|e| BusError::Consumer {
                stream: self.config.result_stream(),
                message: e.to_string(),
            })
    }

    /// Shared durable consumer on the request stream. Worker instances
    /// passing the same name compete for messages.
    pub async fn worker_consumer(&self, durable_name: &str) -> Result<PullConsumer> {
        let stream = self.ensure_request_stream().await?;
        let config = pull::Config {
            durable_name: Some(durable_name.to_string()),
            filter_subject: self.config.process_wildcard(),
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        };
        stream
            .get_or_create_consumer(durable_name, config)
            .await
            .map_err(|e| BusError::Consumer {
                stream: self.config.request_stream().to_string(),
                message: e.to_string(),
            })
    }

    /// Guarded teardown of a per-request consumer. Failures are logged and
    /// suppressed so cleanup never masks the primary outcome.
    pub async fn drop_result_consumer(&self, request_id: &str) {
        let stream_name = self.config.result_stream();
        match self.jetstream.get_stream(&stream_name).await {
            Ok(stream) => {
                if let Err(err) = stream.delete_consumer(request_id).await {
                    warn!(request_id, error = %err, "Failed to delete reply consumer");
                } else {
                    debug!(request_id, "Dropped reply consumer");
                }
            }
            Err(err) => {
                warn!(request_id, error = %err, "Result stream unreachable during consumer teardown");
            }
        }
    }

    /// Fetch at most one message, waiting up to `expires`.
    pub async fn fetch_one(consumer: &PullConsumer, expires: Duration) -> Result<Option<Message>> {
        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .expires(expires)
            .messages()
            .await
            .map_err(|e| BusError::Fetch(e.to_string()))?;
        match messages.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(BusError::Fetch(err.to_string())),
            None => Ok(None),
        }
    }

    pub async fn ack(message: &Message) -> Result<()> {
        message
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    /// Negative-acknowledge for redelivery per broker policy.
    pub async fn nack(message: &Message) -> Result<()> {
        message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    pub async fn publish_request(&self, envelope: &RequestEnvelope) -> Result<()> {
        let subject = self.config.process_subject(&envelope.request_id.to_string());
        self.publish_durable(subject, envelope.encode()?).await
    }

    pub async fn publish_reply(&self, reply: &ReplyEnvelope) -> Result<()> {
        let subject = self.config.result_subject(&reply.request_id);
        self.publish_durable(subject, reply.encode()?).await
    }

    async fn publish_durable(&self, subject: String, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| classify_publish(&subject, e.to_string()))?;
        ack.await
            .map_err(|e| classify_publish(&subject, e.to_string()))?;
        debug!(subject, "Published");
        Ok(())
    }

    /// Fire-and-forget status event on the reserved observer subject.
    /// Core NATS, not a stream: observers that are not listening miss it.
    pub async fn publish_status(&self, request_id: &str, state: &str) {
        let subject = self.config.status_subject(request_id);
        let payload = serde_json::json!({
            "request_id": request_id,
            "state": state,
        })
        .to_string();
        if let Err(err) = self.client.publish(subject.clone(), payload.into()).await {
            debug!(subject, error = %err, "Status event dropped");
        }
    }
}

/// Compare the parts of a stream configuration this service cares about.
fn stream_matches(existing: &stream::Config, wanted: &stream::Config) -> bool {
    existing.subjects == wanted.subjects
        && existing.retention == wanted.retention
        && existing.storage == wanted.storage
        && existing.max_messages == wanted.max_messages
        && existing.max_bytes == wanted.max_bytes
        && existing.max_age == wanted.max_age
}

/// A refused publish on a saturated stream is backpressure, not a transport
/// fault; the caller has to react differently.
fn classify_publish(subject: &str, message: String) -> BusError {
    let lowered = message.to_lowercase();
    if lowered.contains("maximum messages")
        || lowered.contains("maximum bytes")
        || lowered.contains("resource limits")
    {
        BusError::Backpressure {
            subject: subject.to_string(),
            message,
        }
    } else {
        BusError::Publish {
            subject: subject.to_string(),
            message,
        }
    }
}
