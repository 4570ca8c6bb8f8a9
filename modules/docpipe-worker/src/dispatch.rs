// Per-message handling and the ack/nack decision.
//
// Ack iff a reply (success or structured error) was published; nack iff the
// envelope would not decode or no reply could be published at all. Nacked
// messages come back per broker policy, so everything here tolerates
// duplicates.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use docpipe_common::{
    salvage_request_id, DocumentMetadata, DocumentResult, ReplyEnvelope, ReplyOutcome,
    RequestEnvelope,
};
use docpipe_engine::{normalize, DocumentEngine, EngineError, EngineRequest, NormalizeError};

use crate::traits::{PayloadFetcher, ReplySink};
use crate::WorkerConfig;

/// What to tell the broker about a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Failures between decode and reply publish. All of them become the text
/// of an error reply.
#[derive(Debug, Error)]
enum ConvertError {
    #[error("payload download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Options(#[from] NormalizeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("internal fault: {0}")]
    Internal(String),
}

pub struct Dispatcher {
    fetcher: Arc<dyn PayloadFetcher>,
    sink: Arc<dyn ReplySink>,
    engine: Arc<dyn DocumentEngine>,
    config: WorkerConfig,
}

impl Dispatcher {
    pub fn new(
        fetcher: Arc<dyn PayloadFetcher>,
        sink: Arc<dyn ReplySink>,
        engine: Arc<dyn DocumentEngine>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            fetcher,
            sink,
            engine,
            config,
        }
    }

    /// Handle one request payload end to end. Never panics, never returns
    /// an error: every fault folds into the disposition.
    pub async fn handle(&self, payload: &[u8]) -> Disposition {
        let envelope = match RequestEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Failed to decode request envelope");
                // Address an error reply if the id is recoverable, then let
                // redelivery have another go.
                if let Some(id) = salvage_request_id(payload) {
                    let reply =
                        ReplyEnvelope::error(id.clone(), format!("invalid request envelope: {err}"));
                    if let Err(publish_err) = self.sink.publish_reply(&reply).await {
                        warn!(request_id = %id, error = %publish_err, "Failed to publish decode-error reply");
                    }
                }
                return Disposition::Nack;
            }
        };

        let id = envelope.request_id.to_string();
        info!(request_id = %id, s3_key = %envelope.s3_key, "Processing request");
        self.sink.publish_status(&id, "received").await;

        let reply = match self.convert(&envelope).await {
            Ok(result) => ReplyEnvelope::success(id.clone(), result),
            Err(err) => {
                warn!(request_id = %id, error = %err, "Conversion failed");
                ReplyEnvelope::error(id.clone(), err.to_string())
            }
        };
        let state = match reply.outcome {
            ReplyOutcome::Success { .. } => "completed",
            ReplyOutcome::Error { .. } => "failed",
        };

        match self.sink.publish_reply(&reply).await {
            Ok(()) => {
                self.sink.publish_status(&id, state).await;
                info!(request_id = %id, state, "Reply published");
                Disposition::Ack
            }
            Err(err) => {
                warn!(request_id = %id, error = %err, "Failed to publish reply");
                Disposition::Nack
            }
        }
    }

    async fn convert(&self, envelope: &RequestEnvelope) -> Result<DocumentResult, ConvertError> {
        let payload = self
            .fetcher
            .fetch(envelope.bucket.as_deref(), &envelope.s3_key)
            .await
            .map_err(|e| ConvertError::Download(e.to_string()))?;

        let config = normalize(envelope.docling_options.as_ref(), self.config.normalizer_mode)?;
        let request = EngineRequest {
            payload: payload.to_vec(),
            extension: extension_of(&envelope.s3_key),
            config,
        };

        // The engine is compute-bound; keep it off the cooperative loop.
        let engine = Arc::clone(&self.engine);
        let conversion = tokio::task::spawn_blocking(move || engine.convert(&request))
            .await
            .map_err(|e| ConvertError::Internal(format!("engine task failed: {e}")))??;

        Ok(DocumentResult {
            text: conversion.text,
            markdown: conversion.markdown,
            structured_data: conversion.structured_data,
            metadata: DocumentMetadata {
                pages: conversion.pages,
                format: conversion.format,
                processed_by: self.config.worker_name.clone(),
            },
        })
    }
}

/// Extension hint from an object key like `raw/<id>.pdf`.
fn extension_of(key: &str) -> String {
    key.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_else(|| "pdf".to_string())
}
