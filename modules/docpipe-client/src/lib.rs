// Client side of the correlation protocol. One submit call walks
//
//   upload -> subscribe -> publish -> reply | timeout -> cleanup
//
// with the ephemeral consumer torn down on every exit path and the payload
// object deleted on error when so configured.

pub mod error;

pub use error::{ClientError, Result};

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use docpipe_bus::{Bus, PullConsumer};
use docpipe_common::{
    DocumentResult, NatsConfig, ProcessingConfig, ReplyEnvelope, ReplyOutcome, RequestEnvelope,
    RequestId,
};
use s3_store::{PutSource, S3Config, S3Store};

/// A document to submit: a file on disk or an in-memory buffer.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl DocumentSource {
    pub fn path(path: impl AsRef<Path>) -> Self {
        Self::Path(path.as_ref().to_path_buf())
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    /// Extension used in the object key. Buffers are assumed to be PDF,
    /// matching the service's primary format.
    fn extension(&self) -> String {
        match self {
            Self::Path(path) => path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_lowercase())
                .unwrap_or_else(|| "pdf".to_string()),
            Self::Bytes(_) => "pdf".to_string(),
        }
    }

    fn into_put_source(self) -> PutSource {
        match self {
            Self::Path(path) => PutSource::Path(path),
            Self::Bytes(data) => PutSource::Bytes(data),
        }
    }
}

/// Size and location of a stored named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub key: String,
    pub size: u64,
}

pub struct DocumentClient {
    bus: Bus,
    store: S3Store,
    processing: ProcessingConfig,
}

impl DocumentClient {
    /// Connect broker and object store, and make sure the bucket exists.
    pub async fn connect(
        nats: NatsConfig,
        s3: S3Config,
        processing: ProcessingConfig,
    ) -> Result<Self> {
        let bus = Bus::connect(&nats).await?;
        let store = S3Store::connect(s3).await?;
        store.ensure_bucket().await?;
        info!("Document client connected");
        Ok(Self {
            bus,
            store,
            processing,
        })
    }

    pub fn processing(&self) -> &ProcessingConfig {
        &self.processing
    }

    /// Submit a document and wait for the worker's reply, using the
    /// configured timeout.
    pub async fn submit(
        &self,
        source: DocumentSource,
        options: Option<serde_json::Value>,
    ) -> Result<DocumentResult> {
        self.submit_with_timeout(source, options, self.processing.timeout)
            .await
    }

    pub async fn submit_with_timeout(
        &self,
        source: DocumentSource,
        options: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<DocumentResult> {
        let request_id = RequestId::generate();
        let key = format!("raw/{request_id}.{}", source.extension());

        self.store.put(&key, source.into_put_source()).await?;
        info!(%request_id, key, "Uploaded payload");

        let outcome = self
            .exchange(&request_id, &key, Some(self.store.bucket().to_string()), options, timeout)
            .await;

        if outcome.is_err() && self.processing.cleanup_on_error {
            self.cleanup_payload(&key).await;
        }
        outcome
    }

    /// Run the correlation protocol against a payload that is already in the
    /// bucket. The caller owns the object; it is never deleted here.
    pub async fn process_stored(
        &self,
        key: &str,
        options: Option<serde_json::Value>,
    ) -> Result<DocumentResult> {
        let request_id = RequestId::generate();
        self.exchange(
            &request_id,
            key,
            Some(self.store.bucket().to_string()),
            options,
            self.processing.timeout,
        )
        .await
    }

    /// Subscribe, publish, wait; the ephemeral consumer is dropped on every
    /// exit path, including publish failure and timeout.
    async fn exchange(
        &self,
        request_id: &RequestId,
        key: &str,
        bucket: Option<String>,
        options: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<DocumentResult> {
        let id = request_id.to_string();
        let consumer = self.bus.result_consumer(&id).await?;
        debug!(request_id = %id, "Reply consumer ready");

        let result = self
            .publish_and_wait(&consumer, request_id, key, bucket, options, timeout)
            .await;

        self.bus.drop_result_consumer(&id).await;
        result
    }

    async fn publish_and_wait(
        &self,
        consumer: &PullConsumer,
        request_id: &RequestId,
        key: &str,
        bucket: Option<String>,
        options: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<DocumentResult> {
        let envelope =
            RequestEnvelope::new(request_id.clone(), key.to_string(), bucket, options);
        self.bus.publish_request(&envelope).await?;
        debug!(request_id = %request_id, "Request published, waiting for reply");

        let message = Bus::fetch_one(consumer, timeout)
            .await?
            .ok_or(ClientError::Timeout(timeout))?;

        // Teardown discards any duplicate the worker may publish after a
        // redelivery; the first reply wins.
        if let Err(err) = Bus::ack(&message).await {
            warn!(request_id = %request_id, error = %err, "Failed to ack reply");
        }

        let reply = ReplyEnvelope::decode(&message.payload)
            .map_err(|e| ClientError::Envelope(e.to_string()))?;
        let expected = request_id.to_string();
        if reply.request_id != expected {
            return Err(ClientError::Internal(format!(
                "reply correlation mismatch: expected {expected}, got {}",
                reply.request_id
            )));
        }

        match reply.outcome {
            ReplyOutcome::Success { result } => {
                info!(request_id = %request_id, pages = result.metadata.pages, "Processing complete");
                Ok(result)
            }
            ReplyOutcome::Error { error } => Err(ClientError::Worker(error)),
        }
    }

    /// Best-effort removal of the uploaded payload after a failed submit.
    async fn cleanup_payload(&self, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            warn!(key, error = %err, "Payload cleanup failed");
        } else {
            debug!(key, "Cleaned up payload");
        }
    }

    // ------------------------------------------------------------------
    // Named resources: documents stored under a caller-chosen id, outside
    // the per-request raw/ namespace.
    // ------------------------------------------------------------------

    /// Store a document under `documents/<resource-id>.pdf` and return the
    /// object key.
    pub async fn store_document(&self, resource_id: &str, content: Bytes) -> Result<String> {
        let key = format!("documents/{resource_id}.pdf");
        self.store.put(&key, PutSource::Bytes(content)).await?;
        info!(key, "Stored document");
        Ok(key)
    }

    pub async fn fetch_document(&self, key: &str) -> Result<Bytes> {
        Ok(self.store.get(key).await?)
    }

    /// Existence and size of a stored document.
    pub async fn document_info(&self, key: &str) -> Result<Option<DocumentInfo>> {
        let size = self.store.head(key).await?;
        Ok(size.map(|size| DocumentInfo {
            key: key.to_string(),
            size,
        }))
    }

    /// URL permitting unauthenticated download of a stored object.
    pub async fn presign_document(&self, key: &str) -> Result<String> {
        Ok(self
            .store
            .presign_get(key, self.store.config().presign_expiry)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_source_extension_comes_from_filename() {
        assert_eq!(DocumentSource::path("/tmp/report.PDF").extension(), "pdf");
        assert_eq!(DocumentSource::path("/tmp/page.html").extension(), "html");
        assert_eq!(DocumentSource::path("/tmp/no_extension").extension(), "pdf");
    }

    #[test]
    fn bytes_source_defaults_to_pdf() {
        assert_eq!(
            DocumentSource::bytes(Bytes::from_static(b"%PDF-")).extension(),
            "pdf"
        );
    }

    #[test]
    fn object_keys_are_namespaced() {
        let id = RequestId::generate();
        let key = format!("raw/{id}.pdf");
        assert!(key.starts_with("raw/"));
        assert!(key.ends_with(".pdf"));
    }
}
