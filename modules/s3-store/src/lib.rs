pub mod config;
pub mod error;

pub use config::S3Config;
pub use error::{Result, S3Error};

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::config::validate_key;

const MAX_ATTEMPTS: u32 = 5;

/// Gateway to one bucket of an S3-compatible object store.
///
/// Uploads switch between single-shot and multi-part transfer based on the
/// configured threshold; transient failures retry with exponential backoff.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    config: S3Config,
}

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum PutSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl PutSource {
    async fn len(&self) -> Result<u64> {
        match self {
            PutSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
            PutSource::Bytes(bytes) => Ok(bytes.len() as u64),
        }
    }

    /// Read one part of the source. `size` is pre-clamped to the tail.
    async fn part(&self, offset: u64, size: u64) -> Result<Bytes> {
        match self {
            PutSource::Bytes(bytes) => {
                let start = offset as usize;
                let end = (offset + size) as usize;
                Ok(bytes.slice(start..end))
            }
            PutSource::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buf = Vec::with_capacity(size as usize);
                file.take(size).read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// The single-shot vs multi-part decision, split out so the threshold rule
/// is directly testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    Single,
    Multipart { part_size: u64, parts: u64 },
}

impl TransferPlan {
    pub fn for_len(len: u64, threshold: u64, part_size: u64) -> Self {
        if len <= threshold {
            TransferPlan::Single
        } else {
            TransferPlan::Multipart {
                part_size,
                parts: len.div_ceil(part_size),
            }
        }
    }
}

impl S3Store {
    /// Build the SDK client. Validates the bucket name before any I/O.
    /// Path-style addressing is enabled for custom endpoints (MinIO and
    /// friends do not resolve virtual-hosted buckets).
    pub async fn connect(config: S3Config) -> Result<Self> {
        let config = config.validated()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "s3-store",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if config.endpoint_url.is_some() {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            config,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    /// Probe the bucket and create it only when absent. A 403 on the probe
    /// means the bucket belongs to someone else; creating it would not help.
    pub async fn ensure_bucket(&self) -> Result<()> {
        let bucket = self.config.bucket.clone();
        match self.client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                debug!(%bucket, "Bucket exists");
                Ok(())
            }
            Err(err) => {
                let not_found = err.as_service_error().is_some_and(|e| e.is_not_found());
                let status = err.raw_response().map(|r| r.status().as_u16());
                if not_found || status == Some(404) {
                    self.create_bucket().await
                } else if status == Some(403) {
                    Err(S3Error::AccessDenied(bucket))
                } else {
                    Err(classify(&bucket, err))
                }
            }
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        let bucket = &self.config.bucket;
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 is the canonical region and rejects a location constraint.
        if self.config.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.config.region.as_str()))
                    .build(),
            );
        }
        match request.send().await {
            Ok(_) => {
                info!(%bucket, region = %self.config.region, "Created bucket");
                Ok(())
            }
            Err(err) => {
                // Another client may have created it between probe and create.
                let code = err.code().unwrap_or_default();
                if code == "BucketAlreadyOwnedByYou" || code == "BucketAlreadyExists" {
                    Ok(())
                } else {
                    Err(classify(bucket, err))
                }
            }
        }
    }

    pub async fn put(&self, key: &str, source: PutSource) -> Result<()> {
        validate_key(key)?;
        let len = source.len().await?;
        let plan = TransferPlan::for_len(
            len,
            self.config.multipart_threshold,
            self.config.multipart_part_size,
        );
        match plan {
            TransferPlan::Single => self.put_single(key, &source).await,
            TransferPlan::Multipart { part_size, parts } => {
                self.put_multipart(key, &source, len, part_size, parts).await
            }
        }
    }

    async fn put_single(&self, key: &str, source: &PutSource) -> Result<()> {
        with_retry("put", move || async move {
            let body = match source {
                PutSource::Path(path) => ByteStream::from_path(path)
                    .await
                    .map_err(|e| S3Error::Io(std::io::Error::other(e)))?,
                PutSource::Bytes(bytes) => ByteStream::from(bytes.clone()),
            };
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(|e| classify(key, e))?;
            Ok(())
        })
        .await?;
        debug!(key, "Uploaded object");
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        source: &PutSource,
        len: u64,
        part_size: u64,
        parts: u64,
    ) -> Result<()> {
        info!(key, len, parts, "Starting multi-part upload");
        let upload_id = with_retry("create_multipart_upload", move || async move {
            let out = self
                .client
                .create_multipart_upload()
                .bucket(&self.config.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify(key, e))?;
            out.upload_id().map(str::to_string).ok_or_else(|| S3Error::Api {
                code: "NoUploadId".into(),
                message: "create_multipart_upload returned no upload id".into(),
            })
        })
        .await?;

        match self
            .upload_parts(key, &upload_id, source, len, part_size, parts)
            .await
        {
            Ok(completed) => {
                let completed = &completed;
                let upload_id = upload_id.as_str();
                with_retry("complete_multipart_upload", move || async move {
                    self.client
                        .complete_multipart_upload()
                        .bucket(&self.config.bucket)
                        .key(key)
                        .upload_id(upload_id)
                        .multipart_upload(
                            CompletedMultipartUpload::builder()
                                .set_parts(Some(completed.clone()))
                                .build(),
                        )
                        .send()
                        .await
                        .map_err(|e| classify(key, e))?;
                    Ok(())
                })
                .await?;
                debug!(key, parts, "Completed multi-part upload");
                Ok(())
            }
            Err(err) => {
                // Abandoned parts bill for storage until aborted.
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort_err, "Failed to abort multi-part upload");
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        source: &PutSource,
        len: u64,
        part_size: u64,
        parts: u64,
    ) -> Result<Vec<CompletedPart>> {
        let mut completed: Vec<CompletedPart> = futures::stream::iter(0..parts)
            .map(|index| {
                let offset = index * part_size;
                let size = part_size.min(len - offset);
                let part_number = (index + 1) as i32;
                async move {
                    let body = source.part(offset, size).await?;
                    let etag = with_retry("upload_part", move || {
                        let body = body.clone();
                        async move {
                            let out = self
                                .client
                                .upload_part()
                                .bucket(&self.config.bucket)
                                .key(key)
                                .upload_id(upload_id)
                                .part_number(part_number)
                                .body(ByteStream::from(body))
                                .send()
                                .await
                                .map_err(|e| classify(key, e))?;
                            out.e_tag().map(str::to_string).ok_or_else(|| S3Error::Api {
                                code: "NoETag".into(),
                                message: format!("part {part_number} returned no etag"),
                            })
                        }
                    })
                    .await?;
                    Ok::<CompletedPart, S3Error>(
                        CompletedPart::builder()
                            .part_number(part_number)
                            .e_tag(etag)
                            .build(),
                    )
                }
            })
            .buffer_unordered(self.config.multipart_concurrency)
            .try_collect()
            .await?;
        completed.sort_by_key(|part| part.part_number());
        Ok(completed)
    }

    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let bucket = self.config.bucket.clone();
        self.get_from(&bucket, key).await
    }

    /// Download from an explicit bucket. Request envelopes may name a bucket
    /// other than the configured default.
    pub async fn get_from(&self, bucket: &str, key: &str) -> Result<Bytes> {
        validate_key(key)?;
        let data = with_retry("get", move || async move {
            let out = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify(key, e))?;
            out.body
                .collect()
                .await
                .map(|aggregated| aggregated.into_bytes())
                .map_err(|e| S3Error::Transient {
                    code: "BodyRead".into(),
                    message: e.to_string(),
                })
        })
        .await?;
        debug!(key, size = data.len(), "Downloaded object");
        Ok(data)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        with_retry("delete", move || async move {
            self.client
                .delete_object()
                .bucket(&self.config.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify(key, e))?;
            Ok(())
        })
        .await?;
        debug!(key, "Deleted object");
        Ok(())
    }

    /// Object size, or `None` when the key does not exist.
    pub async fn head(&self, key: &str) -> Result<Option<u64>> {
        validate_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(out.content_length().unwrap_or(0) as u64)),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(None)
                } else {
                    Err(classify(key, err))
                }
            }
        }
    }

    /// URL permitting unauthenticated GET of `key` for `ttl`.
    pub async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        validate_key(key)?;
        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| S3Error::Api {
            code: "Presign".into(),
            message: e.to_string(),
        })?;
        let request = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(request.uri().to_string())
    }
}

/// 200 ms, 400 ms, 800 ms, ... for attempt 0, 1, 2, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(200) * 2u32.saturating_pow(attempt)
}

async fn with_retry<T, F, Fut>(op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(op, attempt, ?delay, error = %err, "Transient S3 failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Map an SDK error to the store's taxonomy, preserving the service code.
fn classify<E>(key: &str, err: SdkError<E>) -> S3Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) {
        return S3Error::Transient {
            code: "Network".into(),
            message: err.to_string(),
        };
    }
    let code = err.code().unwrap_or("Unknown").to_string();
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    if matches!(
        code.as_str(),
        "SlowDown" | "InternalError" | "RequestTimeout" | "ServiceUnavailable"
    ) || status.is_some_and(|s| s >= 500)
    {
        S3Error::Transient { code, message }
    } else if code == "NoSuchKey" || status == Some(404) {
        S3Error::NotFound(key.to_string())
    } else if code == "AccessDenied" || status == Some(403) {
        S3Error::AccessDenied(key.to_string())
    } else {
        S3Error::Api { code, message }
    }
}
