use std::env;
use std::time::Duration;

use crate::error::{Result, S3Error};

const MIB: u64 = 1024 * 1024;

/// S3 connection and transfer configuration.
///
/// Credentials are optional: when unset, the SDK's standard credential chain
/// applies (environment, profile, instance metadata).
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint for S3-compatible stores (MinIO, localstack).
    pub endpoint_url: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,

    /// Uploads larger than this go multi-part.
    pub multipart_threshold: u64,
    pub multipart_part_size: u64,
    pub multipart_concurrency: usize,

    pub presign_expiry: Duration,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: "us-east-1".to_string(),
            bucket: "documents".to_string(),
            access_key_id: None,
            secret_access_key: None,
            multipart_threshold: 100 * MIB,
            multipart_part_size: 8 * MIB,
            multipart_concurrency: 10,
            presign_expiry: Duration::from_secs(3600),
        }
    }
}

impl S3Config {
    /// Load from environment variables. The bucket name is validated before
    /// any I/O happens.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            endpoint_url: env::var("S3_ENDPOINT_URL").ok().filter(|v| !v.is_empty()),
            region: env::var("AWS_DEFAULT_REGION").unwrap_or(defaults.region),
            bucket: env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            access_key_id: env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty()),
            secret_access_key: env::var("AWS_SECRET_ACCESS_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            ..defaults
        };
        config.validated()
    }

    /// Lowercase the bucket name and check it against the AWS naming rules.
    pub fn validated(mut self) -> Result<Self> {
        self.bucket = validate_bucket_name(&self.bucket)?;
        Ok(self)
    }
}

/// Bucket names conform to DNS: 3-63 chars, lowercase letters, digits,
/// hyphens and dots, starting and ending alphanumeric.
pub(crate) fn validate_bucket_name(name: &str) -> Result<String> {
    let name = name.to_lowercase();
    if name.len() < 3 || name.len() > 63 {
        return Err(S3Error::InvalidBucketName(format!(
            "{name:?} must be between 3 and 63 characters"
        )));
    }
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
    let valid_edges = name
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric())
        && name
            .bytes()
            .last()
            .is_some_and(|b| b.is_ascii_alphanumeric());
    if !valid_chars || !valid_edges {
        return Err(S3Error::InvalidBucketName(format!(
            "{name:?} is not a valid DNS-style bucket name"
        )));
    }
    Ok(name)
}

/// Keys are opaque strings, at most 1024 bytes, with no leading slash.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 1024 {
        return Err(S3Error::InvalidKey(format!(
            "key must be 1-1024 bytes, got {}",
            key.len()
        )));
    }
    if key.starts_with('/') {
        return Err(S3Error::InvalidKey(format!(
            "key must not start with '/': {key:?}"
        )));
    }
    Ok(())
}
