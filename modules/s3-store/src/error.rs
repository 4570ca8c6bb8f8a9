use thiserror::Error;

pub type Result<T> = std::result::Result<T, S3Error>;

#[derive(Debug, Error)]
pub enum S3Error {
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// Retryable failure; surfaced only once the retry budget is spent.
    #[error("transient S3 failure ({code}): {message}")]
    Transient { code: String, message: String },

    #[error("S3 request failed ({code}): {message}")]
    Api { code: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl S3Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, S3Error::Transient { .. })
    }
}
