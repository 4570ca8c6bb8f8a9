use std::time::Duration;

use thiserror::Error;

use docpipe_bus::BusError;
use s3_store::S3Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// The client-facing error taxonomy. Callers see exactly two shapes out of
/// submit: a result, or one of these kinds with a readable message.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("request stream is saturated: {0}")]
    Backpressure(String),

    #[error("object store failure: {0}")]
    ObjectStore(#[from] S3Error),

    #[error("broker failure: {0}")]
    Bus(BusError),

    #[error("malformed reply envelope: {0}")]
    Envelope(String),

    /// The worker processed the request and reported a failure.
    #[error("{0}")]
    Worker(String),

    #[error("internal fault: {0}")]
    Internal(String),
}

impl From<BusError> for ClientError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Backpressure { message, .. } => ClientError::Backpressure(message),
            other => ClientError::Bus(other),
        }
    }
}

impl ClientError {
    /// Stable kind tag for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Timeout(_) => "timeout",
            ClientError::Backpressure(_) => "backpressure",
            ClientError::ObjectStore(S3Error::Transient { .. }) => "object_store_transient",
            ClientError::ObjectStore(_) => "object_store",
            ClientError::Bus(_) => "bus",
            ClientError::Envelope(_) => "envelope",
            ClientError::Worker(_) => "worker",
            ClientError::Internal(_) => "internal",
        }
    }
}
