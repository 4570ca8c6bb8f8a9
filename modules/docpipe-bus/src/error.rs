use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to NATS: {0}")]
    Connect(String),

    #[error("stream {name} error: {message}")]
    Stream { name: String, message: String },

    /// An existing stream's configuration differs from the requested one.
    /// Never silently reshaped; an operator has to resolve the divergence.
    #[error("stream {name} exists with a different configuration")]
    StreamDiverged { name: String },

    #[error("consumer error on stream {stream}: {message}")]
    Consumer { stream: String, message: String },

    /// The stream refused the publish because its limits are exhausted.
    #[error("publish refused on {subject}: {message}")]
    Backpressure { subject: String, message: String },

    #[error("failed to publish on {subject}: {message}")]
    Publish { subject: String, message: String },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("acknowledgement failed: {0}")]
    Ack(String),

    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
