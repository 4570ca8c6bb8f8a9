pub mod config;
pub mod envelope;

pub use config::{NatsConfig, NormalizerMode, ProcessingConfig};
pub use envelope::{
    salvage_request_id, DocumentMetadata, DocumentResult, ReplyEnvelope, ReplyOutcome,
    RequestEnvelope, RequestId,
};
