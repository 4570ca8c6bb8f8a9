// Wire envelopes carried over the broker. Both sides speak UTF-8 JSON and
// tolerate unknown fields so that client and worker can roll independently.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates one request with its reply. UUID v4, so the 122 random bits
/// come from the operating system CSPRNG. Globally unique within the
/// retention window of the request stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Published by the client on `<prefix>.process.<request-id>`.
///
/// The payload itself never rides the broker; `s3_key` points at the
/// uploaded object. `bucket` is optional on the wire, and workers fall back
/// to their configured bucket when it is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub s3_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default)]
    pub docling_options: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl RequestEnvelope {
    pub fn new(
        request_id: RequestId,
        s3_key: String,
        bucket: Option<String>,
        docling_options: Option<serde_json::Value>,
    ) -> Self {
        Self {
            request_id,
            s3_key,
            bucket,
            docling_options,
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Published by the worker on `<prefix>.result.<request-id>`.
///
/// `request_id` is a plain string here: the worker echoes whatever id it
/// could recover, including ids salvaged from envelopes that failed to
/// decode, which need not be well-formed UUIDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReplyOutcome {
    Success { result: DocumentResult },
    Error { error: String },
}

impl ReplyEnvelope {
    pub fn success(request_id: impl Into<String>, result: DocumentResult) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ReplyOutcome::Success { result },
        }
    }

    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ReplyOutcome::Error {
                error: error.into(),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// The converted document inside a success reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub text: String,
    pub markdown: String,
    pub structured_data: Option<serde_json::Value>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub pages: u32,
    pub format: String,
    pub processed_by: String,
}

/// Best-effort extraction of `request_id` from a payload that failed to
/// decode as a [`RequestEnvelope`]. Lets the worker address an error reply
/// even for malformed requests.
pub fn salvage_request_id(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("request_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> DocumentResult {
        DocumentResult {
            text: "Hello world".into(),
            markdown: "Hello world".into(),
            structured_data: Some(json!({"pages": [{"n": 1}]})),
            metadata: DocumentMetadata {
                pages: 1,
                format: "pdf".into(),
                processed_by: "docling_worker".into(),
            },
        }
    }

    #[test]
    fn request_envelope_round_trips() {
        let envelope = RequestEnvelope::new(
            RequestId::generate(),
            "raw/abc.pdf".into(),
            Some("documents".into()),
            Some(json!({"do_ocr": true})),
        );
        let decoded = RequestEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn request_envelope_optionals_default() {
        let bytes = json!({
            "request_id": "b9f1c2aa-13de-4a9c-9c9e-2f6a7b8c9d0e",
            "s3_key": "raw/x.pdf",
            "timestamp": "2024-05-01T12:00:00Z"
        })
        .to_string();
        let envelope = RequestEnvelope::decode(bytes.as_bytes()).unwrap();
        assert_eq!(envelope.bucket, None);
        assert_eq!(envelope.docling_options, None);
    }

    #[test]
    fn request_envelope_tolerates_unknown_fields() {
        let bytes = json!({
            "request_id": "b9f1c2aa-13de-4a9c-9c9e-2f6a7b8c9d0e",
            "s3_key": "raw/x.pdf",
            "timestamp": "2024-05-01T12:00:00Z",
            "file_size": 4096,
            "s3_url": "https://example.com/x"
        })
        .to_string();
        assert!(RequestEnvelope::decode(bytes.as_bytes()).is_ok());
    }

    #[test]
    fn reply_envelope_success_shape() {
        let reply = ReplyEnvelope::success("abc", sample_result());
        let value: serde_json::Value =
            serde_json::from_slice(&reply.encode().unwrap()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["request_id"], "abc");
        assert_eq!(value["result"]["metadata"]["pages"], 1);
        assert_eq!(ReplyEnvelope::decode(&reply.encode().unwrap()).unwrap(), reply);
    }

    #[test]
    fn reply_envelope_error_shape() {
        let reply = ReplyEnvelope::error("abc", "parse failure: bad header");
        let value: serde_json::Value =
            serde_json::from_slice(&reply.encode().unwrap()).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "parse failure: bad header");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn request_ids_are_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn salvage_finds_id_in_malformed_envelope() {
        // Missing required s3_key, so decode fails, but the id is present.
        let bytes = json!({"request_id": "not-a-uuid-but-present"}).to_string();
        assert!(RequestEnvelope::decode(bytes.as_bytes()).is_err());
        assert_eq!(
            salvage_request_id(bytes.as_bytes()).as_deref(),
            Some("not-a-uuid-but-present")
        );
    }

    #[test]
    fn salvage_gives_up_on_junk() {
        assert_eq!(salvage_request_id(b"not json at all"), None);
        assert_eq!(salvage_request_id(b"{\"other\": 1}"), None);
    }
}
