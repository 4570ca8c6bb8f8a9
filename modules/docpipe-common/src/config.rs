use std::env;
use std::time::Duration;

/// Broker configuration, loaded from environment variables.
///
/// Stream and subject names are derived from `stream_name` and
/// `subject_prefix` so that several deployments can share one NATS cluster
/// without colliding.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: usize,
    pub stream_name: String,
    pub subject_prefix: String,
    /// Streams default to memory storage; operators wanting durability
    /// across broker restarts can elect file storage.
    pub file_storage: bool,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            stream_name: "DOCUMENTS".to_string(),
            subject_prefix: "docs".to_string(),
            file_storage: false,
        }
    }
}

impl NatsConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("NATS_URL").unwrap_or(defaults.url),
            token: env::var("NATS_TOKEN").ok().filter(|t| !t.is_empty()),
            connect_timeout: env::var("NATS_CONNECT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            max_reconnect_attempts: env::var("NATS_MAX_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_reconnect_attempts),
            stream_name: defaults.stream_name,
            subject_prefix: defaults.subject_prefix,
            file_storage: defaults.file_storage,
        }
    }

    /// Connection URL with the token spliced in when one is configured:
    /// `nats://<token>@host:port`.
    pub fn connection_url(&self) -> String {
        match &self.token {
            Some(token) => {
                let rest = self.url.strip_prefix("nats://").unwrap_or(&self.url);
                format!("nats://{token}@{rest}")
            }
            None => self.url.clone(),
        }
    }

    /// Name of the work-queue stream carrying request envelopes.
    pub fn request_stream(&self) -> &str {
        &self.stream_name
    }

    /// Name of the time-bounded stream carrying reply envelopes.
    pub fn result_stream(&self) -> String {
        format!("{}_results", self.stream_name)
    }

    pub fn process_subject(&self, request_id: &str) -> String {
        format!("{}.process.{request_id}", self.subject_prefix)
    }

    pub fn result_subject(&self, request_id: &str) -> String {
        format!("{}.result.{request_id}", self.subject_prefix)
    }

    /// Reserved observer surface; see the status events on the worker.
    pub fn status_subject(&self, request_id: &str) -> String {
        format!("{}.status.{request_id}", self.subject_prefix)
    }

    pub fn process_wildcard(&self) -> String {
        self.process_subject("*")
    }

    pub fn result_wildcard(&self) -> String {
        self.result_subject("*")
    }
}

/// What to do when the options descriptor cannot be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizerMode {
    /// Fall back to the default pipeline configuration with a warning.
    #[default]
    Permissive,
    /// Reject the request with a deterministic error.
    Strict,
}

/// Client-side processing knobs.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Wall-clock budget for one submit call.
    pub timeout: Duration,
    /// Delete the uploaded payload when submit fails.
    pub cleanup_on_error: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            cleanup_on_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_follow_prefix() {
        let config = NatsConfig::default();
        assert_eq!(config.process_subject("abc"), "docs.process.abc");
        assert_eq!(config.result_subject("abc"), "docs.result.abc");
        assert_eq!(config.status_subject("abc"), "docs.status.abc");
        assert_eq!(config.process_wildcard(), "docs.process.*");
        assert_eq!(config.result_wildcard(), "docs.result.*");
    }

    #[test]
    fn stream_names_are_derived() {
        let config = NatsConfig::default();
        assert_eq!(config.request_stream(), "DOCUMENTS");
        assert_eq!(config.result_stream(), "DOCUMENTS_results");
    }

    #[test]
    fn connection_url_without_token_is_unchanged() {
        let config = NatsConfig::default();
        assert_eq!(config.connection_url(), "nats://localhost:4222");
    }

    #[test]
    fn connection_url_splices_token() {
        let config = NatsConfig {
            token: Some("s3cret".into()),
            ..NatsConfig::default()
        };
        assert_eq!(config.connection_url(), "nats://s3cret@localhost:4222");
    }

    #[test]
    fn processing_defaults() {
        let config = ProcessingConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert!(config.cleanup_on_error);
        assert_eq!(NormalizerMode::default(), NormalizerMode::Permissive);
    }
}
