// Test doubles for the dispatcher's trait boundaries: a HashMap-backed
// payload fetcher and a recording reply sink that can be told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use docpipe_bus::BusError;
use docpipe_common::ReplyEnvelope;
use s3_store::S3Error;

use crate::traits::{PayloadFetcher, ReplySink};

/// Returns registered payloads; unknown keys come back as `NotFound`.
#[derive(Default)]
pub struct MockFetcher {
    objects: HashMap<String, Bytes>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, key: &str, payload: impl Into<Bytes>) -> Self {
        self.objects.insert(key.to_string(), payload.into());
        self
    }
}

#[async_trait]
impl PayloadFetcher for MockFetcher {
    async fn fetch(&self, _bucket: Option<&str>, key: &str) -> Result<Bytes, S3Error> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| S3Error::NotFound(key.to_string()))
    }
}

/// Records every published reply and status event; flips to failing on
/// demand to exercise the nack path.
#[derive(Default)]
pub struct MockSink {
    replies: Mutex<Vec<ReplyEnvelope>>,
    statuses: Mutex<Vec<(String, String)>>,
    fail_publish: AtomicBool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail_publish.store(true, Ordering::SeqCst);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_publish.store(failing, Ordering::SeqCst);
    }

    pub fn replies(&self) -> Vec<ReplyEnvelope> {
        self.replies.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, String)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySink for MockSink {
    async fn publish_reply(&self, reply: &ReplyEnvelope) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                subject: format!("docs.result.{}", reply.request_id),
                message: "sink configured to fail".to_string(),
            });
        }
        self.replies.lock().unwrap().push(reply.clone());
        Ok(())
    }

    async fn publish_status(&self, request_id: &str, state: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push((request_id.to_string(), state.to_string()));
    }
}
