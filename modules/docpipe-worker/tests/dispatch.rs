// Dispatcher scenarios against the mock fetcher, sink, and engine: the
// ack/nack decision table and fault isolation across a message sequence.

use std::sync::Arc;

use serde_json::json;

use docpipe_common::{ReplyOutcome, RequestEnvelope, RequestId};
use docpipe_engine::testing::MockEngine;
use docpipe_engine::PdfTextEngine;
use docpipe_worker::testing::{MockFetcher, MockSink};
use docpipe_worker::{Dispatcher, Disposition, WorkerConfig};

fn envelope(key: &str, options: Option<serde_json::Value>) -> (RequestEnvelope, String) {
    let id = RequestId::generate();
    let envelope = RequestEnvelope::new(id.clone(), key.to_string(), None, options);
    (envelope, id.to_string())
}

fn dispatcher(fetcher: MockFetcher, sink: Arc<MockSink>, engine: Arc<MockEngine>) -> Dispatcher {
    Dispatcher::new(Arc::new(fetcher), sink, engine, WorkerConfig::default())
}

#[tokio::test]
async fn successful_conversion_acks_with_success_reply() {
    let fetcher = MockFetcher::new().with_object("raw/a.pdf", &b"%PDF-1.4 fake"[..]);
    let sink = Arc::new(MockSink::new());
    let engine = Arc::new(MockEngine::succeeding());
    let dispatcher = dispatcher(fetcher, sink.clone(), engine.clone());

    let (envelope, id) = envelope("raw/a.pdf", Some(json!({"do_ocr": true})));
    let disposition = dispatcher.handle(&envelope.encode().unwrap()).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(engine.invocations(), 1);
    let replies = sink.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].request_id, id);
    match &replies[0].outcome {
        ReplyOutcome::Success { result } => {
            assert_eq!(result.metadata.pages, 1);
            assert_eq!(result.metadata.format, "pdf");
            assert_eq!(result.metadata.processed_by, "docling_worker");
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(
        sink.statuses(),
        vec![(id.clone(), "received".into()), (id, "completed".into())]
    );
}

#[tokio::test]
async fn engine_failure_publishes_error_reply_and_acks() {
    let fetcher = MockFetcher::new().with_object("raw/bad.pdf", &b"NOT A PDF"[..]);
    let sink = Arc::new(MockSink::new());
    let engine = Arc::new(MockEngine::failing("bad header"));
    let dispatcher = dispatcher(fetcher, sink.clone(), engine);

    let (envelope, id) = envelope("raw/bad.pdf", None);
    let disposition = dispatcher.handle(&envelope.encode().unwrap()).await;

    // A deterministic engine error must not be redelivered: the structured
    // error reply IS the outcome, so the request leaves the queue.
    assert_eq!(disposition, Disposition::Ack);
    let replies = sink.replies();
    assert_eq!(replies.len(), 1);
    match &replies[0].outcome {
        ReplyOutcome::Error { error } => {
            assert!(error.contains("parse failure"), "got: {error}");
        }
        other => panic!("expected error reply, got {other:?}"),
    }
    assert_eq!(replies[0].request_id, id);
}

#[tokio::test]
async fn missing_payload_publishes_error_reply_and_acks() {
    let sink = Arc::new(MockSink::new());
    let engine = Arc::new(MockEngine::succeeding());
    let dispatcher = dispatcher(MockFetcher::new(), sink.clone(), engine.clone());

    let (envelope, _) = envelope("raw/absent.pdf", None);
    let disposition = dispatcher.handle(&envelope.encode().unwrap()).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(engine.invocations(), 0);
    match &sink.replies()[0].outcome {
        ReplyOutcome::Error { error } => {
            assert!(error.contains("download failed"), "got: {error}");
        }
        other => panic!("expected error reply, got {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_envelope_nacks_with_salvaged_error_reply() {
    let sink = Arc::new(MockSink::new());
    let dispatcher = dispatcher(
        MockFetcher::new(),
        sink.clone(),
        Arc::new(MockEngine::succeeding()),
    );

    let payload = json!({"request_id": "half-formed"}).to_string();
    let disposition = dispatcher.handle(payload.as_bytes()).await;

    assert_eq!(disposition, Disposition::Nack);
    let replies = sink.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].request_id, "half-formed");
    assert!(matches!(replies[0].outcome, ReplyOutcome::Error { .. }));
}

#[tokio::test]
async fn complete_garbage_nacks_without_reply() {
    let sink = Arc::new(MockSink::new());
    let dispatcher = dispatcher(
        MockFetcher::new(),
        sink.clone(),
        Arc::new(MockEngine::succeeding()),
    );

    let disposition = dispatcher.handle(b"not json at all").await;

    assert_eq!(disposition, Disposition::Nack);
    assert!(sink.replies().is_empty());
}

#[tokio::test]
async fn reply_publish_failure_nacks() {
    let fetcher = MockFetcher::new().with_object("raw/a.pdf", &b"%PDF-1.4"[..]);
    let sink = Arc::new(MockSink::failing());
    let dispatcher = dispatcher(fetcher, sink.clone(), Arc::new(MockEngine::succeeding()));

    let (envelope, _) = envelope("raw/a.pdf", None);
    let disposition = dispatcher.handle(&envelope.encode().unwrap()).await;

    assert_eq!(disposition, Disposition::Nack);
    assert!(sink.replies().is_empty());
}

#[tokio::test]
async fn faulty_envelope_does_not_poison_the_sequence() {
    let fetcher = MockFetcher::new()
        .with_object("raw/a.pdf", &b"%PDF-1.4 a"[..])
        .with_object("raw/c.pdf", &b"%PDF-1.4 c"[..]);
    let sink = Arc::new(MockSink::new());
    let dispatcher = dispatcher(fetcher, sink.clone(), Arc::new(MockEngine::succeeding()));

    let (first, _) = envelope("raw/a.pdf", None);
    let (third, _) = envelope("raw/c.pdf", None);

    assert_eq!(
        dispatcher.handle(&first.encode().unwrap()).await,
        Disposition::Ack
    );
    assert_eq!(dispatcher.handle(b"garbage").await, Disposition::Nack);
    assert_eq!(
        dispatcher.handle(&third.encode().unwrap()).await,
        Disposition::Ack
    );

    let replies = sink.replies();
    assert_eq!(replies.len(), 2);
    assert!(replies
        .iter()
        .all(|reply| matches!(reply.outcome, ReplyOutcome::Success { .. })));
}

#[tokio::test]
async fn strict_normalizer_turns_bad_options_into_error_reply() {
    let fetcher = MockFetcher::new().with_object("raw/a.pdf", &b"%PDF-1.4"[..]);
    let sink = Arc::new(MockSink::new());
    let config = WorkerConfig {
        normalizer_mode: docpipe_common::NormalizerMode::Strict,
        ..WorkerConfig::default()
    };
    let dispatcher = Dispatcher::new(
        Arc::new(fetcher),
        sink.clone(),
        Arc::new(MockEngine::succeeding()),
        config,
    );

    let (envelope, _) = envelope("raw/a.pdf", Some(json!({"format_options": "junk"})));
    let disposition = dispatcher.handle(&envelope.encode().unwrap()).await;

    assert_eq!(disposition, Disposition::Ack);
    match &sink.replies()[0].outcome {
        ReplyOutcome::Error { error } => {
            assert!(error.contains("invalid options descriptor"), "got: {error}");
        }
        other => panic!("expected error reply, got {other:?}"),
    }
}

#[tokio::test]
async fn built_in_engine_end_to_end_through_dispatcher() {
    const HELLO_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
BT (Hello world) Tj ET\n\
%%EOF";

    let sink = Arc::new(MockSink::new());
    let dispatcher = Dispatcher::new(
        Arc::new(MockFetcher::new().with_object("raw/hello.pdf", HELLO_PDF)),
        sink.clone(),
        Arc::new(PdfTextEngine),
        WorkerConfig::default(),
    );

    let (envelope, _) = envelope("raw/hello.pdf", Some(json!({"do_ocr": true})));
    let disposition = dispatcher.handle(&envelope.encode().unwrap()).await;

    assert_eq!(disposition, Disposition::Ack);
    match &sink.replies()[0].outcome {
        ReplyOutcome::Success { result } => {
            assert_eq!(result.text, "Hello world");
            assert_eq!(result.metadata.pages, 1);
            assert_eq!(result.metadata.format, "pdf");
            assert_eq!(result.metadata.processed_by, "docling_worker");
        }
        other => panic!("expected success, got {other:?}"),
    }
}
