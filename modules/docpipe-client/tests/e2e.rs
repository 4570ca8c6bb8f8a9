// End-to-end scenarios against real NATS and MinIO containers. Ignored by
// default; run with `cargo test -- --ignored` on a machine with Docker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::watch;

use docpipe_bus::Bus;
use docpipe_client::{ClientError, DocumentClient, DocumentSource};
use docpipe_common::{NatsConfig, ProcessingConfig};
use docpipe_engine::PdfTextEngine;
use docpipe_worker::{Worker, WorkerConfig};
use s3_store::{S3Config, S3Store};

const HELLO_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
BT (Hello world) Tj ET\n\
%%EOF";

async fn start_nats(prefix: &str) -> (ContainerAsync<GenericImage>, NatsConfig) {
    let container = GenericImage::new("nats", "2.10")
        .with_exposed_port(4222.tcp())
        .with_wait_for(WaitFor::message_on_stderr("Server is ready"))
        .with_cmd(["--jetstream"])
        .start()
        .await
        .expect("start nats container");
    let port = container.get_host_port_ipv4(4222).await.unwrap();
    let config = NatsConfig {
        url: format!("nats://127.0.0.1:{port}"),
        stream_name: format!("E2E_{}", prefix.to_uppercase()),
        subject_prefix: format!("e2e{prefix}"),
        ..NatsConfig::default()
    };
    (container, config)
}

async fn start_minio(bucket: &str) -> (ContainerAsync<GenericImage>, S3Config) {
    let container = GenericImage::new("minio/minio", "latest")
        .with_exposed_port(9000.tcp())
        .with_wait_for(WaitFor::message_on_stdout("API:"))
        .with_cmd(["server", "/data"])
        .start()
        .await
        .expect("start minio container");
    let port = container.get_host_port_ipv4(9000).await.unwrap();
    let config = S3Config {
        endpoint_url: Some(format!("http://127.0.0.1:{port}")),
        bucket: bucket.to_string(),
        access_key_id: Some("minioadmin".to_string()),
        secret_access_key: Some("minioadmin".to_string()),
        ..S3Config::default()
    };
    (container, config)
}

async fn spawn_worker(nats: &NatsConfig, s3: &S3Config) -> watch::Sender<bool> {
    let bus = Bus::connect(nats).await.unwrap();
    let store = S3Store::connect(s3.clone()).await.unwrap();
    store.ensure_bucket().await.unwrap();
    let worker = Worker::new(bus, store, Arc::new(PdfTextEngine), WorkerConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        worker.run(shutdown_rx).await.unwrap();
    });
    shutdown_tx
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn happy_path_round_trip() {
    let (_nats, nats_config) = start_nats("happy").await;
    let (_minio, s3_config) = start_minio("docpipe-e2e-happy").await;
    let shutdown = spawn_worker(&nats_config, &s3_config).await;

    let client = DocumentClient::connect(
        nats_config,
        s3_config,
        ProcessingConfig {
            timeout: Duration::from_secs(30),
            ..ProcessingConfig::default()
        },
    )
    .await
    .unwrap();

    let result = client
        .submit(
            DocumentSource::bytes(HELLO_PDF),
            Some(serde_json::json!({"do_ocr": true})),
        )
        .await
        .unwrap();

    assert_eq!(result.text, "Hello world");
    assert_eq!(result.metadata.pages, 1);
    assert_eq!(result.metadata.format, "pdf");
    assert_eq!(result.metadata.processed_by, "docling_worker");

    let _ = shutdown.send(true);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn worker_error_surfaces_to_client() {
    let (_nats, nats_config) = start_nats("err").await;
    let (_minio, s3_config) = start_minio("docpipe-e2e-err").await;
    let shutdown = spawn_worker(&nats_config, &s3_config).await;

    let client = DocumentClient::connect(
        nats_config,
        s3_config,
        ProcessingConfig {
            timeout: Duration::from_secs(30),
            ..ProcessingConfig::default()
        },
    )
    .await
    .unwrap();

    let err = client
        .submit(DocumentSource::bytes(&b"NOT A PDF"[..]), None)
        .await
        .unwrap_err();

    match err {
        ClientError::Worker(message) => {
            assert!(message.contains("parse failure"), "got: {message}")
        }
        other => panic!("expected worker error, got {other:?}"),
    }

    let _ = shutdown.send(true);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn timeout_when_no_worker_is_running() {
    let (_nats, nats_config) = start_nats("timeout").await;
    let (_minio, s3_config) = start_minio("docpipe-e2e-timeout").await;

    let client = DocumentClient::connect(nats_config, s3_config, ProcessingConfig::default())
        .await
        .unwrap();

    let started = Instant::now();
    let err = client
        .submit_with_timeout(
            DocumentSource::bytes(HELLO_PDF),
            None,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout(_)));
    // Timeout plus a small cleanup epsilon.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_submits_do_not_cross_replies() {
    let (_nats, nats_config) = start_nats("conc").await;
    let (_minio, s3_config) = start_minio("docpipe-e2e-conc").await;
    let shutdown = spawn_worker(&nats_config, &s3_config).await;

    let client = Arc::new(
        DocumentClient::connect(
            nats_config,
            s3_config,
            ProcessingConfig {
                timeout: Duration::from_secs(60),
                ..ProcessingConfig::default()
            },
        )
        .await
        .unwrap(),
    );

    fn payload_with_text(text: &str) -> Vec<u8> {
        format!(
            "%PDF-1.4\n1 0 obj << /Type /Page >> endobj\nBT ({text}) Tj ET\n%%EOF"
        )
        .into_bytes()
    }

    let mut handles = Vec::new();
    for text in ["alpha", "beta", "gamma"] {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let result = client
                .submit(DocumentSource::bytes(payload_with_text(text)), None)
                .await
                .unwrap();
            (text, result.text)
        }));
    }

    for handle in handles {
        let (expected, actual) = handle.await.unwrap();
        assert_eq!(actual, expected, "reply crossed between submitters");
    }

    let _ = shutdown.send(true);
}
