//! End-to-end batch processing tests
//!
//! These tests drive `BatchOrchestrator` with in-memory collaborators and
//! small test doubles, without touching any external service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use campaign_archiver::archive::{
    create_archive_writer, ArchiveReceipt, ArchiveWriter, ArchivedDocument, MemoryArchiveWriter,
};
use campaign_archiver::config::ArchiveConfig;
use campaign_archiver::content::{ContentProvider, StaticContentProvider};
use campaign_archiver::error::{ArchiverError, Result};
use campaign_archiver::event::{CampaignContext, QueueBatch, QueueRecord};
use campaign_archiver::orchestrator::{BatchOrchestrator, BatchStatus};
use campaign_archiver::template::{ContentPiece, RenderedPiece, TemplateCache};

// =============================================================================
// Fixtures
// =============================================================================

fn event_body(campaign_id: &str, endpoint_id: &str, endpoint: Value) -> String {
    json!({
        "application": {"app_id": "app-1"},
        "event_timestamp": 1_700_000_000_000_i64,
        "attributes": {
            "campaign_id": campaign_id,
            "treatment_id": "0"
        },
        "client": {"client_id": endpoint_id},
        "client_context": {"custom": {"endpoint": endpoint.to_string()}}
    })
    .to_string()
}

fn record(campaign_id: &str, endpoint_id: &str, endpoint: Value) -> QueueRecord {
    QueueRecord::new(event_body(campaign_id, endpoint_id, endpoint))
}

fn two_piece_content() -> StaticContentProvider {
    let provider = StaticContentProvider::new();
    provider.insert(
        "app-1",
        "camp-1",
        vec![
            ContentPiece::new("APNS.Title", "Hello {{name}}"),
            ContentPiece::new("SMS.Body", "{{name}}: {{msg}}").with_default_subs(r#"{"msg":"Hi"}"#),
        ],
    );
    provider
}

/// Content provider that counts calls and delegates to a static provider
struct CountingProvider {
    inner: StaticContentProvider,
    calls: AtomicUsize,
}

#[async_trait]
impl ContentProvider for CountingProvider {
    async fn get_content_parts(
        &self,
        application_id: &str,
        context: &CampaignContext,
    ) -> Result<Vec<ContentPiece>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.get_content_parts(application_id, context).await
    }
}

/// Content provider whose backend is down
struct UnavailableProvider;

#[async_trait]
impl ContentProvider for UnavailableProvider {
    async fn get_content_parts(
        &self,
        _application_id: &str,
        context: &CampaignContext,
    ) -> Result<Vec<ContentPiece>> {
        Err(ArchiverError::ContentFetch(format!(
            "campaign {} unavailable",
            context.template_key()
        )))
    }
}

/// Archive writer that rejects one endpoint and delays the others
struct FlakyWriter {
    inner: MemoryArchiveWriter,
    reject_endpoint: String,
    delay: Duration,
}

#[async_trait]
impl ArchiveWriter for FlakyWriter {
    async fn write_rendered(
        &self,
        rendered: &[RenderedPiece],
        endpoint_id: &str,
        context: &CampaignContext,
    ) -> Result<ArchiveReceipt> {
        if endpoint_id == self.reject_endpoint {
            return Err(ArchiverError::Persistence("bucket unavailable".to_string()));
        }
        tokio::time::sleep(self.delay).await;
        self.inner.write_rendered(rendered, endpoint_id, context).await
    }
}

// =============================================================================
// Batch scenarios
// =============================================================================

#[tokio::test]
async fn test_two_piece_batch_end_to_end() {
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(
        Arc::new(two_piece_content()),
        archive.clone(),
        Arc::new(TemplateCache::default()),
    );

    let status = orchestrator
        .process_batch(&[record("camp-1", "e-1", json!({"name": "Alice"}))])
        .await
        .unwrap();
    assert_eq!(status, BatchStatus::Success);

    let docs = archive.documents_for_endpoint("e-1");
    assert_eq!(docs.len(), 1);
    assert_eq!(
        docs[0].rendered,
        vec![
            RenderedPiece {
                piece_type: "APNS.Title".to_string(),
                content: "Hello Alice".to_string(),
                channel: None,
            },
            RenderedPiece {
                piece_type: "SMS.Body".to_string(),
                content: "Alice: Hi".to_string(),
                channel: None,
            },
        ]
    );
    assert_eq!(docs[0].context.campaign_id.as_deref(), Some("camp-1"));
    assert_eq!(docs[0].context.treatment_id.as_deref(), Some("0"));
}

#[tokio::test]
async fn test_malformed_record_rejects_batch_without_rollback() {
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(
        Arc::new(two_piece_content()),
        archive.clone(),
        Arc::new(TemplateCache::default()),
    );

    let records = vec![
        record("camp-1", "e-1", json!({"name": "Alice"})),
        QueueRecord::new("{\"application\": {\"app_id\": "),
    ];

    let err = orchestrator.process_batch(&records).await.unwrap_err();
    assert!(matches!(err, ArchiverError::MalformedEvent(_)));

    // Record 1 was archived and is not rolled back
    let docs = archive.documents_for_endpoint("e-1");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].rendered[0].content, "Hello Alice");
}

#[tokio::test]
async fn test_malformed_endpoint_attributes_reject_batch() {
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(
        Arc::new(two_piece_content()),
        archive.clone(),
        Arc::new(TemplateCache::default()),
    );

    let mut body: Value = serde_json::from_str(&event_body("camp-1", "e-1", json!({}))).unwrap();
    body["client_context"]["custom"]["endpoint"] = json!("{\"name\": ");

    let err = orchestrator
        .process_batch(&[QueueRecord::new(body.to_string())])
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiverError::MalformedEvent(_)));
    assert!(archive.is_empty());
}

#[tokio::test]
async fn test_persistence_failure_waits_for_siblings() {
    let writer = Arc::new(FlakyWriter {
        inner: MemoryArchiveWriter::new(),
        reject_endpoint: "e-bad".to_string(),
        delay: Duration::from_millis(30),
    });
    let orchestrator = BatchOrchestrator::new(
        Arc::new(two_piece_content()),
        writer.clone(),
        Arc::new(TemplateCache::default()),
    );

    let records = vec![
        record("camp-1", "e-1", json!({"name": "Alice"})),
        record("camp-1", "e-bad", json!({"name": "Mallory"})),
        record("camp-1", "e-2", json!({"name": "Bob"})),
    ];

    let err = orchestrator.process_batch(&records).await.unwrap_err();
    assert!(matches!(err, ArchiverError::Persistence(_)));

    // The slower sibling writes finished before the batch was rejected
    assert_eq!(writer.inner.len(), 2);
}

#[tokio::test]
async fn test_content_fetch_failure_rejects_batch() {
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(
        Arc::new(UnavailableProvider),
        archive.clone(),
        Arc::new(TemplateCache::default()),
    );

    let err = orchestrator
        .process_batch(&[record("camp-1", "e-1", json!({"name": "Alice"}))])
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiverError::ContentFetch(ref m) if m.contains("camp-1")));
    assert!(archive.is_empty());
}

#[tokio::test]
async fn test_compile_error_rejects_batch_and_is_not_cached() {
    let content = StaticContentProvider::new();
    content.insert(
        "app-1",
        "camp-1",
        vec![ContentPiece::new("SMS.Body", "{{#each items}}never closed")],
    );
    let content = Arc::new(content);
    let templates = Arc::new(TemplateCache::default());
    let orchestrator = BatchOrchestrator::new(
        content.clone(),
        Arc::new(MemoryArchiveWriter::new()),
        templates.clone(),
    );

    let err = orchestrator
        .process_batch(&[record("camp-1", "e-1", json!({}))])
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiverError::TemplateCompile { .. }));
    assert!(!templates.contains("camp-1"));

    // Fixed content is picked up on the next batch
    content.insert(
        "app-1",
        "camp-1",
        vec![ContentPiece::new("SMS.Body", "{{#each items}}{{this}}{{/each}}")],
    );
    let status = orchestrator
        .process_batch(&[record("camp-1", "e-1", json!({"items": ["a", "b"]}))])
        .await
        .unwrap();
    assert_eq!(status, BatchStatus::Success);
}

#[tokio::test]
async fn test_render_error_rejects_batch() {
    let content = StaticContentProvider::new();
    content.insert(
        "app-1",
        "camp-1",
        vec![
            ContentPiece::new("APNS.Title", "Hello {{name}}"),
            ContentPiece::new("SMS.Body", "{{translate name}}"),
        ],
    );
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(
        Arc::new(content),
        archive.clone(),
        Arc::new(TemplateCache::default()),
    );

    let err = orchestrator
        .process_batch(&[record("camp-1", "e-1", json!({"name": "Alice"}))])
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiverError::Render { ref piece_type, .. } if piece_type == "SMS.Body"));
    assert!(archive.is_empty());
}

#[tokio::test]
async fn test_journey_events_render_alongside_campaign_events() {
    let content = two_piece_content();
    content.insert(
        "app-1",
        "activity-1",
        vec![ContentPiece::new("EMAIL.Subject", "Step two for {{name}}")],
    );
    let templates = Arc::new(TemplateCache::default());
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator =
        BatchOrchestrator::new(Arc::new(content), archive.clone(), templates.clone());

    let journey = json!({
        "application": {"app_id": "app-1"},
        "event_timestamp": 1_700_000_000_000_i64,
        "attributes": {"journey_id": "journey-1", "journey_activity_id": "activity-1"},
        "client": {"client_id": "e-journey"},
        "client_context": {"custom": {"endpoint": json!({"name": "Dana"}).to_string()}}
    })
    .to_string();
    let records = vec![
        record("camp-1", "e-1", json!({"name": "Alice"})),
        QueueRecord::new(journey),
    ];

    let status = orchestrator.process_batch(&records).await.unwrap();
    assert_eq!(status, BatchStatus::Success);

    let doc = &archive.documents_for_endpoint("e-journey")[0];
    assert_eq!(doc.context.campaign_id, None);
    assert_eq!(doc.context.journey_id.as_deref(), Some("journey-1"));
    assert_eq!(doc.rendered[0].content, "Step two for Dana");
    assert!(archive
        .get("app-1/activity-1/2023/11/14/e-journey-1700000000000.json")
        .is_some());

    assert!(templates.contains("camp-1"));
    assert!(templates.contains("activity-1"));
}

// =============================================================================
// Template cache across records
// =============================================================================

#[tokio::test]
async fn test_same_campaign_in_one_batch_compiles_once() {
    let provider = Arc::new(CountingProvider {
        inner: two_piece_content(),
        calls: AtomicUsize::new(0),
    });
    let templates = Arc::new(TemplateCache::default());
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(provider.clone(), archive.clone(), templates.clone());

    let records: Vec<QueueRecord> = (0..10)
        .map(|i| record("camp-1", &format!("e-{}", i), json!({"name": format!("user{}", i)})))
        .collect();

    orchestrator.process_batch(&records).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 10);
    assert_eq!(archive.len(), 10);
    let stats = templates.stats();
    assert_eq!(stats.campaigns, 1);
    assert_eq!(stats.compilations, 1);
    assert_eq!(
        archive.documents_for_endpoint("e-7")[0].rendered[1].content,
        "user7: Hi"
    );
}

#[tokio::test]
async fn test_changed_content_is_not_picked_up_after_first_render() {
    let content = Arc::new(two_piece_content());
    let templates = Arc::new(TemplateCache::default());
    let archive = Arc::new(MemoryArchiveWriter::new());
    let orchestrator = BatchOrchestrator::new(content.clone(), archive.clone(), templates.clone());

    orchestrator
        .process_batch(&[record("camp-1", "e-1", json!({"name": "Alice"}))])
        .await
        .unwrap();

    content.insert(
        "app-1",
        "camp-1",
        vec![ContentPiece::new("APNS.Title", "Goodbye {{name}}")],
    );
    orchestrator
        .process_batch(&[record("camp-1", "e-2", json!({"name": "Bob"}))])
        .await
        .unwrap();

    let doc = &archive.documents_for_endpoint("e-2")[0];
    assert_eq!(doc.rendered.len(), 2);
    assert_eq!(doc.rendered[0].content, "Hello Bob");

    // Explicit invalidation picks up the new definition
    templates.invalidate("camp-1");
    orchestrator
        .process_batch(&[record("camp-1", "e-3", json!({"name": "Carol"}))])
        .await
        .unwrap();
    let doc = &archive.documents_for_endpoint("e-3")[0];
    assert_eq!(doc.rendered.len(), 1);
    assert_eq!(doc.rendered[0].content, "Goodbye Carol");
}

// =============================================================================
// Wiring
// =============================================================================

#[tokio::test]
async fn test_queue_batch_through_file_archive() {
    let root = std::env::temp_dir().join(format!("archiver-it-{}", uuid::Uuid::new_v4()));
    let archive = create_archive_writer(&ArchiveConfig {
        backend: "file".to_string(),
        root_dir: root.to_string_lossy().into_owned(),
    });
    let orchestrator = BatchOrchestrator::new(
        Arc::new(two_piece_content()),
        archive,
        Arc::new(TemplateCache::default()),
    );

    let batch: QueueBatch = serde_json::from_value(json!({
        "Records": [
            {"messageId": "m-1", "body": event_body("camp-1", "e-1", json!({"name": "Alice"}))}
        ]
    }))
    .unwrap();

    orchestrator.process_batch(&batch.records).await.unwrap();

    let path = root.join("app-1/camp-1/2023/11/14/e-1-1700000000000.json");
    let raw = tokio::fs::read_to_string(&path).await.unwrap();
    let doc: ArchivedDocument = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc.rendered[1].content, "Alice: Hi");

    tokio::fs::remove_dir_all(&root).await.unwrap();
}
