//! Batch processing of delivery events.
//!
//! For every record in a batch, concurrently:
//! 1. Parse the record body into an `EventRecord`
//! 2. Fetch the campaign's content pieces from the `ContentProvider`
//! 3. Render the pieces for the endpoint through the `TemplateCache`
//! 4. Hand the rendered pieces to the `ArchiveWriter`
//!
//! The batch succeeds only if every record succeeds. When a record fails the
//! batch fails with the first error once all records have settled. Records
//! that were already archived stay archived; redelivery of the batch is the
//! transport's decision.

use std::fmt;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::archive::{ArchiveReceipt, ArchiveWriter};
use crate::content::ContentProvider;
use crate::error::Result;
use crate::event::{EventRecord, QueueRecord};
use crate::join::try_join_settled;
use crate::metrics::{BatchMetrics, ErrorMetrics};
use crate::template::TemplateCache;

/// Outcome of a successful batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives batches of queue records through render and archive
pub struct BatchOrchestrator {
    content: Arc<dyn ContentProvider>,
    archive: Arc<dyn ArchiveWriter>,
    templates: Arc<TemplateCache>,
}

impl BatchOrchestrator {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        archive: Arc<dyn ArchiveWriter>,
        templates: Arc<TemplateCache>,
    ) -> Self {
        Self {
            content,
            archive,
            templates,
        }
    }

    pub fn templates(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    /// Process one batch of records
    #[instrument(skip_all, fields(batch_id = %Uuid::new_v4(), record_count = records.len()))]
    pub async fn process_batch(&self, records: &[QueueRecord]) -> Result<BatchStatus> {
        tracing::info!("Processing batch");

        let outcomes = records
            .iter()
            .enumerate()
            .map(|(index, record)| self.process_record(index, record));

        match try_join_settled(outcomes).await {
            Ok(receipts) => {
                BatchMetrics::record_batch(true);
                tracing::info!(archived = receipts.len(), "Batch processed");
                Ok(BatchStatus::Success)
            }
            Err(e) => {
                BatchMetrics::record_batch(false);
                tracing::error!(kind = e.kind(), error = %e, "Batch failed");
                Err(e)
            }
        }
    }

    #[instrument(
        skip_all,
        fields(index = index, message_id = record.message_id.as_deref().unwrap_or(""))
    )]
    async fn process_record(&self, index: usize, record: &QueueRecord) -> Result<ArchiveReceipt> {
        let result = self.run_pipeline(record).await;

        match &result {
            Ok(receipt) => {
                BatchMetrics::record_record(true);
                tracing::debug!(key = %receipt.key, "Record archived");
            }
            Err(e) => {
                BatchMetrics::record_record(false);
                ErrorMetrics::record(e.kind());
                tracing::warn!(kind = e.kind(), error = %e, "Record failed");
            }
        }

        result
    }

    async fn run_pipeline(&self, record: &QueueRecord) -> Result<ArchiveReceipt> {
        let event = EventRecord::parse(&record.body)?;
        let context = &event.context;

        tracing::info!(
            application_id = %context.application_id,
            template_key = %context.template_key(),
            endpoint_id = %event.endpoint_id,
            context = %serde_json::to_string(context).unwrap_or_default(),
            "Processing event"
        );

        let content = self
            .content
            .get_content_parts(&context.application_id, context)
            .await?;

        let rendered = self
            .templates
            .render(context.template_key(), &content, &event.endpoint_attributes)
            .await?;

        self.archive
            .write_rendered(&rendered, &event.endpoint_id, context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchiveWriter;
    use crate::content::StaticContentProvider;
    use crate::error::ArchiverError;
    use crate::template::ContentPiece;
    use serde_json::json;

    fn record(campaign_id: &str, endpoint_id: &str, endpoint: serde_json::Value) -> QueueRecord {
        QueueRecord::new(
            json!({
                "application": {"app_id": "app-1"},
                "event_timestamp": 1_700_000_000_000_i64,
                "attributes": {"campaign_id": campaign_id},
                "client": {"client_id": endpoint_id},
                "client_context": {"custom": {"endpoint": endpoint.to_string()}}
            })
            .to_string(),
        )
    }

    fn setup() -> (BatchOrchestrator, Arc<MemoryArchiveWriter>) {
        let content = StaticContentProvider::new();
        content.insert(
            "app-1",
            "camp-1",
            vec![ContentPiece::new("SMS.Body", "Hi {{name}}").with_channel("SMS")],
        );
        let archive = Arc::new(MemoryArchiveWriter::new());
        let orchestrator = BatchOrchestrator::new(
            Arc::new(content),
            archive.clone(),
            Arc::new(TemplateCache::default()),
        );
        (orchestrator, archive)
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BatchStatus::Success.to_string(), "success");
    }

    #[tokio::test]
    async fn test_process_batch_archives_every_record() {
        let (orchestrator, archive) = setup();
        let records = vec![
            record("camp-1", "e-1", json!({"name": "Alice"})),
            record("camp-1", "e-2", json!({"name": "Bob"})),
        ];

        let status = orchestrator.process_batch(&records).await.unwrap();
        assert_eq!(status, BatchStatus::Success);
        assert_eq!(archive.len(), 2);
        assert_eq!(
            archive.documents_for_endpoint("e-2")[0].rendered[0].content,
            "Hi Bob"
        );
        assert_eq!(orchestrator.templates().stats().compilations, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds() {
        let (orchestrator, archive) = setup();
        assert_eq!(
            orchestrator.process_batch(&[]).await.unwrap(),
            BatchStatus::Success
        );
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn test_campaign_without_content_archives_empty_render() {
        let (orchestrator, archive) = setup();
        let records = vec![record("camp-unknown", "e-1", json!({}))];

        orchestrator.process_batch(&records).await.unwrap();
        assert!(archive.documents_for_endpoint("e-1")[0].rendered.is_empty());
        assert!(!orchestrator.templates().contains("camp-unknown"));
    }

    #[tokio::test]
    async fn test_malformed_record_fails_batch() {
        let (orchestrator, archive) = setup();
        let records = vec![
            record("camp-1", "e-1", json!({"name": "Alice"})),
            QueueRecord::new("{\"application\": "),
        ];

        let err = orchestrator.process_batch(&records).await.unwrap_err();
        assert!(matches!(err, ArchiverError::MalformedEvent(_)));
        // The valid record is still archived
        assert_eq!(archive.len(), 1);
    }
}
