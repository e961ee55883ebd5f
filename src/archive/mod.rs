//! Archival of rendered messages.
//!
//! The `ArchiveWriter` trait accepts the rendered pieces for one recipient.
//! Documents are stored under a deterministic key, so writing the same
//! record twice overwrites rather than duplicates:
//!
//! ```text
//! {applicationId}/{campaignId or journeyActivityId}/{YYYY}/{MM}/{DD}/{endpointId}-{eventTimestamp}.json
//! ```

mod factory;
mod file;
mod memory;

pub use factory::create_archive_writer;
pub use file::FileArchiveWriter;
pub use memory::MemoryArchiveWriter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::CampaignContext;
use crate::template::RenderedPiece;

/// Destination for rendered messages
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    async fn write_rendered(
        &self,
        rendered: &[RenderedPiece],
        endpoint_id: &str,
        context: &CampaignContext,
    ) -> Result<ArchiveReceipt>;
}

/// Location of a stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveReceipt {
    pub key: String,
}

/// Stored form of one recipient's rendered message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedDocument {
    pub endpoint_id: String,
    pub context: CampaignContext,
    pub rendered: Vec<RenderedPiece>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedDocument {
    pub fn new(rendered: &[RenderedPiece], endpoint_id: &str, context: &CampaignContext) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            context: context.clone(),
            rendered: rendered.to_vec(),
            archived_at: Utc::now(),
        }
    }

    /// Storage key for this document
    pub fn key(&self) -> String {
        object_key(&self.endpoint_id, &self.context, self.archived_at)
    }
}

/// Build the storage key, dating it by the event timestamp when present
pub fn object_key(endpoint_id: &str, context: &CampaignContext, now: DateTime<Utc>) -> String {
    let event_time = context
        .event_timestamp
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(now);
    let timestamp = context
        .event_timestamp
        .unwrap_or_else(|| now.timestamp_millis());

    format!(
        "{}/{}/{}/{}-{}.json",
        sanitize_segment(&context.application_id),
        sanitize_segment(context.template_key()),
        event_time.format("%Y/%m/%d"),
        sanitize_segment(endpoint_id),
        timestamp
    )
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
