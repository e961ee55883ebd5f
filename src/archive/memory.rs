//! In-memory archive writer using DashMap.
//!
//! Documents are lost on restart. Used for local runs and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::event::CampaignContext;
use crate::template::RenderedPiece;

use super::{ArchiveReceipt, ArchiveWriter, ArchivedDocument};

#[derive(Default)]
pub struct MemoryArchiveWriter {
    documents: DashMap<String, ArchivedDocument>,
}

impl MemoryArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ArchivedDocument> {
        self.documents.get(key).map(|d| d.clone())
    }

    /// All documents stored for an endpoint
    pub fn documents_for_endpoint(&self, endpoint_id: &str) -> Vec<ArchivedDocument> {
        self.documents
            .iter()
            .filter(|d| d.endpoint_id == endpoint_id)
            .map(|d| d.value().clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.documents.iter().map(|d| d.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ArchiveWriter for MemoryArchiveWriter {
    async fn write_rendered(
        &self,
        rendered: &[RenderedPiece],
        endpoint_id: &str,
        context: &CampaignContext,
    ) -> Result<ArchiveReceipt> {
        let document = ArchivedDocument::new(rendered, endpoint_id, context);
        let key = document.key();
        self.documents.insert(key.clone(), document);

        tracing::debug!(key = %key, "Archived rendered message in memory");

        Ok(ArchiveReceipt { key })
    }
}
