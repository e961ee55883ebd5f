//! Filesystem archive writer.
//!
//! Each document is written as pretty-printed JSON at `{root}/{key}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{ArchiverError, Result};
use crate::event::CampaignContext;
use crate::template::RenderedPiece;

use super::{ArchiveReceipt, ArchiveWriter, ArchivedDocument};

pub struct FileArchiveWriter {
    root: PathBuf,
}

impl FileArchiveWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArchiveWriter for FileArchiveWriter {
    async fn write_rendered(
        &self,
        rendered: &[RenderedPiece],
        endpoint_id: &str,
        context: &CampaignContext,
    ) -> Result<ArchiveReceipt> {
        let document = ArchivedDocument::new(rendered, endpoint_id, context);
        let key = document.key();
        let path = self.root.join(&key);

        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| ArchiverError::Persistence(format!("failed to encode {}: {}", key, e)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ArchiverError::Persistence(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ArchiverError::Persistence(format!("failed to write {}: {}", key, e)))?;

        tracing::debug!(path = %path.display(), "Archived rendered message to file");

        Ok(ArchiveReceipt { key })
    }
}
