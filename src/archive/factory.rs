//! Archive writer factory

use std::sync::Arc;

use crate::config::ArchiveConfig;

use super::{ArchiveWriter, FileArchiveWriter, MemoryArchiveWriter};

/// Create an archive writer based on configuration.
///
/// - `"file"`: writes JSON documents under `root_dir`
/// - `"memory"` (default): keeps documents in memory
pub fn create_archive_writer(config: &ArchiveConfig) -> Arc<dyn ArchiveWriter> {
    match config.backend.as_str() {
        "file" => {
            tracing::info!(
                backend = "file",
                root_dir = %config.root_dir,
                "Creating file archive writer"
            );
            Arc::new(FileArchiveWriter::new(&config.root_dir))
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory archive writer");
            Arc::new(MemoryArchiveWriter::new())
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown archive backend, falling back to memory"
            );
            Arc::new(MemoryArchiveWriter::new())
        }
    }
}
