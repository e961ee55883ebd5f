use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use campaign_archiver::archive::create_archive_writer;
use campaign_archiver::config::Settings;
use campaign_archiver::content::StaticContentProvider;
use campaign_archiver::event::QueueBatch;
use campaign_archiver::metrics::encode_metrics;
use campaign_archiver::orchestrator::BatchOrchestrator;
use campaign_archiver::telemetry::init_telemetry;
use campaign_archiver::template::{CompileOptions, HelperRegistry, TemplateCache};

/// Process one batch read from the file given as the first argument, or
/// from stdin when no argument is given.
#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_telemetry(&settings.log)?;
    tracing::info!("Configuration loaded");

    let input = read_input(std::env::args().nth(1)).await?;
    let batch: QueueBatch = serde_json::from_str(&input).context("invalid batch input")?;

    let content = match &settings.content.source_file {
        Some(path) => StaticContentProvider::from_file(path).await?,
        None => {
            tracing::warn!("No content source configured, every campaign renders empty");
            StaticContentProvider::new()
        }
    };
    let archive = create_archive_writer(&settings.archive);
    let templates = Arc::new(TemplateCache::with_options(
        HelperRegistry::with_builtins(),
        CompileOptions {
            escape_html: settings.template.escape_html,
        },
    ));

    let orchestrator = BatchOrchestrator::new(Arc::new(content), archive, templates);
    let status = orchestrator.process_batch(&batch.records).await?;

    tracing::info!(status = %status, "Batch complete");
    if let Ok(metrics) = encode_metrics() {
        tracing::debug!(metrics = %metrics, "Metrics snapshot");
    }

    Ok(())
}

async fn read_input(path: Option<String>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path)),
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}
