//! Campaign content definitions.
//!
//! The `ContentProvider` trait resolves the content pieces of a campaign.
//! `StaticContentProvider` keeps definitions in memory, keyed by the
//! event's template key (campaign id, or journey activity id for journey
//! sends), and can be seeded from a JSON file:
//!
//! ```text
//! [
//!   {"applicationId": "app-1", "campaignId": "camp-1",
//!    "pieces": [{"pieceType": "SMS.Body", "html": "Hi {{name}}", "channel": "SMS"}]}
//! ]
//! ```

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::error::{ArchiverError, Result};
use crate::event::CampaignContext;
use crate::template::ContentPiece;

/// Source of campaign content definitions
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Content pieces for the campaign in `context`.
    ///
    /// A campaign without content yields an empty list, not an error.
    async fn get_content_parts(
        &self,
        application_id: &str,
        context: &CampaignContext,
    ) -> Result<Vec<ContentPiece>>;
}

/// Content definition of one campaign in a seed file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignContent {
    pub application_id: String,
    #[serde(alias = "journeyActivityId")]
    pub campaign_id: String,
    #[serde(default)]
    pub pieces: Vec<ContentPiece>,
}

/// In-memory content provider keyed by application and campaign
#[derive(Default)]
pub struct StaticContentProvider {
    campaigns: DashMap<(String, String), Vec<ContentPiece>>,
}

impl StaticContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = CampaignContent>) -> Self {
        let provider = Self::new();
        for def in definitions {
            provider.insert(def.application_id, def.campaign_id, def.pieces);
        }
        provider
    }

    /// Load definitions from a JSON seed file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let definitions: Vec<CampaignContent> = serde_json::from_str(&raw).map_err(|e| {
            ArchiverError::ContentFetch(format!(
                "invalid content definitions in {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %path.display(),
            campaigns = definitions.len(),
            "Loaded campaign content definitions"
        );

        Ok(Self::from_definitions(definitions))
    }

    /// Set the content of a campaign or journey activity, replacing any
    /// previous definition
    pub fn insert(
        &self,
        application_id: impl Into<String>,
        template_key: impl Into<String>,
        pieces: Vec<ContentPiece>,
    ) {
        self.campaigns
            .insert((application_id.into(), template_key.into()), pieces);
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

#[async_trait]
impl ContentProvider for StaticContentProvider {
    async fn get_content_parts(
        &self,
        application_id: &str,
        context: &CampaignContext,
    ) -> Result<Vec<ContentPiece>> {
        let key = (application_id.to_string(), context.template_key().to_string());
        let pieces = self
            .campaigns
            .get(&key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        tracing::debug!(
            application_id = %application_id,
            template_key = %context.template_key(),
            piece_count = pieces.len(),
            "Resolved campaign content"
        );

        Ok(pieces)
    }
}
