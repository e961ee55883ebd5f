//! Per-campaign compiled template cache

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use crate::error::{ArchiverError, Result};
use crate::join::try_join_settled;
use crate::metrics::TemplateMetrics;

use super::compiled::{CompileOptions, CompiledTemplate};
use super::helpers::HelperRegistry;
use super::types::{CompiledTemplateEntry, ContentPiece, RenderedPiece};

type CampaignEntries = Arc<Vec<CompiledTemplateEntry>>;
type CampaignSlot = Arc<OnceCell<CampaignEntries>>;

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct TemplateCacheStats {
    /// Campaigns with compiled entries
    pub campaigns: usize,
    /// Campaign compilations performed
    pub compilations: u64,
    /// Lookups served from the cache
    pub hits: u64,
}

/// Compiled templates keyed by campaign.
///
/// Entries are compiled on first use and kept for the lifetime of the
/// cache. The first content definition seen for a campaign wins: later
/// calls get the same entries back, whatever pieces they pass.
///
/// Each campaign slot is a `OnceCell`, so concurrent first requests for the
/// same campaign share one compilation. A failed compilation leaves no
/// entry behind and the next request compiles again.
pub struct TemplateCache {
    entries: DashMap<String, CampaignSlot>,
    helpers: Arc<HelperRegistry>,
    options: CompileOptions,
    compilations: AtomicU64,
    hits: AtomicU64,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(HelperRegistry::with_builtins())
    }
}

impl TemplateCache {
    /// Create a cache whose templates use the given helpers
    pub fn new(helpers: HelperRegistry) -> Self {
        Self::with_options(helpers, CompileOptions::default())
    }

    pub fn with_options(helpers: HelperRegistry, options: CompileOptions) -> Self {
        Self {
            entries: DashMap::new(),
            helpers: Arc::new(helpers),
            options,
            compilations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Get the compiled entries for a campaign, compiling them on first use.
    ///
    /// An empty piece list returns an empty list and leaves the cache alone.
    pub async fn get_compilers(
        &self,
        campaign_id: &str,
        pieces: &[ContentPiece],
    ) -> Result<CampaignEntries> {
        if pieces.is_empty() {
            return Ok(Arc::new(Vec::new()));
        }

        let slot = self
            .entries
            .entry(campaign_id.to_string())
            .or_default()
            .clone();

        if let Some(entries) = slot.get() {
            self.record_hit(campaign_id);
            return Ok(entries.clone());
        }

        let result = slot
            .get_or_try_init(|| async { self.compile_campaign(campaign_id, pieces) })
            .await;

        match result {
            Ok(entries) => Ok(entries.clone()),
            Err(e) => {
                self.discard_failed_slot(campaign_id, &slot);
                Err(e)
            }
        }
    }

    /// Drop a slot whose compilation failed.
    ///
    /// Only the slot this caller initialised is removed, and only while no
    /// other task holds it. A waiter still parked on the cell retries the
    /// compile through the mapped slot, so a cell is never initialised
    /// outside the map.
    fn discard_failed_slot(&self, campaign_id: &str, slot: &CampaignSlot) -> bool {
        self.entries
            .remove_if(campaign_id, |_, current| {
                Arc::ptr_eq(current, slot)
                    && !current.initialized()
                    && Arc::strong_count(current) == 2
            })
            .is_some()
    }

    /// Render every piece of a campaign for one endpoint.
    ///
    /// Pieces render concurrently. The merged context for each piece starts
    /// from the endpoint attributes and then applies the piece's default
    /// substitutions, so defaults win on key collisions. The call returns
    /// once every piece has settled and fails if any piece failed.
    pub async fn render(
        &self,
        campaign_id: &str,
        pieces: &[ContentPiece],
        endpoint_attributes: &Map<String, Value>,
    ) -> Result<Vec<RenderedPiece>> {
        if pieces.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let compilers = self.get_compilers(campaign_id, pieces).await?;

        let renders = compilers.iter().map(|entry| async move {
            let mut context = endpoint_attributes.clone();
            for (key, value) in &entry.default_substitutions {
                context.insert(key.clone(), value.clone());
            }

            let merged = Value::Object(context);

            tracing::debug!(
                campaign_id = %campaign_id,
                piece_type = %entry.piece_type,
                context = %merged,
                "Rendering content piece"
            );

            let content = entry
                .template
                .render(&merged)
                .await
                .map_err(|e| ArchiverError::render(&entry.piece_type, e.to_string()))?;

            Ok::<_, ArchiverError>(RenderedPiece {
                piece_type: entry.piece_type.clone(),
                content,
                channel: entry.channel.clone(),
            })
        });

        let rendered = try_join_settled(renders).await?;
        TemplateMetrics::record_rendered(rendered.len(), started.elapsed());

        Ok(rendered)
    }

    /// Drop the compiled entries for a campaign.
    ///
    /// The render path never calls this; it exists for operators who know a
    /// campaign's content has changed.
    pub fn invalidate(&self, campaign_id: &str) -> bool {
        let removed = self.entries.remove(campaign_id).is_some();
        if removed {
            tracing::info!(campaign_id = %campaign_id, "Invalidated campaign templates");
        }
        removed
    }

    /// Whether compiled entries exist for a campaign
    pub fn contains(&self, campaign_id: &str) -> bool {
        self.entries
            .get(campaign_id)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> TemplateCacheStats {
        TemplateCacheStats {
            campaigns: self.entries.iter().filter(|e| e.initialized()).count(),
            compilations: self.compilations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }

    fn record_hit(&self, campaign_id: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        TemplateMetrics::record_cache_hit();
        tracing::trace!(campaign_id = %campaign_id, "Template cache hit");
    }

    fn compile_campaign(
        &self,
        campaign_id: &str,
        pieces: &[ContentPiece],
    ) -> Result<CampaignEntries> {
        let compiled: Result<Vec<_>> = pieces
            .iter()
            .filter(|piece| piece.has_template())
            .map(|piece| self.compile_piece(piece))
            .collect();

        let entries = match compiled {
            Ok(entries) => entries,
            Err(e) => {
                TemplateMetrics::record_compile_error();
                tracing::warn!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "Failed to compile campaign templates"
                );
                return Err(e);
            }
        };

        self.compilations.fetch_add(1, Ordering::Relaxed);
        TemplateMetrics::record_compiled(entries.len());
        tracing::info!(
            campaign_id = %campaign_id,
            piece_count = entries.len(),
            "Compiled campaign templates"
        );

        Ok(Arc::new(entries))
    }

    fn compile_piece(&self, piece: &ContentPiece) -> Result<CompiledTemplateEntry> {
        let source = piece.html.as_deref().unwrap_or_default();
        let template = CompiledTemplate::compile(source, self.helpers.clone(), self.options)
            .map_err(|e| ArchiverError::compile(&piece.piece_type, e.to_string()))?;

        Ok(CompiledTemplateEntry {
            piece_type: piece.piece_type.clone(),
            template,
            default_substitutions: decode_default_subs(piece)?,
            channel: piece.channel.clone(),
        })
    }
}

fn decode_default_subs(piece: &ContentPiece) -> Result<Map<String, Value>> {
    let raw = match piece.default_subs.as_deref() {
        None => return Ok(Map::new()),
        Some(raw) if raw.trim().is_empty() => return Ok(Map::new()),
        Some(raw) => raw,
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(ArchiverError::compile(
            &piece.piece_type,
            "defaultSubs must be a JSON object",
        )),
        Err(e) => Err(ArchiverError::compile(
            &piece.piece_type,
            format!("invalid defaultSubs: {}", e),
        )),
    }
}
