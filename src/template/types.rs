//! Template types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::compiled::CompiledTemplate;

/// One element of a campaign's content definition, as returned by the
/// content provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPiece {
    /// Logical label, e.g. `APNS.Title` or `SMS.Body`
    pub piece_type: String,

    /// Template body; pieces without one are not rendered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// JSON-encoded default substitutions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_subs: Option<String>,

    /// Delivery channel identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl ContentPiece {
    pub fn new(piece_type: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            piece_type: piece_type.into(),
            html: Some(html.into()),
            default_subs: None,
            channel: None,
        }
    }

    pub fn with_default_subs(mut self, default_subs: impl Into<String>) -> Self {
        self.default_subs = Some(default_subs.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Whether the piece has a non-empty template body
    pub fn has_template(&self) -> bool {
        self.html.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// The cached, ready-to-render form of a content piece
#[derive(Debug, Clone)]
pub struct CompiledTemplateEntry {
    pub piece_type: String,
    pub template: CompiledTemplate,
    /// Decoded `defaultSubs`; these win over endpoint attributes
    pub default_substitutions: Map<String, Value>,
    pub channel: Option<String>,
}

/// Final interpolated output for one content piece and one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPiece {
    pub piece_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}
