//! Campaign template compilation and rendering.
//!
//! This module provides:
//! - A Handlebars-style template language with asynchronous helpers
//! - A per-campaign cache of compiled templates (compile once, reuse forever)
//! - Concurrent rendering of all content pieces for one recipient
//!
//! # Example
//!
//! ```ignore
//! let cache = TemplateCache::new(HelperRegistry::with_builtins());
//!
//! let pieces = vec![
//!     ContentPiece::new("APNS.Title", "Hello {{name}}"),
//!     ContentPiece::new("SMS.Body", "{{name}}: {{msg}}").with_default_subs(r#"{"msg":"Hi"}"#),
//! ];
//!
//! let endpoint = json!({"name": "Alice"});
//! let rendered = cache
//!     .render("campaign-1", &pieces, endpoint.as_object().unwrap())
//!     .await?;
//!
//! assert_eq!(rendered[1].content, "Alice: Hi");
//! ```

mod cache;
mod compiled;
mod helpers;
mod parser;
mod types;

pub use cache::{TemplateCache, TemplateCacheStats};
pub use compiled::{CompileOptions, CompiledTemplate, RenderFailure};
pub use helpers::{Helper, HelperError, HelperRegistry, HelperResult};
pub use parser::CompileError;
pub use types::{CompiledTemplateEntry, ContentPiece, RenderedPiece};
