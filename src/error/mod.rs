use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Content fetch failed: {0}")]
    ContentFetch(String),

    #[error("Template compile error in {piece_type}: {message}")]
    TemplateCompile { piece_type: String, message: String },

    #[error("Render error in {piece_type}: {message}")]
    Render { piece_type: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiverError {
    /// Stable label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ArchiverError::MalformedEvent(_) => "malformed_event",
            ArchiverError::ContentFetch(_) => "content_fetch",
            ArchiverError::TemplateCompile { .. } => "template_compile",
            ArchiverError::Render { .. } => "render",
            ArchiverError::Persistence(_) => "persistence",
            ArchiverError::Config(_) => "config",
            ArchiverError::Io(_) => "io",
        }
    }

    pub(crate) fn compile(piece_type: &str, message: impl Into<String>) -> Self {
        ArchiverError::TemplateCompile {
            piece_type: piece_type.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn render(piece_type: &str, message: impl Into<String>) -> Self {
        ArchiverError::Render {
            piece_type: piece_type.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
