mod settings;

pub use settings::{ArchiveConfig, ContentConfig, LogConfig, Settings, TemplateConfig};
