use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub template: TemplateConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentConfig {
    /// JSON file seeding the static content provider
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Backend type: "memory" or "file"
    #[serde(default = "default_archive_backend")]
    pub backend: String,
    /// Root directory for the file backend
    #[serde(default = "default_archive_root")]
    pub root_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    /// HTML-escape `{{ }}` interpolations
    #[serde(default = "default_escape_html")]
    pub escape_html: bool,
}

fn default_archive_backend() -> String {
    "memory".to_string()
}

fn default_archive_root() -> String {
    "./archive".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_escape_html() -> bool {
    true
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("archive.backend", "memory")?
            .set_default("archive.root_dir", "./archive")?
            .set_default("log.format", "text")?
            .set_default("template.escape_html", true)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ARCHIVER__ARCHIVE__BACKEND, ARCHIVER__CONTENT__SOURCE_FILE, etc.
            .add_source(
                Environment::with_prefix("ARCHIVER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: default_archive_backend(),
            root_dir: default_archive_root(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            escape_html: default_escape_html(),
        }
    }
}
