//! Application configuration for the playbook content pipeline.
//!
//! User config lives at `~/.playbook/playbook.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlaybookError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "playbook.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".playbook";

/// Content API endpoint for the AI Playbook publication.
pub const DEFAULT_SOURCE_URL: &str = "https://www.gov.uk/api/content/government/publications/ai-playbook-for-the-uk-government/artificial-intelligence-playbook-for-the-uk-government-html";

// ---------------------------------------------------------------------------
// Config structs (matching playbook.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote content source.
    #[serde(default)]
    pub source: SourceConfig,

    /// Local cache locations.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Log level and format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Content API URL.
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum fetch attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay schedule between attempts, in milliseconds.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Largest accepted payload, in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delays_ms: default_retry_delays_ms(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

fn default_source_url() -> String {
    DEFAULT_SOURCE_URL.into()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_attempts() -> u32 {
    7
}
fn default_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000]
}
fn default_max_response_bytes() -> u64 {
    5 * 1024 * 1024
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one Markdown file per section.
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Path of the manifest JSON file.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Verify artifact hashes before serving cache-only loads.
    #[serde(default = "default_true")]
    pub validate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            manifest_path: default_manifest_path(),
            validate: true,
        }
    }
}

fn default_cache_dir() -> String {
    ".cache/docs".into()
}
fn default_manifest_path() -> String {
    ".cache/metadata.json".into()
}
fn default_true() -> bool {
    true
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]` section: the single logging setup value handed to the
/// subscriber at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Load config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime loader configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Skip the network and serve the cache directly.
    pub use_cache_only: bool,
    /// Directory holding the cached artifacts.
    pub cache_dir: PathBuf,
    /// Manifest file location.
    pub manifest_path: PathBuf,
    /// Content API URL.
    pub source_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Maximum fetch attempts.
    pub max_attempts: u32,
    /// Backoff schedule, indexed by attempt number.
    pub retry_delays: Vec<Duration>,
    /// Largest accepted payload, in bytes.
    pub max_response_bytes: u64,
    /// Verify cache integrity before a cache-only load.
    pub validate_cache: bool,
}

impl From<&AppConfig> for LoadConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            use_cache_only: false,
            cache_dir: PathBuf::from(&config.cache.dir),
            manifest_path: PathBuf::from(&config.cache.manifest_path),
            source_url: config.source.url.clone(),
            timeout: Duration::from_secs(config.source.timeout_secs),
            max_attempts: config.source.max_attempts,
            retry_delays: config
                .source
                .retry_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            max_response_bytes: config.source.max_response_bytes,
            validate_cache: config.cache.validate,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.playbook/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PlaybookError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.playbook/playbook.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PlaybookError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PlaybookError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PlaybookError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PlaybookError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PlaybookError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations the fetch loop cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.source.max_attempts == 0 {
        return Err(PlaybookError::config("source.max_attempts must be at least 1"));
    }
    if config.source.timeout_secs == 0 {
        return Err(PlaybookError::config("source.timeout_secs must be at least 1"));
    }
    if config.source.url.trim().is_empty() {
        return Err(PlaybookError::config("source.url must not be empty"));
    }
    Ok(())
}
