//! Application configuration for paperpipe.
//!
//! User config lives at `~/.paperpipe/paperpipe.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PaperpipeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperpipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperpipe";

// ---------------------------------------------------------------------------
// Config structs (matching paperpipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Pipeline orchestration settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Search API settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Recursive crawl settings.
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Prompt templates.
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for every generation call.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Chat-completions base URL.
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_openrouter_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_llm_timeout() -> u64 {
    120
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retries granted to a rate-limited generation call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Run independent branches (keywords, references) concurrently.
    #[serde(default = "default_true")]
    pub fan_out: bool,

    /// Section bodies are truncated to this many characters before prompting.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Anchor candidates for keyword extraction, in priority order.
    #[serde(default = "default_keyword_anchors")]
    pub keyword_anchors: Vec<String>,

    /// Anchor candidates for reference extraction, in priority order.
    #[serde(default = "default_reference_anchors")]
    pub reference_anchors: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            fan_out: true,
            summary_max_chars: default_summary_max_chars(),
            keyword_anchors: default_keyword_anchors(),
            reference_anchors: default_reference_anchors(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_true() -> bool {
    true
}
fn default_summary_max_chars() -> usize {
    12_000
}
fn default_keyword_anchors() -> Vec<String> {
    vec!["abstract".into(), "introduction".into()]
}
fn default_reference_anchors() -> Vec<String> {
    vec!["references".into(), "bibliography".into()]
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Atom query endpoint.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_sort_by")]
    pub sort_by: String,

    #[serde(default = "default_sort_order")]
    pub sort_order: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            max_results: default_max_results(),
            sort_by: default_sort_by(),
            sort_order: default_sort_order(),
        }
    }
}

fn default_search_base_url() -> String {
    "http://export.arxiv.org/api/query".into()
}
fn default_max_results() -> u32 {
    10
}
fn default_sort_by() -> String {
    "submittedDate".into()
}
fn default_sort_order() -> String {
    "descending".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Extraction tasks allowed in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Maximum related-search expansion depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Lower bound of the jittered delay between fetches of one origin.
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the jittered delay between fetches of one origin.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,

    /// Search results page; `q` and `start` are appended per request.
    #[serde(default = "default_base_search_url")]
    pub base_search_url: String,

    /// Result pages fetched per query.
    #[serde(default = "default_pages_per_query")]
    pub pages_per_query: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_depth: default_max_depth(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            timeout_secs: default_crawl_timeout(),
            base_search_url: default_base_search_url(),
            pages_per_query: default_pages_per_query(),
        }
    }
}

fn default_concurrency() -> u32 {
    1
}
fn default_max_depth() -> u32 {
    1
}
fn default_min_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    5_000
}
fn default_crawl_timeout() -> u64 {
    30
}
fn default_base_search_url() -> String {
    "https://scholar.google.com/scholar".into()
}
fn default_pages_per_query() -> u32 {
    2
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// libSQL database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// JSON Lines cache of generated extraction schemas.
    #[serde(default = "default_schema_file")]
    pub schema_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            schema_file: default_schema_file(),
        }
    }
}

fn default_db_path() -> String {
    "~/.paperpipe/paperpipe.db".into()
}
fn default_schema_file() -> String {
    "~/.paperpipe/schemas.jsonl".into()
}

/// `[prompts]` section. Empty strings fall back to the built-in prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub selection: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub references: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub schema: String,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperpipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperpipeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperpipe/paperpipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
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
    let content = std::fs::read_to_string(path).map_err(|e| PaperpipeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PaperpipeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperpipeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperpipeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperpipeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values no run could succeed with.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.crawl.concurrency == 0 {
        return Err(PaperpipeError::config("crawl.concurrency must be at least 1"));
    }
    if config.crawl.min_delay_ms > config.crawl.max_delay_ms {
        return Err(PaperpipeError::config(format!(
            "crawl.min_delay_ms ({}) exceeds crawl.max_delay_ms ({})",
            config.crawl.min_delay_ms, config.crawl.max_delay_ms
        )));
    }
    if config.pipeline.keyword_anchors.is_empty() || config.pipeline.reference_anchors.is_empty() {
        return Err(PaperpipeError::config(
            "pipeline anchor candidate lists must not be empty",
        ));
    }
    Ok(())
}

/// Check that the OpenRouter API key env var is set and non-empty, returning it.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PaperpipeError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_retries"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_retries = 2
fan_out = false

[crawl]
concurrency = 3
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_retries, 2);
        assert!(!config.pipeline.fan_out);
        assert_eq!(config.pipeline.keyword_anchors, vec!["abstract", "introduction"]);
        assert_eq!(config.crawl.concurrency, 3);
        assert_eq!(config.crawl.max_depth, 1);
        assert_eq!(config.search.sort_by, "submittedDate");
    }

    #[test]
    fn validation_rejects_inverted_delays() {
        let mut config = AppConfig::default();
        config.crawl.min_delay_ms = 10;
        config.crawl.max_delay_ms = 5;
        let err = validate(&config).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("min_delay_ms"));
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.crawl.concurrency = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "PP_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
