//! Shared types, error model, and configuration for paperpipe.
//!
//! This crate is the foundation depended on by all other paperpipe crates.
//! It provides:
//! - [`PaperpipeError`]: the unified error type
//! - Domain types ([`PipelineRecord`], [`SectionKey`], [`StageError`], [`ArticleMetadata`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, OpenRouterConfig, PipelineConfig, PromptsConfig, SearchConfig,
    StorageConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate, validate_api_key,
};
pub use error::{PaperpipeError, Result};
pub use types::{
    ArticleMetadata, ContentAddress, PipelineRecord, RunId, SectionKey, Sections, StageError,
    StageErrorKind, StoredChunk, normalize_key,
};
