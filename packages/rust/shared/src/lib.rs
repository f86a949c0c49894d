//! Shared types, error model, and configuration for the playbook content pipeline.
//!
//! This crate is the foundation depended on by all other playbook crates.
//! It provides:
//! - [`PlaybookError`] as the unified error type
//! - Domain types ([`Document`], [`CacheManifest`], [`CacheValidationResult`])
//! - The section mapping table ([`SectionMapping`], [`default_mappings`])
//! - Configuration ([`AppConfig`], [`LoadConfig`], config loading)

pub mod config;
pub mod error;
pub mod hash;
pub mod mapping;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, DEFAULT_SOURCE_URL, LoadConfig, LogFormat, LoggingConfig,
    SourceConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PlaybookError, Result};
pub use hash::content_hash;
pub use mapping::{
    ARTIFACT_EXTENSION, SECTION_COUNT, SectionMapping, default_mappings, expected_filenames,
    is_artifact_name, validate_mappings,
};
pub use types::{
    CacheManifest, CacheValidationResult, Document, DocumentSource, GENERATOR_NAME,
    SectionCacheInfo, format_timestamp, runtime_version,
};
