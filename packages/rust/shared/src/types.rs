//! Core domain types for the playbook document cache.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Identity string recorded in every manifest this tool writes.
pub const GENERATOR_NAME: &str = concat!("playbook-docs@", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Where a loaded document's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    /// Fetched, extracted, and converted during this load.
    Fresh,
    /// Served from the last validated cache.
    Cache,
}

impl std::fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => f.write_str("fresh"),
            Self::Cache => f.write_str("cache"),
        }
    }
}

/// One named, converted document held in memory after a load.
///
/// Documents are never mutated after creation; a new load produces new values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Artifact filename (e.g. `principles.md`).
    pub name: String,
    /// Location of the artifact on disk.
    pub path: PathBuf,
    /// Converted Markdown content.
    pub content: String,
    /// Byte length of `content`.
    pub size: usize,
    /// Origin of the content.
    pub source: DocumentSource,
    /// SHA-256 hex digest of `content`.
    pub content_hash: String,
}

// ---------------------------------------------------------------------------
// CacheManifest
// ---------------------------------------------------------------------------

/// The manifest JSON stored alongside the cached artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManifest {
    /// When the cached content was fetched.
    pub fetched_at: DateTime<Utc>,
    /// SHA-256 of the complete fetched body.
    pub api_response_hash: String,
    /// Content identifier from the source envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gov_uk_content_id: Option<String>,
    /// One entry per expected artifact.
    pub sections: Vec<SectionCacheInfo>,
    /// Tool identity that wrote this manifest.
    pub generated_by: String,
    /// Toolchain identity, informational only.
    #[serde(rename = "nodeVersion")]
    pub runtime_version: String,
}

impl CacheManifest {
    /// Look up the entry for a given artifact filename.
    pub fn section(&self, filename: &str) -> Option<&SectionCacheInfo> {
        self.sections.iter().find(|s| s.filename == filename)
    }
}

/// Render a timestamp exactly as the manifest stores `fetchedAt`.
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Manifest entry for a single cached artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionCacheInfo {
    /// Artifact filename.
    pub filename: String,
    /// Heading identifier (or `fuzzy:<text>`) that matched during extraction.
    pub heading_id: String,
    /// SHA-256 of the artifact bytes.
    pub content_hash: String,
    /// Artifact size in bytes.
    pub size_bytes: usize,
    /// Whether the section was extracted.
    pub extracted: bool,
    /// Failure detail when `extracted` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Toolchain string recorded in the manifest's `nodeVersion` slot.
pub fn runtime_version() -> String {
    format!("rust-{}", env!("CARGO_PKG_RUST_VERSION"))
}

// ---------------------------------------------------------------------------
// CacheValidationResult
// ---------------------------------------------------------------------------

/// Outcome of a cache integrity check. Produced fresh on every call.
#[derive(Debug, Clone, Default)]
pub struct CacheValidationResult {
    /// True when no errors were collected.
    pub valid: bool,
    /// Human-readable problems, one per finding.
    pub errors: Vec<String>,
    /// The manifest that was checked, if it could be read.
    pub manifest: Option<CacheManifest>,
}
