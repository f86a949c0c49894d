//! Error types for the playbook content pipeline.
//!
//! Library crates use [`PlaybookError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PlaybookError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A single fetch attempt failed (transport, timeout, status, size, or schema).
    #[error("fetch error: {message}")]
    Fetch {
        message: String,
        status: Option<u16>,
    },

    /// Every fetch attempt failed; wraps the last attempt's error.
    #[error("failed to fetch from source after {attempts} attempts: {last}")]
    FetchExhausted {
        attempts: u32,
        #[source]
        last: Box<PlaybookError>,
    },

    /// One or more sections could not be matched in the fetched document.
    #[error(
        "failed to extract all sections ({extracted}/{total} successful). Failed: {}",
        failed.join(", ")
    )]
    Extraction {
        extracted: usize,
        total: usize,
        failed: Vec<String>,
    },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Writing an artifact into the cache directory failed.
    #[error("failed to write cache file {filename}: {source}")]
    CacheWrite {
        filename: String,
        source: std::io::Error,
    },

    /// Reading an artifact from the cache directory failed.
    #[error("failed to read cache file {filename}: {source}")]
    CacheRead {
        filename: String,
        source: std::io::Error,
    },

    /// The cache manifest is missing, unreadable, or structurally invalid.
    #[error("manifest error: {message}")]
    Manifest { message: String },

    /// The cache exists but failed integrity validation.
    #[error("cache validation failed: {}", errors.join("; "))]
    CacheValidation { errors: Vec<String> },

    /// Both the refresh path and the cache fallback failed.
    #[error(
        "failed to refresh from source and no valid cache available. \
         Refresh error: {refresh}. Cache error: {cache}"
    )]
    ContentUnavailable {
        refresh: Box<PlaybookError>,
        cache: Box<PlaybookError>,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad filename, bad mapping table, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PlaybookError>;

impl PlaybookError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error without an HTTP status.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            status: None,
        }
    }

    /// Create a fetch error for a non-success HTTP status.
    pub fn fetch_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create a manifest error from any displayable message.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status code of the underlying fetch failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => *status,
            Self::FetchExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }
}
