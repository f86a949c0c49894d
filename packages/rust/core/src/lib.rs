//! Content loader orchestration for the playbook document cache.
//!
//! This crate ties together fetching, section extraction, Markdown
//! conversion, and the cache store into a single refresh-or-fallback
//! load cycle.

pub mod loader;

pub use loader::{ContentLoader, LoadMetrics, LoadProgress, LoadResult, SilentProgress};
