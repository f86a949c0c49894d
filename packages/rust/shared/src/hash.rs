//! Content hashing used for artifact integrity checks.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 digest of the exact UTF-8 bytes of `content`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
