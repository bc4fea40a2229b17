//! Hashing Helpers
//!
//! SHA-256 based stable identifiers and content checksums.

use sha2::{Digest, Sha256};

/// Full SHA-256 hex digest of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Content hash used to detect file changes between scans.
pub fn content_hash(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

/// Deterministic 16-char id from an ordered list of parts.
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
