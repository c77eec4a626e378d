//! Content-addressed integrity digests for backup artifacts.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::Result;

/// Lowercase hex SHA-256 of the given bytes.
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn digest_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    Ok(digest(&data))
}

/// Re-reads the artifact and requires byte-exact digest equality.
pub fn verify(path: &Path, expected: &str) -> Result<bool> {
    let actual = digest_file(path)?;
    Ok(actual == expected)
}
