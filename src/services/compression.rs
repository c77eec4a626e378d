//! Gzip compression of backup artifacts.
//!
//! Runs after encryption per the established artifact format, so the input is
//! high-entropy ciphertext and the ratio is close to 1. The ordering is kept
//! for compatibility with artifacts already on disk.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{BackupError, Result};

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| BackupError::Compression(format!("failed to compress: {e}")))?;
    encoder
        .finish()
        .map_err(|e| BackupError::Compression(format!("failed to finalize stream: {e}")))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BackupError::Compression(format!("failed to decompress: {e}")))?;
    Ok(out)
}
