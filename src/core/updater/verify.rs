//! SHA-256 digests for downloaded artifacts.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::error::{UpdateError, UpdateResult};

/// Hex-encoded (lowercase) SHA-256 of a file, read in chunks.
pub async fn calculate_sha256(path: &Path) -> UpdateResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file's digest with `expected`.
///
/// The comparison is exact: published digests are expected in lowercase hex.
pub async fn verify_sha256(path: &Path, expected: &str) -> UpdateResult<()> {
    let actual = calculate_sha256(path).await?;
    if actual != expected {
        return Err(UpdateError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
