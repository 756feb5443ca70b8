use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::utils::{Result, RippleError};

const READ_BUF_SIZE: usize = 64 * 1024;

pub struct HashUtils;

impl HashUtils {
    pub fn hash_data(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Streams the whole file through SHA-256. Returns the hex digest and the byte count.
    pub async fn compute_file_sha256(path: &Path) -> Result<(String, u64)> {
        let mut file = File::open(path).await.map_err(|e| {
            RippleError::IoError(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buffer).await.map_err(|e| {
                RippleError::IoError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            total += n as u64;
        }

        Ok((hex::encode(hasher.finalize()), total))
    }

    /// Hashes exactly `size` bytes starting at `offset`. A short read is an error.
    pub async fn compute_chunk_sha256(path: &Path, offset: u64, size: u64) -> Result<String> {
        let mut file = File::open(path).await.map_err(|e| {
            RippleError::IoError(format!("Failed to open {}: {}", path.display(), e))
        })?;
        file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
            RippleError::IoError(format!("Failed to seek to {}: {}", offset, e))
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUF_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            let n = file.read(&mut buffer[..want]).await.map_err(|e| {
                RippleError::IoError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            if n == 0 {
                return Err(RippleError::IoError(format!(
                    "Short read at offset {}: {} of {} bytes missing",
                    offset, remaining, size
                )));
            }
            hasher.update(&buffer[..n]);
            remaining -= n as u64;
        }

        Ok(hex::encode(hasher.finalize()))
    }
}
