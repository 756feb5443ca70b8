use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::FileId;
use crate::storage::chunk::{effective_chunk_size, plan_chunks};
use crate::storage::{ChunkInfo, HashUtils};
use crate::utils::{Result, RippleError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: FileId,
    pub name: String,
    pub path: String,
    pub size: u64,
    /// Hex SHA-256 of the whole file.
    pub hash: String,
    pub chunk_size: u64,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub description: String,
}

/// Indexes `path` with per-chunk hashes. See [`build_file_index_with`].
pub async fn build_file_index(path: &Path, chunk_size: u64) -> Result<(FileInfo, Vec<ChunkInfo>)> {
    build_file_index_with(path, chunk_size, true).await
}

/// Hashes the file, lays out its chunks and optionally hashes each chunk.
///
/// Either the complete index is returned or an error; no partial chunk list escapes.
pub async fn build_file_index_with(
    path: &Path,
    chunk_size: u64,
    hash_chunks: bool,
) -> Result<(FileInfo, Vec<ChunkInfo>)> {
    let (file_hash, size) = HashUtils::compute_file_sha256(path).await?;
    let chunk_size = effective_chunk_size(chunk_size);

    let path_str = path.to_string_lossy().to_string();
    let id = FileId::derive(&path_str, size);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| RippleError::ConfigError(format!("Not a file path: {}", path_str)))?;

    let mut chunks = plan_chunks(&id, size, chunk_size)?;
    if hash_chunks {
        for chunk in chunks.iter_mut() {
            chunk.hash = HashUtils::compute_chunk_sha256(path, chunk.offset, chunk.size).await?;
        }
        debug!("Hashed {} chunks of {}", chunks.len(), path_str);
    }

    let info = FileInfo {
        id,
        name,
        path: path_str,
        size,
        hash: file_hash,
        chunk_size,
        chunk_count: chunks.len(),
        created_at: Utc::now(),
        description: String::new(),
    };

    info!(
        "Indexed {} ({} bytes, {} chunks of {} bytes)",
        info.name, info.size, info.chunk_count, info.chunk_size
    );
    Ok((info, chunks))
}
