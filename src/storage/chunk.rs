use serde::{Deserialize, Serialize};

use crate::core::{ChunkId, FileId, NodeId};
use crate::utils::{Result, RippleError};

pub use crate::core::config::DEFAULT_CHUNK_SIZE;

/// A contiguous byte range of a shared file. Identity is positional, not content based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub file_id: FileId,
    pub index: usize,
    pub size: u64,
    /// Hex SHA-256 of the chunk bytes, empty when hashing was skipped.
    pub hash: String,
    pub offset: u64,
}

/// Which chunks a node can serve. Built once at share time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChunkMap {
    pub node_id: NodeId,
    pub chunk_ids: Vec<ChunkId>,
}

impl NodeChunkMap {
    pub fn from_chunks(node_id: NodeId, chunks: &[ChunkInfo]) -> Self {
        Self {
            node_id,
            chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
        }
    }
}

/// Zero means "use the default".
pub fn effective_chunk_size(chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

pub fn chunk_count(size: u64, chunk_size: u64) -> usize {
    size.div_ceil(effective_chunk_size(chunk_size)) as usize
}

/// Lays out the chunk list of a `size`-byte file without hashing anything.
///
/// The result partitions `[0, size)`: offsets start at zero, are contiguous, and
/// every chunk but the last is exactly `chunk_size` long.
pub fn plan_chunks(file_id: &FileId, size: u64, chunk_size: u64) -> Result<Vec<ChunkInfo>> {
    let chunk_size = effective_chunk_size(chunk_size);
    let count = chunk_count(size, chunk_size);

    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0u64;
    for index in 0..count {
        let len = chunk_size.min(size - offset);
        chunks.push(ChunkInfo {
            id: ChunkId::derive(file_id, index),
            file_id: file_id.clone(),
            index,
            size: len,
            hash: String::new(),
            offset,
        });
        offset += len;
    }

    if offset != size {
        return Err(RippleError::SizeMismatch { offset, size });
    }
    Ok(chunks)
}
