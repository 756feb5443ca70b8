pub mod chunk;
pub mod file_index;
pub mod hash;
pub mod index_store;
pub mod storage_engine;

pub use chunk::{ChunkInfo, NodeChunkMap, DEFAULT_CHUNK_SIZE};
pub use file_index::{build_file_index, build_file_index_with, FileInfo};
pub use hash::HashUtils;
pub use index_store::{IndexStore, MemoryStore};
pub use storage_engine::StorageEngine;
