use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{FileId, NodeId};
use crate::storage::{ChunkInfo, FileInfo, NodeChunkMap};
use crate::utils::{Result, RippleError};

/// Persistence for file metadata, chunk lists and node ownership.
///
/// Saves are unconditional upserts keyed by ID. Lookups of an absent key fail
/// with [`RippleError::NotFound`] and nothing else. Writes are independent;
/// there is no cross-record transaction.
pub trait IndexStore: Send + Sync {
    fn save_file(&self, info: &FileInfo) -> Result<()>;
    fn get_file(&self, id: &FileId) -> Result<FileInfo>;
    /// All saved files, in no particular order.
    fn list_files(&self) -> Result<Vec<FileInfo>>;

    fn save_chunks(&self, file_id: &FileId, chunks: &[ChunkInfo]) -> Result<()>;
    fn get_chunks(&self, file_id: &FileId) -> Result<Vec<ChunkInfo>>;

    fn save_node_chunks(&self, map: &NodeChunkMap) -> Result<()>;
    fn get_node_chunks(&self, node_id: &NodeId) -> Result<NodeChunkMap>;
}

#[derive(Default)]
struct Tables {
    files: HashMap<FileId, FileInfo>,
    chunks: HashMap<FileId, Vec<ChunkInfo>>,
    node_chunks: HashMap<NodeId, NodeChunkMap>,
}

/// Ephemeral store for tests and one-shot sessions.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IndexStore for MemoryStore {
    fn save_file(&self, info: &FileInfo) -> Result<()> {
        self.write().files.insert(info.id.clone(), info.clone());
        Ok(())
    }

    fn get_file(&self, id: &FileId) -> Result<FileInfo> {
        self.read()
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| RippleError::NotFound(format!("file {}", id)))
    }

    fn list_files(&self) -> Result<Vec<FileInfo>> {
        Ok(self.read().files.values().cloned().collect())
    }

    fn save_chunks(&self, file_id: &FileId, chunks: &[ChunkInfo]) -> Result<()> {
        self.write().chunks.insert(file_id.clone(), chunks.to_vec());
        Ok(())
    }

    fn get_chunks(&self, file_id: &FileId) -> Result<Vec<ChunkInfo>> {
        self.read()
            .chunks
            .get(file_id)
            .cloned()
            .ok_or_else(|| RippleError::NotFound(format!("chunks of {}", file_id)))
    }

    fn save_node_chunks(&self, map: &NodeChunkMap) -> Result<()> {
        self.write().node_chunks.insert(map.node_id.clone(), map.clone());
        Ok(())
    }

    fn get_node_chunks(&self, node_id: &NodeId) -> Result<NodeChunkMap> {
        self.read()
            .node_chunks
            .get(node_id)
            .cloned()
            .ok_or_else(|| RippleError::NotFound(format!("node chunk map {}", node_id)))
    }
}

/// Shared checks run against every [`IndexStore`] backend.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::core::ChunkId;
    use crate::storage::chunk::plan_chunks;
    use chrono::{TimeZone, Utc};

    pub fn sample_file(path: &str, size: u64) -> (FileInfo, Vec<ChunkInfo>) {
        let id = FileId::derive(path, size);
        let mut chunks = plan_chunks(&id, size, 4).unwrap();
        for chunk in chunks.iter_mut() {
            chunk.hash = format!("hash-{}", chunk.index);
        }
        let info = FileInfo {
            id,
            name: path.rsplit('/').next().unwrap().to_string(),
            path: path.to_string(),
            size,
            hash: "whole".to_string(),
            chunk_size: 4,
            chunk_count: chunks.len(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            description: "sample".to_string(),
        };
        (info, chunks)
    }

    pub fn round_trip(store: &dyn IndexStore) {
        let (info, chunks) = sample_file("/data/a.bin", 10);
        store.save_file(&info).unwrap();
        store.save_chunks(&info.id, &chunks).unwrap();
        let map = NodeChunkMap::from_chunks(NodeId::from("node-1"), &chunks);
        store.save_node_chunks(&map).unwrap();

        assert_eq!(store.get_file(&info.id).unwrap(), info);
        assert_eq!(store.get_chunks(&info.id).unwrap(), chunks);
        assert_eq!(store.get_node_chunks(&map.node_id).unwrap(), map);
    }

    pub fn not_found(store: &dyn IndexStore) {
        assert!(store.get_file(&FileId::from("missing")).unwrap_err().is_not_found());
        assert!(store.get_chunks(&FileId::from("missing")).unwrap_err().is_not_found());
        assert!(store
            .get_node_chunks(&NodeId::from("missing"))
            .unwrap_err()
            .is_not_found());
    }

    pub fn last_write_wins(store: &dyn IndexStore) {
        let (mut info, chunks) = sample_file("/data/b.bin", 8);
        store.save_file(&info).unwrap();
        info.description = "updated".to_string();
        store.save_file(&info).unwrap();
        assert_eq!(store.get_file(&info.id).unwrap().description, "updated");

        store.save_chunks(&info.id, &chunks).unwrap();
        store.save_chunks(&info.id, &chunks[..1]).unwrap();
        assert_eq!(store.get_chunks(&info.id).unwrap().len(), 1);

        let map = NodeChunkMap {
            node_id: NodeId::from("node-2"),
            chunk_ids: vec![ChunkId::from("c1")],
        };
        store.save_node_chunks(&map).unwrap();
        let replaced = NodeChunkMap {
            node_id: NodeId::from("node-2"),
            chunk_ids: vec![],
        };
        store.save_node_chunks(&replaced).unwrap();
        assert_eq!(store.get_node_chunks(&map.node_id).unwrap(), replaced);
    }

    pub fn list_files(store: &dyn IndexStore) {
        let (a, _) = sample_file("/data/list-a.bin", 3);
        let (b, _) = sample_file("/data/list-b.bin", 5);
        store.save_file(&a).unwrap();
        store.save_file(&b).unwrap();

        let mut ids: Vec<FileId> = store.list_files().unwrap().into_iter().map(|f| f.id).collect();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_round_trip() {
        conformance::round_trip(&MemoryStore::new());
    }

    #[test]
    fn test_memory_not_found() {
        conformance::not_found(&MemoryStore::new());
    }

    #[test]
    fn test_memory_last_write_wins() {
        conformance::last_write_wins(&MemoryStore::new());
    }

    #[test]
    fn test_memory_list_files() {
        let store = MemoryStore::new();
        assert!(store.list_files().unwrap().is_empty());
        conformance::list_files(&store);
    }
}
