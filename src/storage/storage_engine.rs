use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::core::{FileId, NodeId};
use crate::storage::{ChunkInfo, FileInfo, IndexStore, NodeChunkMap};
use crate::utils::{Result, RippleError};

const FILE_PREFIX: &str = "file";
const CHUNKS_PREFIX: &str = "chunks";
const NODE_CHUNKS_PREFIX: &str = "nodechunks";

/// Durable index backed by a sled tree under a single directory.
///
/// Layout: `file/<fileID>`, `chunks/<fileID>`, `nodechunks/<nodeID>`, each
/// holding a JSON encoded record.
pub struct StorageEngine {
    db: sled::Db,
}

impl StorageEngine {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|e| {
            RippleError::IoError(format!(
                "Failed to create store directory {}: {}",
                base_dir.display(),
                e
            ))
        })?;

        let db = sled::open(&base_dir)?;
        info!("Index store opened at: {:?}", base_dir);
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn key(prefix: &str, id: &str) -> Vec<u8> {
        format!("{}/{}", prefix, id).into_bytes()
    }

    fn put<T: Serialize>(&self, key: Vec<u8>, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key, bytes)?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(&self, key: Vec<u8>, what: String) -> Result<T> {
        match self.db.get(&key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(RippleError::NotFound(what)),
        }
    }
}

impl IndexStore for StorageEngine {
    fn save_file(&self, info: &FileInfo) -> Result<()> {
        self.put(Self::key(FILE_PREFIX, info.id.as_str()), info)?;
        debug!("Saved file record {}", info.id);
        Ok(())
    }

    fn get_file(&self, id: &FileId) -> Result<FileInfo> {
        self.fetch(Self::key(FILE_PREFIX, id.as_str()), format!("file {}", id))
    }

    fn list_files(&self) -> Result<Vec<FileInfo>> {
        let prefix = format!("{}/", FILE_PREFIX);
        let mut files = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            match serde_json::from_slice::<FileInfo>(&value) {
                Ok(info) => files.push(info),
                Err(e) => warn!(
                    "Skipping undecodable record {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(files)
    }

    fn save_chunks(&self, file_id: &FileId, chunks: &[ChunkInfo]) -> Result<()> {
        self.put(Self::key(CHUNKS_PREFIX, file_id.as_str()), &chunks)?;
        debug!("Saved {} chunk records for {}", chunks.len(), file_id);
        Ok(())
    }

    fn get_chunks(&self, file_id: &FileId) -> Result<Vec<ChunkInfo>> {
        self.fetch(
            Self::key(CHUNKS_PREFIX, file_id.as_str()),
            format!("chunks of {}", file_id),
        )
    }

    fn save_node_chunks(&self, map: &NodeChunkMap) -> Result<()> {
        self.put(Self::key(NODE_CHUNKS_PREFIX, map.node_id.as_str()), map)
    }

    fn get_node_chunks(&self, node_id: &NodeId) -> Result<NodeChunkMap> {
        self.fetch(
            Self::key(NODE_CHUNKS_PREFIX, node_id.as_str()),
            format!("node chunk map {}", node_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::index_store::conformance;

    fn open_temp() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = StorageEngine::open(dir.path().join("index")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_sled_round_trip() {
        let (_dir, store) = open_temp();
        conformance::round_trip(&store);
    }

    #[test]
    fn test_sled_not_found() {
        let (_dir, store) = open_temp();
        conformance::not_found(&store);
    }

    #[test]
    fn test_sled_last_write_wins() {
        let (_dir, store) = open_temp();
        conformance::last_write_wins(&store);
    }

    #[test]
    fn test_sled_list_files_ignores_other_namespaces() {
        let (_dir, store) = open_temp();
        let (info, chunks) = conformance::sample_file("/data/only.bin", 9);
        store.save_chunks(&info.id, &chunks).unwrap();
        assert!(store.list_files().unwrap().is_empty());

        conformance::list_files(&store);
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let (info, chunks) = conformance::sample_file("/data/durable.bin", 12);
        {
            let store = StorageEngine::open(&path).unwrap();
            store.save_file(&info).unwrap();
            store.save_chunks(&info.id, &chunks).unwrap();
            store.flush().unwrap();
        }

        let store = StorageEngine::open(&path).unwrap();
        assert_eq!(store.get_file(&info.id).unwrap(), info);
        assert_eq!(store.get_chunks(&info.id).unwrap(), chunks);
    }

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(StorageEngine::key(FILE_PREFIX, "abc"), b"file/abc".to_vec());
        assert_eq!(StorageEngine::key(NODE_CHUNKS_PREFIX, "n"), b"nodechunks/n".to_vec());
    }
}
