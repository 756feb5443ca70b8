use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::CryptoUtils;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a peer.
    NodeId
);
string_id!(
    /// Identifier of a shared file, derived from its path and size.
    FileId
);
string_id!(
    /// Identifier of a chunk, derived from its file and index.
    ChunkId
);

impl NodeId {
    /// 16 hex chars of sha256(addr + current time). Not stable across restarts.
    pub fn generate(addr: &str) -> Self {
        let seed = format!("{}{}", addr, chrono::Utc::now().to_rfc3339());
        Self(CryptoUtils::short_hash(seed.as_bytes(), 16))
    }
}

impl FileId {
    /// sha256("<path>:<size>"). Identical content at two paths gets two IDs.
    pub fn derive(path: &str, size: u64) -> Self {
        let data = format!("{}:{}", path, size);
        Self(CryptoUtils::hash_sha256(data.as_bytes()))
    }
}

impl ChunkId {
    /// First 16 hex chars of sha256("<file_id>:<index>").
    pub fn derive(file_id: &FileId, index: usize) -> Self {
        let data = format!("{}:{}", file_id, index);
        Self(CryptoUtils::short_hash(data.as_bytes(), 16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_depends_on_path_and_size() {
        let a = FileId::derive("/data/a.bin", 10);
        assert_eq!(a, FileId::derive("/data/a.bin", 10));
        assert_ne!(a, FileId::derive("/data/b.bin", 10));
        assert_ne!(a, FileId::derive("/data/a.bin", 11));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_chunk_id_is_positional() {
        let file = FileId::derive("/data/a.bin", 10);
        let c0 = ChunkId::derive(&file, 0);
        assert_eq!(c0.as_str().len(), 16);
        assert_eq!(c0, ChunkId::derive(&file, 0));
        assert_ne!(c0, ChunkId::derive(&file, 1));
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = NodeId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(NodeId::generate("127.0.0.1:0").as_str().len(), 16);
    }
}
