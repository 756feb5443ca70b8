//! Ripple: serverless LAN file sharing.
//!
//! Peers find each other by UDP broadcast (or DNS-SD), a sharer indexes a file
//! into fixed-size chunks, and a fetcher pulls the chunks concurrently over a
//! small line-oriented TCP protocol.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use core::{ChunkId, Config, FileId, Node, NodeId};
pub use network::{BroadcastDiscovery, Finder, ServiceRecordDiscovery, TcpTransport, Transport};
pub use storage::{ChunkInfo, FileInfo, IndexStore, MemoryStore, NodeChunkMap, StorageEngine};
pub use transfer::Downloader;
pub use utils::{
    error::{Result, RippleError},
    NodeUtils,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
