use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_DISCOVERY_PORT: u16 = 7788;
pub const DEFAULT_WORKERS: usize = 4;
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(30);
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub discovery_port: u16,
    pub node_name: String,
    pub store_dir: PathBuf,
    pub chunk_size: u64,
    pub workers: usize,
    pub transfer_addr: String,
    /// Base directory for relative identifiers received by the transfer server.
    pub root_dir: PathBuf,
    pub announce_interval: Duration,
    pub liveness_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            node_name: "ripple".to_string(),
            store_dir: PathBuf::from(".ripple/index"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            transfer_addr: "0.0.0.0:9001".to_string(),
            root_dir: PathBuf::from("."),
            announce_interval: ANNOUNCE_INTERVAL,
            liveness_window: LIVENESS_WINDOW,
        }
    }
}
