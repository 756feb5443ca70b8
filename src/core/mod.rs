pub mod config;
pub mod ids;
pub mod node;
pub mod protocol;
pub mod workflow;

pub use config::Config;
pub use ids::{ChunkId, FileId, NodeId};
pub use node::{Node, NodeStatus};
pub use protocol::{ChunkRequest, ChunkResponse};
