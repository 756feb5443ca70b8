//! Share, get and scan: the operations behind the command line.

use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::{FileId, Node, NodeId};
use crate::network::{Finder, Transport};
use crate::storage::{build_file_index, ChunkInfo, FileInfo, IndexStore, NodeChunkMap};
use crate::transfer::Downloader;
use crate::utils::{Result, RippleError};

/// Indexes `path` and persists the file record, its chunk list and this node's chunk map.
///
/// The three writes are independent; a failure midway leaves the earlier ones in place.
pub async fn share_file(
    store: &dyn IndexStore,
    path: &Path,
    chunk_size: u64,
) -> Result<(FileInfo, Vec<ChunkInfo>, NodeChunkMap)> {
    if path.as_os_str().is_empty() {
        return Err(RippleError::ConfigError("no file to share".to_string()));
    }

    let (info, chunks) = build_file_index(path, chunk_size).await?;
    let owner = NodeChunkMap::from_chunks(NodeId::generate("127.0.0.1:0"), &chunks);

    store.save_file(&info)?;
    store.save_chunks(&info.id, &chunks)?;
    store.save_node_chunks(&owner)?;

    info!(
        "Shared {} as {} ({} chunks, owner {})",
        info.path, info.id, info.chunk_count, owner.node_id
    );
    Ok((info, chunks, owner))
}

/// Downloads an indexed file from the node at `addr`.
///
/// Without `out` the file lands in the working directory under its original name.
/// Returns the path written.
pub async fn fetch_file(
    ctx: &CancellationToken,
    store: &dyn IndexStore,
    transport: Arc<dyn Transport>,
    addr: &str,
    file_id: &FileId,
    out: Option<&Path>,
    workers: usize,
) -> Result<PathBuf> {
    if file_id.as_str().is_empty() {
        return Err(RippleError::ConfigError("no file id given".to_string()));
    }
    if addr.is_empty() {
        return Err(RippleError::ConfigError("no node address given".to_string()));
    }

    let info = store.get_file(file_id)?;
    let chunks = store.get_chunks(file_id)?;
    let output = match out {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(&info.name),
    };

    let downloader = Downloader::new(transport, workers);
    downloader
        .download_file(ctx, &Node::at_address(addr), &info, &chunks, &output)
        .await?;
    Ok(output)
}

/// Runs `finder` for `wait` and returns whatever it saw.
pub async fn scan_nodes(finder: &mut dyn Finder, wait: Duration) -> Result<Vec<Node>> {
    let ctx = CancellationToken::new();
    finder.start(ctx.clone()).await?;
    tokio::time::sleep(wait).await;
    let nodes = finder.nodes();
    ctx.cancel();
    finder.stop().await?;
    Ok(nodes)
}
