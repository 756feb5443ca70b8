use async_trait::async_trait;
use log::{debug, error, info};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::core::protocol::{ChunkRequest, ChunkResponse};
use crate::core::{FileId, Node};
use crate::storage::{ChunkInfo, IndexStore};
use crate::transfer::Uploader;
use crate::utils::{Result, RippleError};

/// Moves chunk bytes between nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serve local chunks until `ctx` is cancelled.
    async fn serve(&self, ctx: CancellationToken) -> Result<()>;

    /// Fetch exactly `chunk.size` bytes of `file_id` at `chunk.offset` from `node` into `writer`.
    /// No retries.
    async fn download(
        &self,
        ctx: &CancellationToken,
        node: &Node,
        file_id: &FileId,
        chunk: &ChunkInfo,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;
}

/// TCP implementation of the `GET`/`OK`/`ERR` line protocol.
pub struct TcpTransport {
    listen_addr: String,
    uploader: Uploader,
    bound: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    pub fn new(listen_addr: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            uploader: Uploader::new(root_dir),
            bound: Mutex::new(None),
        }
    }

    /// A transport that only downloads.
    pub fn client() -> Self {
        Self::new("", ".")
    }

    pub fn with_index(mut self, index: Arc<dyn IndexStore>) -> Self {
        self.uploader = self.uploader.with_index(index);
        self
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            RippleError::NetworkError(format!("Failed to bind to {}: {}", self.listen_addr, e))
        })?;
        let addr = listener.local_addr()?;
        *self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(addr);
        info!("Transfer server listening on {}", addr);
        Ok(listener)
    }

    /// Accept loop over an already bound listener. Each connection gets its own task.
    pub async fn serve_listener(&self, listener: TcpListener, ctx: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Transfer server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted transfer connection from {}", peer);
                    let uploader = self.uploader.clone();
                    tokio::spawn(async move {
                        if let Err(e) = uploader.handle_connection(stream).await {
                            debug!("Transfer to {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    if ctx.is_cancelled() {
                        return Ok(());
                    }
                    error!("Accept failed: {}", e);
                    return Err(RippleError::NetworkError(format!("accept: {}", e)));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn serve(&self, ctx: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve_listener(listener, ctx).await
    }

    async fn download(
        &self,
        ctx: &CancellationToken,
        node: &Node,
        file_id: &FileId,
        chunk: &ChunkInfo,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        if node.address.is_empty() {
            return Err(RippleError::ConfigError("empty node address".to_string()));
        }
        // Checked before dialing only; an open request runs to completion.
        if ctx.is_cancelled() {
            return Err(RippleError::Cancelled(format!("chunk {}", chunk.index)));
        }

        let stream = TcpStream::connect(&node.address).await.map_err(|e| {
            RippleError::IoError(format!("Failed to connect to {}: {}", node.address, e))
        })?;
        let (reader, mut sender) = stream.into_split();

        let request = ChunkRequest::new(file_id.as_str(), chunk.offset, chunk.size);
        sender.write_all(request.encode().as_bytes()).await?;
        sender.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut status = String::new();
        let read = reader.read_line(&mut status).await.map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                RippleError::ProtocolError(format!("bad response: {}", e))
            } else {
                RippleError::IoError(format!("reading response from {}: {}", node.address, e))
            }
        })?;
        if read == 0 {
            return Err(RippleError::ProtocolError(
                "connection closed before response".to_string(),
            ));
        }
        match ChunkResponse::parse(&status)? {
            ChunkResponse::Ok(_) => {}
            ChunkResponse::Err(msg) => {
                return Err(RippleError::ProtocolError(format!("bad response: ERR {}", msg)));
            }
        }

        let copied = tokio::io::copy(&mut (&mut reader).take(chunk.size), &mut *writer).await?;
        if copied != chunk.size {
            return Err(RippleError::IoError(format!(
                "short read for chunk {}: {} of {} bytes",
                chunk.index, copied, chunk.size
            )));
        }
        writer.flush().await?;

        debug!(
            "Fetched chunk {} ({} bytes) from {}",
            chunk.index, copied, node.address
        );
        Ok(())
    }
}
