use log::{debug, warn};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::core::protocol::{ChunkRequest, ChunkResponse, INVALID_REQUEST};
use crate::core::FileId;
use crate::storage::IndexStore;
use crate::utils::{Result, RippleError};

/// Longest request line accepted before the request is treated as malformed.
const MAX_REQUEST_LINE: u64 = 4096;

/// Serves byte ranges of local files, one request per connection.
#[derive(Clone)]
pub struct Uploader {
    root_dir: PathBuf,
    index: Option<Arc<dyn IndexStore>>,
}

impl Uploader {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            index: None,
        }
    }

    /// Known FileIDs are served from the path recorded in `index`.
    pub fn with_index(mut self, index: Arc<dyn IndexStore>) -> Self {
        self.index = Some(index);
        self
    }

    /// Maps the identifier from a request onto a local path.
    ///
    /// An indexed FileID wins; otherwise the identifier is itself a path, taken
    /// as-is when absolute and joined under the root otherwise.
    pub fn resolve_path(&self, file_id: &str) -> PathBuf {
        if let Some(index) = &self.index {
            if let Ok(info) = index.get_file(&FileId::from(file_id)) {
                return PathBuf::from(info.path);
            }
        }

        let path = Path::new(file_id);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// [`Uploader::resolve_path`] off the async worker when an index lookup is involved.
    async fn locate(&self, file_id: &str) -> Result<PathBuf> {
        if self.index.is_none() {
            return Ok(self.resolve_path(file_id));
        }
        let uploader = self.clone();
        let id = file_id.to_string();
        tokio::task::spawn_blocking(move || uploader.resolve_path(&id))
            .await
            .map_err(|e| RippleError::StorageError(format!("index lookup for {}: {}", file_id, e)))
    }

    async fn open_region(&self, request: &ChunkRequest) -> Result<File> {
        let path = self.locate(&request.file_id).await?;
        let mut file = File::open(&path).await.map_err(|e| {
            RippleError::IoError(format!("open {}: {}", path.display(), e))
        })?;

        let len = file.metadata().await?.len();
        let end = request.offset.checked_add(request.size);
        if end.map_or(true, |end| end > len) {
            return Err(RippleError::IoError(format!(
                "range {}+{} exceeds file length {}",
                request.offset, request.size, len
            )));
        }

        file.seek(SeekFrom::Start(request.offset)).await?;
        Ok(file)
    }

    /// Handles one connection: request line in, `OK` + bytes or `ERR` out.
    /// Returns the number of payload bytes sent.
    pub async fn handle_connection(&self, stream: TcpStream) -> Result<u64> {
        let peer = stream.peer_addr().ok();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        let read = (&mut reader)
            .take(MAX_REQUEST_LINE)
            .read_line(&mut line)
            .await;
        match read {
            Ok(0) => return Ok(0),
            Ok(_) => {}
            Err(e) => {
                // Non-UTF-8 input surfaces here.
                debug!("Unreadable request from {:?}: {}", peer, e);
                Self::reply_err(&mut writer, INVALID_REQUEST).await;
                return Err(RippleError::ProtocolError(INVALID_REQUEST.to_string()));
            }
        }

        let request = match ChunkRequest::parse(&line) {
            Ok(request) => request,
            Err(e) => {
                Self::reply_err(&mut writer, INVALID_REQUEST).await;
                return Err(e);
            }
        };

        let file = match self.open_region(&request).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Rejecting {:?} from {:?}: {}", request, peer, e);
                Self::reply_err(&mut writer, &e.to_string()).await;
                return Err(e);
            }
        };

        writer
            .write_all(ChunkResponse::Ok(request.size).encode().as_bytes())
            .await?;
        let sent = tokio::io::copy(&mut file.take(request.size), &mut writer).await?;
        writer.flush().await?;
        if sent != request.size {
            return Err(RippleError::IoError(format!(
                "sent {} of {} bytes of {}",
                sent, request.size, request.file_id
            )));
        }

        debug!(
            "Served {} bytes of {} at offset {} to {:?}",
            sent, request.file_id, request.offset, peer
        );
        Ok(sent)
    }

    async fn reply_err<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) {
        let reply = ChunkResponse::Err(message.to_string()).encode();
        if let Err(e) = writer.write_all(reply.as_bytes()).await {
            debug!("Failed to send error reply: {}", e);
        }
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{build_file_index, MemoryStore, StorageEngine};

    #[test]
    fn test_resolve_path_policy() {
        let uploader = Uploader::new("/srv/share");
        assert_eq!(uploader.resolve_path("/abs/file.bin"), PathBuf::from("/abs/file.bin"));
        assert_eq!(
            uploader.resolve_path("sub/file.bin"),
            PathBuf::from("/srv/share/sub/file.bin")
        );
    }

    #[tokio::test]
    async fn test_resolve_indexed_file_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexed.bin");
        std::fs::write(&path, b"abcdef").unwrap();
        let (info, _) = build_file_index(&path, 2).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        store.save_file(&info).unwrap();
        let uploader = Uploader::new("/elsewhere").with_index(store);

        assert_eq!(uploader.resolve_path(info.id.as_str()), path);
        assert_eq!(uploader.resolve_path("plain"), PathBuf::from("/elsewhere/plain"));
        assert_eq!(uploader.locate(info.id.as_str()).await.unwrap(), path);
    }

    #[tokio::test]
    async fn test_indexed_file_id_is_served_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("served.bin");
        std::fs::write(&path, b"0123456789abcdef").unwrap();
        let (info, _) = build_file_index(&path, 4).await.unwrap();

        let store = Arc::new(StorageEngine::open(dir.path().join("index")).unwrap());
        store.save_file(&info).unwrap();
        let uploader = Uploader::new("/nowhere").with_index(store);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            uploader.handle_connection(stream).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(format!("GET {} 4 8\n", info.id).as_bytes())
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();

        assert_eq!(reply, b"OK 8\n456789ab".to_vec());
        assert_eq!(server.await.unwrap().unwrap(), 8);
    }
}
