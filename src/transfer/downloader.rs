use log::{debug, info, warn};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs::{self as async_fs, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::config::DEFAULT_WORKERS;
use crate::core::{FileId, Node};
use crate::network::Transport;
use crate::storage::{ChunkInfo, FileInfo};
use crate::utils::{CryptoUtils, Result, RippleError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

/// Output file plus the progress counters, guarded together.
struct OutputFile {
    file: File,
    progress: DownloadProgress,
}

/// First failure wins; later ones are dropped.
#[derive(Clone, Default)]
struct FirstError(Arc<StdMutex<Option<RippleError>>>);

impl FirstError {
    fn record(&self, err: RippleError) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!("Dropping subsequent failure: {}", err);
        }
    }

    fn take(&self) -> Option<RippleError> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Pulls every chunk of a file from one node with at most `workers` fetches in flight.
pub struct Downloader {
    transport: Arc<dyn Transport>,
    workers: usize,
    progress: Arc<StdMutex<DownloadProgress>>,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, workers: usize) -> Self {
        Self {
            transport,
            workers: if workers == 0 { DEFAULT_WORKERS } else { workers },
            progress: Arc::new(StdMutex::new(DownloadProgress::default())),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Counters of the most recent run.
    pub fn progress(&self) -> DownloadProgress {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn part_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_os_string();
        name.push(".part");
        PathBuf::from(name)
    }

    /// Downloads `chunks` into `<output>.part`, then renames it to `output`.
    ///
    /// Every scheduled chunk runs to completion even after a failure. On failure the
    /// first error is returned and the `.part` file stays behind. Cancelling `ctx`
    /// stops scheduling new chunks; chunks already in flight finish.
    pub async fn download_file(
        &self,
        ctx: &CancellationToken,
        node: &Node,
        file: &FileInfo,
        chunks: &[ChunkInfo],
        output: &Path,
    ) -> Result<()> {
        let part = Self::part_path(output);
        let handle = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&part)
            .await
            .map_err(|e| RippleError::IoError(format!("open {}: {}", part.display(), e)))?;
        handle.set_len(file.size).await?;

        let progress = DownloadProgress {
            total_chunks: chunks.len(),
            total_bytes: file.size,
            ..Default::default()
        };
        *self.progress.lock().unwrap_or_else(|p| p.into_inner()) = progress.clone();

        info!(
            "Downloading {} ({} bytes, {} chunks) from {} with {} workers",
            file.name,
            file.size,
            chunks.len(),
            node.address,
            self.workers
        );

        let output_file = Arc::new(Mutex::new(OutputFile {
            file: handle,
            progress,
        }));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let first_error = FirstError::default();
        let mut tasks = JoinSet::new();

        for chunk in chunks.iter().cloned() {
            if ctx.is_cancelled() {
                first_error.record(RippleError::Cancelled(format!(
                    "stopped before chunk {}",
                    chunk.index
                )));
                break;
            }

            let permit = tokio::select! {
                _ = ctx.cancelled() => {
                    first_error.record(RippleError::Cancelled(format!(
                        "stopped before chunk {}",
                        chunk.index
                    )));
                    break;
                }
                permit = semaphore.clone().acquire_owned() => permit.map_err(|e| {
                    RippleError::IoError(format!("worker pool closed: {}", e))
                })?,
            };

            let transport = self.transport.clone();
            let ctx = ctx.clone();
            let node = node.clone();
            let file_id = file.id.clone();
            let output_file = output_file.clone();
            let first_error = first_error.clone();
            let progress = self.progress.clone();

            tasks.spawn(async move {
                let _permit = permit;
                if let Err(e) =
                    fetch_chunk(&*transport, &ctx, &node, &file_id, &chunk, &output_file, &progress)
                        .await
                {
                    warn!("Chunk {} failed: {}", chunk.index, e);
                    first_error.record(e);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                first_error.record(RippleError::IoError(format!("chunk worker panicked: {}", e)));
            }
        }

        if let Some(err) = first_error.take() {
            warn!(
                "Download of {} failed, partial data kept at {}",
                file.name,
                part.display()
            );
            return Err(err);
        }

        {
            let mut out = output_file.lock().await;
            out.file.flush().await?;
            out.file.sync_all().await?;
        }
        drop(output_file);

        async_fs::rename(&part, output).await.map_err(|e| {
            RippleError::IoError(format!(
                "rename {} -> {}: {}",
                part.display(),
                output.display(),
                e
            ))
        })?;
        info!("Download complete: {}", output.display());
        Ok(())
    }
}

async fn fetch_chunk(
    transport: &dyn Transport,
    ctx: &CancellationToken,
    node: &Node,
    file_id: &FileId,
    chunk: &ChunkInfo,
    output: &Mutex<OutputFile>,
    progress: &StdMutex<DownloadProgress>,
) -> Result<()> {
    let mut buffer: Vec<u8> = Vec::with_capacity(chunk.size as usize);
    transport
        .download(ctx, node, file_id, chunk, &mut buffer)
        .await?;

    if !chunk.hash.is_empty() && !CryptoUtils::verify_integrity(&buffer, &chunk.hash) {
        return Err(RippleError::ProtocolError(format!(
            "chunk {} content does not match its hash",
            chunk.index
        )));
    }

    let mut out = output.lock().await;
    out.file.seek(SeekFrom::Start(chunk.offset)).await?;
    out.file.write_all(&buffer).await?;
    out.progress.completed_chunks += 1;
    out.progress.bytes_downloaded += chunk.size;
    *progress.lock().unwrap_or_else(|p| p.into_inner()) = out.progress.clone();
    debug!(
        "Wrote chunk {} at offset {} ({}/{})",
        chunk.index, chunk.offset, out.progress.completed_chunks, out.progress.total_chunks
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::TcpTransport;
    use crate::storage::build_file_index;
    use async_trait::async_trait;
    use tokio::io::AsyncWrite;

    /// Serves chunks from memory and fails the listed indexes.
    struct FakeTransport {
        data: Vec<u8>,
        failing: Vec<usize>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn serve(&self, _ctx: CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn download(
            &self,
            _ctx: &CancellationToken,
            _node: &Node,
            _file_id: &FileId,
            chunk: &ChunkInfo,
            writer: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<()> {
            if self.failing.contains(&chunk.index) {
                return Err(RippleError::IoError(format!("chunk {} unreachable", chunk.index)));
            }
            let start = chunk.offset as usize;
            writer
                .write_all(&self.data[start..start + chunk.size as usize])
                .await?;
            Ok(())
        }
    }

    async fn indexed(dir: &Path, len: usize, chunk_size: u64) -> (Vec<u8>, FileInfo, Vec<ChunkInfo>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        let path = dir.join("source.bin");
        std::fs::write(&path, &data).unwrap();
        let (info, chunks) = build_file_index(&path, chunk_size).await.unwrap();
        (data, info, chunks)
    }

    #[tokio::test]
    async fn test_worker_counts_produce_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let (data, info, chunks) = indexed(dir.path(), 100_003, 4096).await;

        let server = Arc::new(TcpTransport::new("127.0.0.1:0", dir.path()));
        let listener = server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = CancellationToken::new();
        let serving = server.clone();
        let server_ctx = ctx.clone();
        tokio::spawn(async move { serving.serve_listener(listener, server_ctx).await });

        let node = Node::at_address(addr.to_string());
        let wire_id = FileId::new(info.path.clone());
        let mut wire_info = info.clone();
        wire_info.id = wire_id;

        for workers in [1, 8] {
            let out = dir.path().join(format!("out-{}.bin", workers));
            let downloader = Downloader::new(Arc::new(TcpTransport::client()), workers);
            downloader
                .download_file(&ctx, &node, &wire_info, &chunks, &out)
                .await
                .unwrap();

            assert_eq!(std::fs::read(&out).unwrap(), data);
            assert!(!Downloader::part_path(&out).exists());
            let progress = downloader.progress();
            assert_eq!(progress.completed_chunks, chunks.len());
            assert_eq!(progress.bytes_downloaded, data.len() as u64);
        }
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_single_failure_keeps_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let (data, info, chunks) = indexed(dir.path(), 40_000, 4096).await;
        let transport = Arc::new(FakeTransport {
            data: data.clone(),
            failing: vec![3],
        });

        let out = dir.path().join("fail.bin");
        let downloader = Downloader::new(transport, 4);
        let err = downloader
            .download_file(
                &CancellationToken::new(),
                &Node::at_address("10.255.255.1:9"),
                &info,
                &chunks,
                &out,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RippleError::IoError(_)));
        assert!(!out.exists());
        let part = Downloader::part_path(&out);
        assert!(part.exists());
        assert_eq!(std::fs::metadata(&part).unwrap().len(), data.len() as u64);
        // Siblings still ran to completion.
        assert_eq!(downloader.progress().completed_chunks, chunks.len() - 1);
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let slot = FirstError::default();
        slot.record(RippleError::IoError("first".to_string()));
        slot.record(RippleError::ProtocolError("second".to_string()));
        match slot.take() {
            Some(RippleError::IoError(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_chunk_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut data, info, chunks) = indexed(dir.path(), 10_000, 4096).await;
        data[5000] ^= 0xFF;
        let transport = Arc::new(FakeTransport { data, failing: vec![] });

        let out = dir.path().join("corrupt.bin");
        let err = Downloader::new(transport, 2)
            .download_file(
                &CancellationToken::new(),
                &Node::at_address("127.0.0.1:1"),
                &info,
                &chunks,
                &out,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RippleError::ProtocolError(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_cancelled_context_schedules_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (data, info, chunks) = indexed(dir.path(), 9_000, 4096).await;
        let ctx = CancellationToken::new();
        ctx.cancel();

        let out = dir.path().join("cancelled.bin");
        let downloader = Downloader::new(Arc::new(FakeTransport { data, failing: vec![] }), 2);
        let err = downloader
            .download_file(&ctx, &Node::at_address("127.0.0.1:1"), &info, &chunks, &out)
            .await
            .unwrap_err();
        assert!(matches!(err, RippleError::Cancelled(_)));
        assert_eq!(downloader.progress().completed_chunks, 0);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_stale_part_file_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let (data, info, chunks) = indexed(dir.path(), 50_000, 4096).await;

        let out = dir.path().join("resumed.bin");
        let part = Downloader::part_path(&out);
        std::fs::write(&part, vec![0xAA; 90_000]).unwrap();

        let transport = Arc::new(FakeTransport {
            data: data.clone(),
            failing: vec![],
        });
        Downloader::new(transport, 3)
            .download_file(
                &CancellationToken::new(),
                &Node::at_address("127.0.0.1:1"),
                &info,
                &chunks,
                &out,
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), data);
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_retry_reuses_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let (data, info, chunks) = indexed(dir.path(), 30_000, 4096).await;
        let out = dir.path().join("retry.bin");

        let flaky = Arc::new(FakeTransport {
            data: data.clone(),
            failing: vec![0, 5],
        });
        let node = Node::at_address("127.0.0.1:1");
        let ctx = CancellationToken::new();
        assert!(Downloader::new(flaky, 2)
            .download_file(&ctx, &node, &info, &chunks, &out)
            .await
            .is_err());
        // Chunks that did arrive are already in place.
        let partial = std::fs::read(Downloader::part_path(&out)).unwrap();
        assert_eq!(&partial[4096..8192], &data[4096..8192]);

        let healthy = Arc::new(FakeTransport {
            data: data.clone(),
            failing: vec![],
        });
        Downloader::new(healthy, 2)
            .download_file(&ctx, &node, &info, &chunks, &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), data);
    }

    #[test]
    fn test_zero_workers_uses_default() {
        let transport = Arc::new(FakeTransport {
            data: Vec::new(),
            failing: vec![],
        });
        assert_eq!(Downloader::new(transport.clone(), 0).workers(), DEFAULT_WORKERS);
        assert_eq!(Downloader::new(transport, 6).workers(), 6);
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            Downloader::part_path(Path::new("/tmp/movie.mkv")),
            PathBuf::from("/tmp/movie.mkv.part")
        );
    }
}
