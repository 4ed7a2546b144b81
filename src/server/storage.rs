//! Shared append-only log store

use crate::{LineLogError, Result};
use bytes::BytesMut;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default chunk size when streaming the log to a sink
pub const DEFAULT_STREAM_CHUNK: usize = 4096;

/// Append-only log file shared by all connection workers and the ticker.
///
/// Appends and full reads take the same exclusive guard, so a reader never
/// observes a partial append and two appends never interleave.
pub struct LogStore {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl LogStore {
    /// Create the log file fresh (truncating any previous content)
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // append(2) and O_TRUNC cannot be combined in one open
        File::create(&path).await.map_err(|e| {
            LineLogError::Setup(format!("Failed to create log {}: {}", path.display(), e))
        })?;
        let writer = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                LineLogError::Setup(format!("Failed to open log {}: {}", path.display(), e))
            })?;

        info!(path = %path.display(), "Log store created");
        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Path of the persisted log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` to the end of the log
    pub async fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LineLogError::StoreClosed)?;

        writer.write_all(bytes).await?;
        // tokio files write in the background; the bytes must land before the guard drops
        writer.flush().await?;
        Ok(())
    }

    /// Stream the full log content to `sink`, returning the number of bytes written
    pub async fn stream_all<W>(&self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.stream_all_chunked(sink, DEFAULT_STREAM_CHUNK).await
    }

    /// Like [`stream_all`](Self::stream_all) with an explicit chunk size
    pub async fn stream_all_chunked<W>(&self, sink: &mut W, chunk_size: usize) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.stream_all_bounded(sink, chunk_size, None).await
    }

    /// Stream the full log, bounding every single write to `sink` by
    /// `write_timeout`. A slow but steady reader is never cut off as long as
    /// each write makes progress within the limit.
    pub async fn stream_all_bounded<W>(
        &self,
        sink: &mut W,
        chunk_size: usize,
        write_timeout: Option<Duration>,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let guard = self.writer.lock().await;
        if guard.is_none() {
            return Err(LineLogError::StoreClosed);
        }

        let file = File::open(&self.path).await?;
        let size = file.metadata().await?.len();
        let mut reader = file.take(size);
        let mut chunk = BytesMut::with_capacity(chunk_size.max(1));
        let mut sent = 0u64;

        while sent < size {
            chunk.clear();
            let n = reader.read_buf(&mut chunk).await?;
            if n == 0 {
                break;
            }
            bounded_write(write_timeout, sink.write_all(&chunk)).await?;
            sent += n as u64;
        }
        bounded_write(write_timeout, sink.flush()).await?;
        drop(guard);

        Ok(sent)
    }

    /// Read the whole log into memory
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.stream_all(&mut content).await?;
        Ok(content)
    }

    /// Close the append handle. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            writer.flush().await?;
            debug!(path = %self.path.display(), "Log store closed");
        }
        Ok(())
    }

    /// Delete the persisted log. A missing file is not an error.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Log file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn bounded_write<F>(limit: Option<Duration>, write: F) -> Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, write).await.map_err(|_| {
            LineLogError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write to client exceeded {:?}", limit),
            ))
        })??,
        None => write.await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_truncates_existing_log() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("data");
        std::fs::write(&path, "stale content\n").unwrap();

        let store = LogStore::create(&path).await.unwrap();

        assert!(store.snapshot().await.unwrap().is_empty());
        assert_eq!(store.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_append_then_stream() {
        let temp_dir = tempdir().unwrap();
        let store = LogStore::create(temp_dir.path().join("data")).await.unwrap();

        store.append(b"hello\n").await.unwrap();
        store.append(b"world\n").await.unwrap();

        let mut sink = Vec::new();
        let sent = store.stream_all(&mut sink).await.unwrap();
        assert_eq!(sent, 12);
        assert_eq!(sink, b"hello\nworld\n");
    }

    #[tokio::test]
    async fn test_stream_in_small_chunks() {
        let temp_dir = tempdir().unwrap();
        let store = LogStore::create(temp_dir.path().join("data")).await.unwrap();
        let line = "x".repeat(999) + "\n";
        for _ in 0..10 {
            store.append(line.as_bytes()).await.unwrap();
        }

        let mut sink = Vec::new();
        let sent = store.stream_all_chunked(&mut sink, 7).await.unwrap();
        assert_eq!(sent, 10_000);
        assert_eq!(sink.len(), 10_000);
    }

    #[tokio::test]
    async fn test_stalled_sink_hits_write_timeout() {
        let temp_dir = tempdir().unwrap();
        let store = LogStore::create(temp_dir.path().join("data")).await.unwrap();
        store.append(&vec![b'q'; 64 * 1024]).await.unwrap();

        // Nobody reads the other half, so the second chunk can never be written
        let (mut sink, _peer) = tokio::io::duplex(4096);
        let result = store
            .stream_all_bounded(&mut sink, 4096, Some(std::time::Duration::from_millis(100)))
            .await;

        assert!(matches!(result, Err(LineLogError::Io(ref e)) if e.kind() == std::io::ErrorKind::TimedOut));
        // The guard was released: the store is still usable
        store.append(b"after\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_interleave() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(temp_dir.path().join("data")).await.unwrap());

        let mut handles = vec![];
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let line = format!("{}{}\n", i, "z".repeat(2000 + i));
                store.append(line.as_bytes()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = String::from_utf8(store.snapshot().await.unwrap()).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 20);
        lines.sort();
        for line in lines {
            let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
            let i: usize = digits.parse().unwrap();
            assert_eq!(line.len(), digits.len() + 2000 + i);
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_further_use() {
        let temp_dir = tempdir().unwrap();
        let store = LogStore::create(temp_dir.path().join("data")).await.unwrap();
        store.append(b"before\n").await.unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.append(b"after\n").await, Err(LineLogError::StoreClosed)));
        assert!(matches!(store.snapshot().await, Err(LineLogError::StoreClosed)));
        assert_eq!(std::fs::read(store.path()).unwrap(), b"before\n");
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_file() {
        let temp_dir = tempdir().unwrap();
        let store = LogStore::create(temp_dir.path().join("data")).await.unwrap();

        store.remove().await.unwrap();
        assert!(!store.path().exists());
        store.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_in_missing_directory_is_setup_error() {
        let temp_dir = tempdir().unwrap();
        let result = LogStore::create(temp_dir.path().join("missing").join("data")).await;

        assert!(matches!(result, Err(LineLogError::Setup(_))));
    }
}
