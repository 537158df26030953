//! Chunked sender for file and console exports.
//!
//! A [`TransferJob`] writes an optional header and then its body in bounded
//! chunks. Each chunk is read from the source only after the previous one was
//! fully accepted by the writer, so a slow peer throttles the read side.

use crate::error::{RemoteError, Result};
use log::debug;
use shared::TransferHeader;
use std::fmt;
use std::io::{self, Cursor};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound of a single body write.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

pub struct TransferJob {
    source_name: String,
    header: Option<Vec<u8>>,
    total_bytes: u64,
    bytes_written: u64,
    bytes_remaining: u64,
    chunk_size: usize,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl TransferJob {
    /// A body preceded by the binary transfer header naming it.
    pub fn with_header<R>(
        source_name: impl Into<String>,
        body_len: u64,
        reader: R,
        chunk_size: usize,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let source_name = source_name.into();
        let header = TransferHeader::for_body(source_name.clone(), body_len);
        let encoded = header.encode()?;

        Ok(Self {
            source_name,
            header: Some(encoded),
            total_bytes: header.total_bytes,
            bytes_written: 0,
            bytes_remaining: header.total_bytes,
            chunk_size: chunk_size.max(1),
            reader: Box::new(reader),
        })
    }

    /// A bare body whose size the peer already knows.
    pub fn without_header<R>(
        source_name: impl Into<String>,
        body_len: u64,
        reader: R,
        chunk_size: usize,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            source_name: source_name.into(),
            header: None,
            total_bytes: body_len,
            bytes_written: 0,
            bytes_remaining: body_len,
            chunk_size: chunk_size.max(1),
            reader: Box::new(reader),
        }
    }

    pub fn raw(source_name: impl Into<String>, body: Vec<u8>, chunk_size: usize) -> Self {
        let len = body.len() as u64;
        Self::without_header(source_name, len, Cursor::new(body), chunk_size)
    }

    /// Opens a file on disk and prepares a headed transfer of its content.
    pub async fn open_file(path: &Path, chunk_size: usize) -> Result<Self> {
        let source_error = |source: io::Error| RemoteError::TransferSource {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).await.map_err(source_error)?;
        let body_len = file.metadata().await.map_err(source_error)?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self::with_header(name, body_len, file, chunk_size)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.bytes_remaining
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_remaining == 0
    }

    pub async fn send<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.send_with_progress(writer, |_| {}).await
    }

    /// Runs the transfer to completion, calling `on_chunk` after every write.
    ///
    /// The source is dropped (closing any file handle) once the last byte
    /// has been written.
    pub async fn send_with_progress<W, F>(&mut self, writer: &mut W, mut on_chunk: F) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(&TransferJob),
    {
        if let Some(header) = self.header.take() {
            writer.write_all(&header).await?;
            self.record(header.len());
            on_chunk(self);
        }

        let mut buffer = vec![0u8; self.chunk_size];
        while self.bytes_remaining > 0 {
            let want = (self.chunk_size as u64).min(self.bytes_remaining) as usize;
            let read = self.reader.read(&mut buffer[..want]).await?;
            if read == 0 {
                return Err(RemoteError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended with {} of {} bytes still unsent",
                        self.source_name, self.bytes_remaining, self.total_bytes
                    ),
                )));
            }

            writer.write_all(&buffer[..read]).await?;
            self.record(read);
            on_chunk(self);
        }

        writer.flush().await?;
        self.reader = Box::new(tokio::io::empty());
        debug!(
            "Transfer of {} complete ({} bytes)",
            self.source_name, self.bytes_written
        );

        Ok(self.bytes_written)
    }

    fn record(&mut self, written: usize) {
        let written = written as u64;
        self.bytes_written += written;
        self.bytes_remaining = self.bytes_remaining.saturating_sub(written);
    }
}

impl fmt::Debug for TransferJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferJob")
            .field("source_name", &self.source_name)
            .field("total_bytes", &self.total_bytes)
            .field("bytes_written", &self.bytes_written)
            .field("bytes_remaining", &self.bytes_remaining)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_headed_transfer_layout() {
        let body = b"line one\nline two\n".to_vec();
        let mut job =
            TransferJob::with_header("latest.log", body.len() as u64, Cursor::new(body.clone()), 4)
                .unwrap();
        let expected_header = TransferHeader::for_body("latest.log", body.len() as u64);
        assert_eq!(job.total_bytes(), expected_header.total_bytes);

        let mut out = Vec::new();
        let written = job.send(&mut out).await.unwrap();

        assert_eq!(written, expected_header.total_bytes);
        assert!(job.is_complete());

        let (header, used) = TransferHeader::decode(&out).unwrap();
        assert_eq!(header, expected_header);
        assert_eq!(&out[used..], &body[..]);
    }

    #[tokio::test]
    async fn test_progress_invariant_holds_after_every_chunk() {
        let body = vec![7u8; 10_000];
        let mut job = TransferJob::with_header("blob", body.len() as u64, Cursor::new(body), 1024)
            .unwrap();
        let total = job.total_bytes();

        let mut steps = Vec::new();
        let mut out = Vec::new();
        job.send_with_progress(&mut out, |job| {
            assert_eq!(job.bytes_written() + job.bytes_remaining(), job.total_bytes());
            steps.push(job.bytes_written());
        })
        .await
        .unwrap();

        // header, nine full chunks, one partial
        assert_eq!(steps.len(), 11);
        assert_eq!(*steps.last().unwrap(), total);
        assert_eq!(job.bytes_remaining(), 0);
        assert_eq!(out.len() as u64, total);
    }

    #[tokio::test]
    async fn test_raw_transfer_respects_chunk_size() {
        let writer_mock = tokio_test::io::Builder::new()
            .write(b"abcd")
            .write(b"ef")
            .build();
        let mut writer = writer_mock;

        let mut job = TransferJob::raw("console", b"abcdef".to_vec(), 4);
        assert_eq!(job.send(&mut writer).await.unwrap(), 6);
        assert!(job.is_complete());
    }

    #[tokio::test]
    async fn test_empty_raw_transfer_completes_immediately() {
        let mut job = TransferJob::raw("console", Vec::new(), 4);
        let mut out = Vec::new();
        assert_eq!(job.send(&mut out).await.unwrap(), 0);
        assert!(out.is_empty());
        assert!(job.is_complete());
    }

    #[tokio::test]
    async fn test_read_error_aborts_transfer() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::Other, "disk gone"))
            .build();

        let mut job = TransferJob::without_header("latest.log", 10, reader, 4);
        let mut out = Vec::new();
        let err = job.send(&mut out).await.unwrap_err();

        assert!(matches!(err, RemoteError::Io(_)));
        assert_eq!(out, b"abc");
        assert_eq!(job.bytes_written(), 3);
        assert_eq!(job.bytes_remaining(), 7);
    }

    #[tokio::test]
    async fn test_short_source_is_an_error() {
        let mut job = TransferJob::without_header("latest.log", 10, Cursor::new(b"abc".to_vec()), 4);
        let mut out = Vec::new();
        match job.send(&mut out).await {
            Err(RemoteError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Unexpected transfer result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let path = PathBuf::from("/nonexistent/logs/latest.log");
        match TransferJob::open_file(&path, DEFAULT_CHUNK_SIZE).await {
            Err(RemoteError::TransferSource { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("Unexpected open result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_file_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        tokio::fs::write(&path, b"[12:00:00] [Server thread/INFO]: Done\n")
            .await
            .unwrap();

        let mut job = TransferJob::open_file(&path, DEFAULT_CHUNK_SIZE).await.unwrap();
        assert_eq!(job.source_name(), "latest.log");

        let mut out = Vec::new();
        job.send(&mut out).await.unwrap();
        let (header, used) = TransferHeader::decode(&out).unwrap();
        assert_eq!(header.name, "latest.log");
        assert_eq!(&out[used..], b"[12:00:00] [Server thread/INFO]: Done\n");
    }
}
