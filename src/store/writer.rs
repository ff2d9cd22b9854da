use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Buffered NDJSON writer.
///
/// Records are serialized into memory and written out once the buffer
/// reaches the flush threshold, or on [`RecordWriter::close`]. Nothing is
/// guaranteed on disk until `close` returns `Ok`.
pub struct RecordWriter {
    path: Option<PathBuf>,
    file: Option<File>,
    buf: BytesMut,
    threshold: usize,
    records: u64,
}

impl RecordWriter {
    /// Create (or truncate) `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).await?;
        let mut writer = Self::from_file(file);
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }

    pub fn from_file(file: File) -> Self {
        Self {
            path: None,
            file: Some(file),
            buf: BytesMut::new(),
            threshold: DEFAULT_FLUSH_THRESHOLD,
            records: 0,
        }
    }

    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.threshold = bytes.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records accepted so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub async fn write<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::pipeline("record writer is closed"));
        }

        let mark = self.buf.len();
        if let Err(err) = serde_json::to_writer((&mut self.buf).writer(), record) {
            self.buf.truncate(mark);
            return Err(err.into());
        }
        self.buf.put_u8(b'\n');
        self.records += 1;

        if self.buf.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::pipeline("record writer is closed"));
        };
        if !self.buf.is_empty() {
            file.write_all(&self.buf).await?;
            self.buf.clear();
        }
        file.flush().await?;
        Ok(())
    }

    /// Flush everything and release the file. Calling it twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.flush().await?;
        if let Some(mut file) = self.file.take() {
            file.shutdown().await?;
        }

        tracing::event!(
            tracing::Level::DEBUG,
            event = "transpipe.store.closed",
            path = ?self.path,
            records = self.records,
            "transpipe.store.closed"
        );
        Ok(())
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        if self.file.is_some() && !self.buf.is_empty() {
            tracing::event!(
                tracing::Level::WARN,
                event = "transpipe.store.dropped_unflushed",
                path = ?self.path,
                bytes = self.buf.len(),
                "transpipe.store.dropped_unflushed"
            );
        }
    }
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("path", &self.path)
            .field("buffered", &self.buf.len())
            .field("threshold", &self.threshold)
            .field("records", &self.records)
            .finish()
    }
}
