use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::record::Document;
use crate::store::Reader;

/// One record paired with its position in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub index: u64,
    pub document: Document,
}

/// Shared read-side counters, readable while the source runs on another task.
#[derive(Debug, Default)]
pub struct ReadProgress {
    /// Index of the next record to read; 0 until the first record is read.
    next_index: AtomicU64,
    malformed: AtomicU64,
}

impl ReadProgress {
    /// Index of the last record handed out, if any.
    pub fn last_index_read(&self) -> Option<u64> {
        self.next_index.load(Ordering::Acquire).checked_sub(1)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Turns a [`Reader`] into a stream of [`Job`]s.
///
/// Every non-blank line takes an index, malformed ones included, so indices
/// stay stable across runs. Lines before `start_index` are not parsed.
/// Malformed lines are logged and skipped.
#[derive(Debug)]
pub struct JobSource {
    reader: Reader,
    index: u64,
    start_index: u64,
    progress: Arc<ReadProgress>,
}

impl JobSource {
    pub fn new(reader: Reader, start_index: u64) -> Self {
        Self {
            reader,
            index: 0,
            start_index,
            progress: Arc::new(ReadProgress::default()),
        }
    }

    pub fn progress(&self) -> Arc<ReadProgress> {
        self.progress.clone()
    }
}

impl Iterator for JobSource {
    type Item = Result<Job>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = self.index;
            let parsed = match self.reader.scan() {
                Ok(None) => return None,
                Ok(Some(_)) if index < self.start_index => {
                    self.index += 1;
                    continue;
                }
                Ok(Some(line)) => line.to_document(),
                Err(err) => Err(err),
            };

            match parsed {
                Ok(document) => {
                    self.index += 1;
                    self.progress.next_index.store(index + 1, Ordering::Release);
                    tracing::event!(
                        tracing::Level::DEBUG,
                        event = "transpipe.reader.read",
                        index = index,
                        "transpipe.reader.read"
                    );
                    return Some(Ok(Job { index, document }));
                }
                Err(Error::MalformedRecord { offset, message }) => {
                    self.index += 1;
                    self.progress.malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::event!(
                        tracing::Level::WARN,
                        event = "transpipe.reader.skipped",
                        index = index,
                        offset = offset,
                        error = %message,
                        "transpipe.reader.skipped"
                    );
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
