use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::{Error, Result};
use crate::record::Document;

/// Trailing garbage shorter than this is treated as end of stream.
const PARTIAL_TAIL_TOLERANCE: usize = 2;

/// Sequential NDJSON reader over a read-only memory map.
///
/// Lines returned by [`Reader::scan`] borrow from the mapping and stay valid
/// while the reader is alive. A single consumer is assumed.
pub struct Reader {
    path: PathBuf,
    map: Option<Mmap>,
    offset: usize,
    allow_empty_lines: bool,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        // Zero-length files cannot be mapped on every platform.
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and the input dataset is not
            // modified for the duration of a run.
            Some(unsafe { Mmap::map(&file)? })
        };

        tracing::event!(
            tracing::Level::DEBUG,
            event = "transpipe.store.open",
            path = %path.display(),
            bytes = len,
            "transpipe.store.open"
        );

        Ok(Self {
            path: path.to_path_buf(),
            map,
            offset: 0,
            allow_empty_lines: true,
        })
    }

    /// Whether blank lines are skipped (default) or reported as malformed.
    pub fn allow_empty_lines(mut self, yes: bool) -> Self {
        self.allow_empty_lines = yes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread line.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the next record, or `None` at end of stream.
    ///
    /// The offset moves past a line before it is parsed, so a caller may log
    /// a `MalformedRecord` error and keep scanning.
    pub fn scan(&mut self) -> Result<Option<Line<'_>>> {
        let Some(map) = self.map.as_ref() else {
            return Ok(None);
        };
        let data: &[u8] = map;

        loop {
            if self.offset >= data.len() {
                return Ok(None);
            }

            let start = self.offset;
            let rest = &data[start..];
            let (line, next) = match rest.iter().position(|&b| b == b'\n') {
                Some(idx) => (&rest[..idx], start + idx + 1),
                None => (rest, data.len()),
            };
            self.offset = next;

            let line = strip_cr(line);
            if self.allow_empty_lines && line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<&RawValue>(line) {
                Ok(raw) => return Ok(Some(Line { raw, offset: start })),
                Err(_) if next == data.len() && line.len() < PARTIAL_TAIL_TOLERANCE => {
                    return Ok(None);
                }
                Err(err) => {
                    return Err(Error::MalformedRecord {
                        offset: start,
                        message: format!("{err} (preview: {:?})", preview(line)),
                    });
                }
            }
        }
    }

    /// Release the mapping. Dropping the reader does the same.
    pub fn close(self) {}
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("offset", &self.offset)
            .finish()
    }
}

/// One JSON document, borrowed from the mapped file.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    raw: &'a RawValue,
    offset: usize,
}

impl<'a> Line<'a> {
    pub fn raw(&self) -> &'a RawValue {
        self.raw
    }

    pub fn as_str(&self) -> &'a str {
        self.raw.get()
    }

    /// Byte offset of the line within the file.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn parse<T: Deserialize<'a>>(&self) -> Result<T> {
        serde_json::from_str(self.raw.get()).map_err(|err| Error::MalformedRecord {
            offset: self.offset,
            message: err.to_string(),
        })
    }

    /// Copy the line out of the mapping as a mutable JSON object.
    pub fn to_document(&self) -> Result<Document> {
        self.parse()
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn preview(line: &[u8]) -> String {
    const PREVIEW_LEN: usize = 80;
    let text = String::from_utf8_lossy(line);
    let mut short = text.chars().take(PREVIEW_LEN).collect::<String>();
    if text.chars().count() > PREVIEW_LEN {
        short.push_str("...");
    }
    short
}
