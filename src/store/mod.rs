//! NDJSON record storage: a memory-mapped reader and a buffered writer.

pub mod reader;
pub mod writer;

pub use reader::{Line, Reader};
pub use writer::{RecordWriter, DEFAULT_FLUSH_THRESHOLD};
