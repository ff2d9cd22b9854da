//! Token-bounded, lossless document splitting.

pub mod splitter;
pub mod tokens;

pub use splitter::{Chunk, ChunkSplitter};
pub use tokens::{ApproxTokenCounter, CharTokenCounter, TokenCounter};

/// Default per-chunk token budget.
pub const DEFAULT_BUDGET: usize = 4096;
