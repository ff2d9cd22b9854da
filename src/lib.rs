//! # transpipe
//!
//! **Concurrent translation of large NDJSON datasets.**
//!
//! `transpipe` reads a newline-delimited JSON dataset of chat-style records,
//! translates every message through a pool of rate-limited backends, and
//! writes finished records to one file and records that ran out of retries to
//! a sibling `.failed` file.
//!
//! It is built for long runs over big files:
//!
//! - memory-mapped input, bounded job queue
//! - documents of any length, split into token-bounded chunks
//! - two-tier retries (per chunk, per record)
//! - graceful shutdown, resumable by record index
//!
//! ---
//!
//! ## Core Model
//!
//! ```text
//! Reader → job queue → N × TranslationWorker → {success, failure} → RecordWriter × 2
//!                           │
//!                           └─ ChunkSplitter → BackendRouter → RetryPolicy
//! ```
//!
//! The generic part (one producer, N workers, one multiplexing writer) is
//! [`WorkPool`]. [`Orchestrator`] wires it to the record store and the
//! translator.
//!
//! ---
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use transpipe::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> transpipe::error::Result<()> {
//!     let config = Config::from_slice(br#"{"backends":[{"provider":"echo","rate_limit":8}]}"#)?;
//!     let router = Arc::new(BackendRouter::from_config(&config.backends)?);
//!
//!     let settings = Settings::new("English", "Korean")
//!         .workers(16)
//!         .apply_config(&config);
//!     let orchestrator = Orchestrator::new(settings, router, Arc::new(ApproxTokenCounter::default()));
//!
//!     let summary = orchestrator
//!         .run(
//!             Path::new("in.jsonl"),
//!             Path::new("out.jsonl"),
//!             CancelToken::new(),
//!             CancelToken::new(),
//!         )
//!         .await?;
//!     println!("{summary:?}");
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## Chunking
//!
//! [`ChunkSplitter::split`] never loses or duplicates a byte: the chunks of a
//! text concatenate back to it. Fenced code blocks stay in one chunk when they
//! fit in twice the budget; such chunks are flagged `oversize`.
//!
//! ```
//! use std::sync::Arc;
//! use transpipe::chunk::{CharTokenCounter, ChunkSplitter};
//!
//! let splitter = ChunkSplitter::new(Arc::new(CharTokenCounter));
//! let text = "First paragraph.\n\nSecond one.";
//! let chunks = splitter.split(text, 20).unwrap();
//! assert_eq!(chunks.iter().map(|c| c.text).collect::<String>(), text);
//! ```
//!
//! ---
//!
//! ## Cancellation
//!
//! A run takes two [`CancelToken`]s:
//!
//! - `stop`: no more records are read; everything already read is finished
//!   and written.
//! - `abort`: workers stop taking queued records, and rate-limit waits and
//!   backoff sleeps end early. Interrupted records go to the failure output.
//!
//! ---
//!
//! ## Observability
//!
//! Structured `tracing` events such as `transpipe.stage` (span),
//! `transpipe.retry.attempt_failed`, `transpipe.retry.capacity_wait`,
//! `transpipe.retry.exhausted`, `transpipe.record.succeeded`,
//! `transpipe.record.exhausted`, `transpipe.reader.skipped`, and
//! `transpipe.cancelled`.
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_target(false)
//!     .with_env_filter("transpipe=info")
//!     .init();
//! ```
//!
//! [`WorkPool`]: pipeline::pool::WorkPool
//! [`Orchestrator`]: orchestrator::Orchestrator
//! [`ChunkSplitter::split`]: chunk::ChunkSplitter::split
//! [`CancelToken`]: pipeline::cancel::CancelToken

pub mod backend;
pub mod chunk;
pub mod config;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod translate;

pub mod prelude {
    //! Convenient imports for most `transpipe` users.

    pub use crate::backend::router::{BackendHandle, BackendRouter};
    pub use crate::backend::{Backend, BackendError, EchoBackend, Request, Response};
    pub use crate::chunk::{ApproxTokenCounter, CharTokenCounter, ChunkSplitter, TokenCounter};
    pub use crate::config::Config;
    pub use crate::orchestrator::{Orchestrator, Settings, Summary};
    pub use crate::pipeline::cancel::CancelToken;
    pub use crate::pipeline::retry::{CreditPolicy, RetryPolicy};
}
