//! Dataset translation run: one reader, N translation workers, one writer.

pub mod sink;
pub mod source;
pub mod worker;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::router::BackendRouter;
use crate::chunk::{ChunkSplitter, TokenCounter, DEFAULT_BUDGET};
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::pool::WorkPool;
use crate::store::{Reader, RecordWriter, DEFAULT_FLUSH_THRESHOLD};
use crate::translate::Translator;

pub use sink::DatasetSink;
pub use source::{Job, JobSource, ReadProgress};
pub use worker::TranslationWorker;

pub const DEFAULT_WORKERS: usize = 64;
pub const FAILED_SUFFIX: &str = ".failed";

/// Everything a run needs besides the backends. Built once, never mutated
/// by the run.
#[derive(Debug, Clone)]
pub struct Settings {
    source_lang: String,
    target_lang: String,
    workers: usize,
    queue_capacity: Option<usize>,
    start_index: u64,
    budget: usize,
    custom_prompt: Option<String>,
    retry: RetryConfig,
    flush_threshold: usize,
}

impl Settings {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            start_index: 0,
            budget: DEFAULT_BUDGET,
            custom_prompt: None,
            retry: RetryConfig::default(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Job queue capacity. Defaults to twice the worker count.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    pub fn start_index(mut self, index: u64) -> Self {
        self.start_index = index;
        self
    }

    pub fn budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn custom_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    /// Take start index, prompt, budget, and retry settings from a config file.
    pub fn apply_config(mut self, config: &Config) -> Self {
        self.start_index = config.start_index;
        self.custom_prompt = config.custom_prompt.clone();
        if let Some(budget) = config.chunk_budget {
            self.budget = budget;
        }
        self.retry = config.retry.clone();
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers * 2)
    }
}

/// Final counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: u64,
    pub failed: u64,
    /// Malformed input lines.
    pub skipped: u64,
    pub last_index_read: Option<u64>,
}

/// Sibling failure output: `<output>.failed`.
pub fn failure_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(FAILED_SUFFIX);
    PathBuf::from(name)
}

pub struct Orchestrator {
    settings: Settings,
    router: Arc<BackendRouter>,
    counter: Arc<dyn TokenCounter>,
}

impl Orchestrator {
    pub fn new(settings: Settings, router: Arc<BackendRouter>, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            settings,
            router,
            counter,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Translate `input` into `output` (and `<output>.failed`).
    ///
    /// `stop` ends reading; everything already read is still written. `abort`
    /// also interrupts waits inside in-flight records, which then land in
    /// the failure output. A writer error aborts the run and is returned.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        stop: CancelToken,
        abort: CancelToken,
    ) -> Result<Summary> {
        let settings = &self.settings;
        if settings.budget == 0 {
            return Err(Error::InvalidBudget(0));
        }

        let reader = Reader::open(input)?;
        let success = RecordWriter::create(output)
            .await?
            .flush_threshold(settings.flush_threshold);
        let failure = RecordWriter::create(failure_path(output))
            .await?
            .flush_threshold(settings.flush_threshold);

        let translator = Translator::new(
            self.router.clone(),
            ChunkSplitter::new(self.counter.clone()),
            settings.source_lang.clone(),
            settings.target_lang.clone(),
        )
        .budget(settings.budget)
        .retry(settings.retry.chunk_policy())
        .custom_prompt(settings.custom_prompt.clone());
        let worker = Arc::new(TranslationWorker::new(translator, settings.retry.credit_policy()));

        let source = JobSource::new(reader, settings.start_index);
        let progress = source.progress();
        let pool = WorkPool::new(settings.workers).queue_capacity(settings.effective_queue_capacity());

        tracing::event!(
            tracing::Level::INFO,
            event = "transpipe.run.started",
            input = %input.display(),
            output = %output.display(),
            src = %settings.source_lang,
            dst = %settings.target_lang,
            workers = settings.workers,
            backends = self.router.len(),
            start_index = settings.start_index,
            "transpipe.run.started"
        );

        let report = pool
            .run(source, worker, DatasetSink::new(success, failure), stop, abort)
            .await?;

        let summary = Summary {
            succeeded: report.succeeded,
            failed: report.exhausted,
            skipped: report.skipped + progress.malformed(),
            last_index_read: progress.last_index_read(),
        };

        tracing::event!(
            tracing::Level::INFO,
            event = "transpipe.run.finished",
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            last_index_read = ?summary.last_index_read,
            "transpipe.run.finished"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
