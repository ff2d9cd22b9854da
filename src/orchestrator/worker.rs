use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::normalize::{normalize_document, normalize_text};
use crate::orchestrator::source::Job;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::pool::{Outcome, Worker};
use crate::pipeline::retry::CreditPolicy;
use crate::record::{ensure_custom_id, Document, Record};
use crate::translate::Translator;

/// Normalizes a record and translates every message that still lacks a
/// `transformed_content`, under the per-record credit budget.
#[derive(Debug, Clone)]
pub struct TranslationWorker {
    translator: Translator,
    credits: CreditPolicy,
}

impl TranslationWorker {
    pub fn new(translator: Translator, credits: CreditPolicy) -> Self {
        Self { translator, credits }
    }

    /// One credit: walk pending messages in order, stopping at the first error.
    /// Messages finished before the error keep their translation.
    async fn translate_pending(&self, record: &mut Record, abort: &CancelToken) -> Result<()> {
        let pending: Vec<usize> = record.pending().collect();
        for idx in pending {
            let content = record.messages[idx].content.as_deref().unwrap_or_default();
            let translated = if content.is_empty() {
                String::new()
            } else {
                let source = normalize_text(content);
                let output = self.translator.translate(&source, abort).await?;
                normalize_text(&output).into_owned()
            };
            record.messages[idx].transformed_content = Some(translated);
        }
        Ok(())
    }
}

/// Errors that no amount of re-trying the record can fix.
fn is_fatal(err: &Error) -> bool {
    matches!(
        err,
        Error::TokenCounter(_) | Error::InvalidBudget(_) | Error::Config(_)
    ) || err.is_cancelled()
}

fn into_document(record: Record, worker: usize, index: u64) -> Option<Document> {
    match record.into_document() {
        Ok(doc) => Some(doc),
        Err(err) => {
            tracing::event!(
                tracing::Level::ERROR,
                event = "transpipe.record.skipped",
                worker = worker,
                index = index,
                error = %err,
                "transpipe.record.skipped"
            );
            None
        }
    }
}

#[async_trait]
impl Worker<Job, Document> for TranslationWorker {
    async fn process(&self, worker: usize, job: Job, abort: &CancelToken) -> Option<Outcome<Document>> {
        let Job { index, mut document } = job;
        ensure_custom_id(&mut document, index);
        normalize_document(&mut document);

        // Records that do not decode go to the failure output untouched.
        let mut record = match Record::try_from_document(document) {
            Ok(record) => record,
            Err((document, err)) => {
                tracing::event!(
                    tracing::Level::WARN,
                    event = "transpipe.record.rejected",
                    worker = worker,
                    index = index,
                    error = %err,
                    "transpipe.record.rejected"
                );
                return Some(Outcome::Exhausted(document));
            }
        };

        let mut credits = self.credits.credits();
        loop {
            let err = match self.translate_pending(&mut record, abort).await {
                Ok(()) => {
                    tracing::event!(
                        tracing::Level::INFO,
                        event = "transpipe.record.succeeded",
                        worker = worker,
                        index = index,
                        messages = record.messages.len(),
                        "transpipe.record.succeeded"
                    );
                    return into_document(record, worker, index).map(Outcome::Succeeded);
                }
                Err(err) => err,
            };

            credits = credits.saturating_sub(1);
            tracing::event!(
                tracing::Level::WARN,
                event = "transpipe.record.attempt_failed",
                worker = worker,
                index = index,
                credits = credits,
                error = %err,
                "transpipe.record.attempt_failed"
            );

            let exhausted = credits == 0
                || is_fatal(&err)
                || abort.sleep(self.credits.backoff()).await.is_err();
            if exhausted {
                tracing::event!(
                    tracing::Level::ERROR,
                    event = "transpipe.record.exhausted",
                    worker = worker,
                    index = index,
                    error = %err,
                    "transpipe.record.exhausted"
                );
                return into_document(record, worker, index).map(Outcome::Exhausted);
            }
        }
    }
}
