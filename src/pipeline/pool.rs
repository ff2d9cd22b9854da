use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::Result;
use crate::pipeline::cancel::CancelToken;

/// Terminal state of one job. Exactly one is produced per processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    Succeeded(R),
    Exhausted(R),
}

#[async_trait]
pub trait Worker<J, R>: Send + Sync
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Process one job. `None` drops the job (it is counted as skipped).
    ///
    /// `abort` fires when the run must stop without finishing in-flight work.
    async fn process(&self, worker: usize, job: J, abort: &CancelToken) -> Option<Outcome<R>>;
}

/// Receives every result. Owned by the pool's single writer loop.
#[async_trait]
pub trait Sink<R>: Send
where
    R: Send + 'static,
{
    async fn succeeded(&mut self, item: R) -> Result<()>;

    async fn exhausted(&mut self, item: R) -> Result<()>;

    /// Called once after both result streams are drained.
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Jobs handed to the queue.
    pub enqueued: u64,
    pub succeeded: u64,
    pub exhausted: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    skipped: AtomicU64,
}

/// Bounded work queue: one producer task, N worker tasks, and a writer loop
/// that multiplexes the success and failure streams into a [`Sink`].
///
/// Two tokens control shutdown. `stop` makes the producer stop reading;
/// everything already read is still processed and written. `abort` also
/// stops workers from taking queued jobs and is passed down so that waits
/// inside a job can give up early.
#[derive(Debug, Clone)]
pub struct WorkPool {
    workers: usize,
    queue_capacity: usize,
    result_buffer: usize,
}

impl WorkPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * 2,
            result_buffer: workers,
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn result_buffer(mut self, buffer: usize) -> Self {
        self.result_buffer = buffer.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run<J, R, P, W, S>(
        &self,
        producer: P,
        worker: Arc<W>,
        mut sink: S,
        stop: CancelToken,
        abort: CancelToken,
    ) -> Result<PoolReport>
    where
        J: Send + 'static,
        R: Send + 'static,
        P: Iterator<Item = Result<J>> + Send + 'static,
        W: Worker<J, R> + 'static,
        S: Sink<R>,
    {
        let counters = Arc::new(Counters::default());
        let (job_tx, job_rx) = mpsc::channel::<J>(self.queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (ok_tx, mut ok_rx) = mpsc::channel::<R>(self.result_buffer);
        let (fail_tx, mut fail_rx) = mpsc::channel::<R>(self.result_buffer);

        let reader = tokio::spawn(
            produce(producer, job_tx, stop.clone(), abort.clone(), counters.clone())
                .instrument(tracing::info_span!("transpipe.stage", stage = "reader")),
        );

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let span = tracing::info_span!("transpipe.stage", stage = "worker", worker = id);
            workers.push(tokio::spawn(
                consume(
                    id,
                    worker.clone(),
                    job_rx.clone(),
                    ok_tx.clone(),
                    fail_tx.clone(),
                    abort.clone(),
                    counters.clone(),
                )
                .instrument(span),
            ));
        }
        drop(ok_tx);
        drop(fail_tx);

        let mut report = PoolReport::default();
        let drained = drain(&mut sink, &mut ok_rx, &mut fail_rx, &mut report).await;
        let written = match drained {
            Ok(()) => sink.close().await,
            Err(err) => Err(err),
        };

        if let Err(err) = &written {
            tracing::event!(
                tracing::Level::ERROR,
                event = "transpipe.writer.failed",
                error = %err,
                "transpipe.writer.failed"
            );
            stop.cancel();
            abort.cancel();
            // Unblock workers waiting on a full result channel.
            drop(ok_rx);
            drop(fail_rx);
        }

        let produced = reader.await?;
        for handle in workers {
            handle.await?;
        }

        written?;
        produced?;

        report.enqueued = counters.enqueued.load(Ordering::Relaxed);
        report.skipped = counters.skipped.load(Ordering::Relaxed);
        Ok(report)
    }
}

async fn produce<J, P>(
    mut producer: P,
    jobs: mpsc::Sender<J>,
    stop: CancelToken,
    abort: CancelToken,
    counters: Arc<Counters>,
) -> Result<()>
where
    P: Iterator<Item = Result<J>>,
{
    loop {
        if stop.is_cancelled() || abort.is_cancelled() {
            tracing::event!(
                tracing::Level::INFO,
                event = "transpipe.cancelled",
                stage = "reader",
                where_ = "read",
                "transpipe.cancelled"
            );
            return Ok(());
        }

        let job = match producer.next() {
            None => return Ok(()),
            Some(Ok(job)) => job,
            Some(Err(err)) => {
                tracing::event!(
                    tracing::Level::ERROR,
                    event = "transpipe.reader.failed",
                    error = %err,
                    "transpipe.reader.failed"
                );
                return Err(err);
            }
        };

        // A job that has been read is enqueued even after `stop`.
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                tracing::event!(
                    tracing::Level::DEBUG,
                    event = "transpipe.cancelled",
                    stage = "reader",
                    where_ = "send",
                    "transpipe.cancelled"
                );
                return Ok(());
            }
            sent = jobs.send(job) => {
                if sent.is_err() {
                    tracing::event!(
                        tracing::Level::INFO,
                        event = "transpipe.downstream.closed",
                        stage = "reader",
                        "transpipe.downstream.closed"
                    );
                    return Ok(());
                }
                counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn consume<J, R, W>(
    id: usize,
    worker: Arc<W>,
    jobs: Arc<Mutex<mpsc::Receiver<J>>>,
    ok: mpsc::Sender<R>,
    fail: mpsc::Sender<R>,
    abort: CancelToken,
    counters: Arc<Counters>,
) where
    J: Send + 'static,
    R: Send + 'static,
    W: Worker<J, R>,
{
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let (channel, item) = match worker.process(id, job, &abort).await {
            Some(Outcome::Succeeded(item)) => (&ok, item),
            Some(Outcome::Exhausted(item)) => (&fail, item),
            None => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        if channel.send(item).await.is_err() {
            tracing::event!(
                tracing::Level::WARN,
                event = "transpipe.downstream.closed",
                stage = "worker",
                worker = id,
                "transpipe.downstream.closed"
            );
            break;
        }
    }
}

async fn drain<R, S>(
    sink: &mut S,
    ok: &mut mpsc::Receiver<R>,
    fail: &mut mpsc::Receiver<R>,
    report: &mut PoolReport,
) -> Result<()>
where
    R: Send + 'static,
    S: Sink<R>,
{
    let mut ok_open = true;
    let mut fail_open = true;

    while ok_open || fail_open {
        tokio::select! {
            item = ok.recv(), if ok_open => match item {
                Some(item) => {
                    sink.succeeded(item).await?;
                    report.succeeded += 1;
                }
                None => ok_open = false,
            },
            item = fail.recv(), if fail_open => match item {
                Some(item) => {
                    sink.exhausted(item).await?;
                    report.exhausted += 1;
                }
                None => fail_open = false,
            },
        }
    }
    Ok(())
}

impl Default for WorkPool {
    fn default() -> Self {
        Self::new(1)
    }
}

