//! Batch worker
//!
//! A single background task owns the [`BatchQueue`] and drains every batch
//! submitted through a [`WorkerHandle`]. The presentation layer talks to it
//! only through the handle (submit, cancel) and the event stream.
//!
//! Submissions are numbered. A cancel covers every batch submitted before
//! it, including one still waiting in the channel, and none submitted after.

use crate::batch::{BatchError, BatchQueue};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::events::{self, EventStream};
use crate::job::JobSpec;
use crate::probe::MetadataProbe;
use log::{error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Pending submissions buffered before `submit` waits.
const SUBMISSION_BUFFER: usize = 16;

#[derive(Debug)]
struct Submission {
    generation: u64,
    jobs: Vec<JobSpec>,
}

/// Submission counters shared by the handles and the worker.
#[derive(Debug, Default)]
struct Generations {
    submitted: AtomicU64,
    cancelled_through: AtomicU64,
}

/// Cloneable handle for submitting batches and cancelling the active one.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Submission>,
    cancel: CancellationToken,
    generations: Arc<Generations>,
    config: Arc<Config>,
}

impl WorkerHandle {
    /// Validate `jobs` and queue them as the next batch.
    ///
    /// Invalid specs are rejected here, before anything reaches the worker.
    pub async fn submit(&self, jobs: Vec<JobSpec>) -> Result<(), BatchError> {
        if jobs.is_empty() {
            return Err(BatchError::Empty);
        }
        for (index, spec) in jobs.iter().enumerate() {
            spec.validate(&self.config.quality)
                .map_err(|source| BatchError::InvalidJob { index, source })?;
        }

        let generation = self.generations.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .send(Submission { generation, jobs })
            .await
            .map_err(|_| BatchError::WorkerGone)
    }

    /// Cancel the job currently running and every batch submitted so far.
    ///
    /// A batch accepted by `submit` but not yet started never runs a job.
    pub fn cancel(&self) {
        let submitted = self.generations.submitted.load(Ordering::SeqCst);
        self.generations.cancelled_through.fetch_max(submitted, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Background driver for the batch queue.
pub struct Worker<P> {
    queue: BatchQueue<P>,
    rx: mpsc::Receiver<Submission>,
    generations: Arc<Generations>,
}

impl<P: MetadataProbe + 'static> Worker<P> {
    pub fn new(config: Config, probe: P) -> (Self, WorkerHandle, EventStream) {
        let config = Arc::new(config);
        let (sink, stream) = events::channel();
        let queue = BatchQueue::new(Arc::clone(&config), Arc::new(probe), sink);
        let (tx, rx) = mpsc::channel(SUBMISSION_BUFFER);
        let generations = Arc::new(Generations::default());

        let handle = WorkerHandle {
            tx,
            cancel: queue.cancel_handle(),
            generations: Arc::clone(&generations),
            config,
        };
        let worker = Self {
            queue,
            rx,
            generations,
        };
        (worker, handle, stream)
    }

    /// Drain submitted batches until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(Submission { generation, jobs }) = self.rx.recv().await {
            info!("Received batch {} of {} job(s)", generation, jobs.len());
            // submit clears the token; restore a cancel aimed at this batch
            if let Err(e) = self.queue.submit(jobs) {
                error!("Batch rejected: {}", e);
                continue;
            }
            if generation <= self.generations.cancelled_through.load(Ordering::SeqCst) {
                info!("Batch {} was cancelled before it started", generation);
                self.queue.cancel();
            }
            self.queue.drain().await;
        }
        info!("All worker handles dropped, stopping");
    }

    /// Run on a dedicated tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
