//! Sequential batch queue.
//!
//! Holds the ordered job list with per-item status and drains it one job at
//! a time through a [`JobSupervisor`]. Cancelling only raises the shared
//! token; the in-flight supervisor does the teardown and the item goes back
//! to `Pending` so a later resubmission picks it up. The token stays raised
//! until the next [`BatchQueue::submit`], so a cancel that lands between
//! submitting and draining still stops the batch.

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::events::{Event, EventSink, LogLevel};
use crate::job::{JobSpec, JobSpecError, JobStatus};
use crate::probe::MetadataProbe;
use crate::supervisor::{JobOutcome, JobSupervisor};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Reasons a batch submission is refused.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("job {index} rejected: {source}")]
    InvalidJob {
        index: usize,
        #[source]
        source: JobSpecError,
    },

    #[error("batch contains no jobs")]
    Empty,

    #[error("batch worker has shut down")]
    WorkerGone,
}

/// One queued job and its current status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Result of the most recent run, if any.
    pub outcome: Option<JobOutcome>,
}

impl BatchItem {
    fn pending(spec: JobSpec) -> Self {
        Self {
            spec,
            status: JobStatus::Pending,
            outcome: None,
        }
    }
}

/// Aggregate counts posted when a batch stops draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// Draining stopped because of a cancellation request.
    pub cancelled: bool,
}

impl BatchSummary {
    /// File-level completion percentage.
    pub fn percent(&self) -> f64 {
        batch_percent(self.completed, self.total)
    }
}

fn batch_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}

pub struct BatchQueue<P> {
    items: Vec<BatchItem>,
    active: Option<usize>,
    config: Arc<Config>,
    probe: Arc<P>,
    events: EventSink,
    cancel: CancellationToken,
}

impl<P: MetadataProbe> BatchQueue<P> {
    pub fn new(config: Arc<Config>, probe: Arc<P>, events: EventSink) -> Self {
        Self {
            items: Vec::new(),
            active: None,
            config,
            probe,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Index of the job currently being supervised.
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Token shared with running supervisors; setting it cancels the batch.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the in-flight job. Never touches the item list.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Replace the job list with `jobs`.
    ///
    /// Every spec is validated first; nothing changes if one is rejected.
    /// Specs already present keep their status, so finished work is not redone.
    /// An accepted submission starts a new batch and clears any earlier cancel.
    pub fn submit(&mut self, jobs: Vec<JobSpec>) -> Result<(), BatchError> {
        if jobs.is_empty() {
            return Err(BatchError::Empty);
        }
        for (index, spec) in jobs.iter().enumerate() {
            spec.validate(&self.config.quality)
                .map_err(|source| BatchError::InvalidJob { index, source })?;
        }

        let mut previous = std::mem::take(&mut self.items);
        self.items = jobs
            .into_iter()
            .map(|spec| match previous.iter().position(|item| item.spec == spec) {
                Some(pos) => {
                    let mut item = previous.swap_remove(pos);
                    // a Processing leftover can only come from an aborted drain
                    if item.status == JobStatus::Processing {
                        item.status = JobStatus::Pending;
                    }
                    item
                }
                None => BatchItem::pending(spec),
            })
            .collect();
        self.active = None;
        self.cancel.reset();
        Ok(())
    }

    /// Submit `jobs` and drain the queue.
    pub async fn process(&mut self, jobs: Vec<JobSpec>) -> Result<BatchSummary, BatchError> {
        self.submit(jobs)?;
        Ok(self.drain().await)
    }

    /// Run every item that is not `Completed`, in order.
    ///
    /// Stops at the first cancelled job; a failed job is recorded and the
    /// next one starts.
    pub async fn drain(&mut self) -> BatchSummary {
        let total = self.items.len();
        let mut cancelled = false;
        info!("Starting batch of {} job(s)", total);

        for index in 0..total {
            if self.items[index].status == JobStatus::Completed {
                continue;
            }

            self.active = Some(index);
            self.set_status(index, JobStatus::Processing);
            self.events.post(Event::CurrentFile {
                job: index,
                input: self.items[index].spec.input_path.clone(),
            });

            let spec = self.items[index].spec.clone();
            let supervisor = JobSupervisor::new(
                index,
                Arc::clone(&self.config),
                Arc::clone(&self.probe),
                self.events.clone(),
            );
            let result = supervisor.run(&spec, &self.cancel).await;
            self.active = None;

            match result {
                Ok(outcome) => {
                    let status = outcome.status;
                    let failure = failure_message(&spec, &outcome);
                    self.items[index].outcome = Some(outcome);
                    match status {
                        JobStatus::Completed => {
                            self.set_status(index, JobStatus::Completed);
                            let completed = self.count(JobStatus::Completed);
                            self.events.post(Event::BatchProgress {
                                completed,
                                total,
                                percent: batch_percent(completed, total),
                            });
                        }
                        JobStatus::Cancelled => {
                            info!("Batch cancelled during job {}", index);
                            self.set_status(index, JobStatus::Pending);
                            self.events.log(
                                LogLevel::Info,
                                format!("Cancelled {}", spec.input_path.display()),
                            );
                            cancelled = true;
                            break;
                        }
                        _ => {
                            self.set_status(index, JobStatus::Error);
                            for line in failure {
                                self.events.log(LogLevel::Error, line);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Job {} could not run: {}", index, e);
                    self.set_status(index, JobStatus::Error);
                    self.events.log(
                        LogLevel::Error,
                        format!("Error processing {}: {}", spec.input_path.display(), e),
                    );
                }
            }
        }

        let summary = self.summary(cancelled);
        info!(
            "Batch finished: {}/{} completed, {} failed, {} pending",
            summary.completed, summary.total, summary.failed, summary.pending
        );
        self.events.post(Event::BatchDone(summary));
        summary
    }

    fn summary(&self, cancelled: bool) -> BatchSummary {
        BatchSummary {
            total: self.items.len(),
            completed: self.count(JobStatus::Completed),
            failed: self.count(JobStatus::Error),
            pending: self.count(JobStatus::Pending),
            cancelled,
        }
    }

    fn count(&self, status: JobStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    fn set_status(&mut self, index: usize, status: JobStatus) {
        self.items[index].status = status;
        self.events.post(Event::StatusChanged { job: index, status });
    }
}

/// Log lines describing a failed run: headline plus the matched diagnostics.
fn failure_message(spec: &JobSpec, outcome: &JobOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "Error processing {}: {}",
        spec.input_path.display(),
        outcome
            .exit_description
            .as_deref()
            .unwrap_or("encoder failed")
    )];
    lines.extend(outcome.error_lines.iter().cloned());
    lines
}
