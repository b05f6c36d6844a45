//! Job supervisor
//!
//! Runs one encoder invocation for a [`JobSpec`]: spawns the process, scans
//! both output streams line by line, posts progress, honours cancellation,
//! and resolves the exit into a [`JobOutcome`]. A GPU run that fails because
//! the hardware encoder is unavailable is re-run once on the CPU.

use crate::cancel::CancellationToken;
use crate::classify::{describe_exit_code, ErrorClassifier};
use crate::config::Config;
use crate::encode::{build_command, build_concat_command};
use crate::events::{Event, EventSink, LogLevel};
use crate::job::{Backend, JobSpec, JobSpecError, JobStatus};
use crate::join::{check_compatibility, write_concat_list, JoinError, JoinSpec};
use crate::probe::{MediaInfo, MetadataProbe};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::size_report::SizeReport;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::MissedTickBehavior;

/// A GPU job may re-enter as a CPU job once; CPU jobs never fall back.
const MAX_FALLBACK_DEPTH: u8 = 1;

/// Failures that prevent a job from producing a terminal status.
#[derive(Debug, Error)]
pub enum SuperviseError {
    #[error("invalid job: {0}")]
    InvalidSpec(#[from] JobSpecError),

    /// The encoder binary is missing or not executable.
    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while supervising encoder: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal result of one supervised job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    /// `Completed`, `Error` or `Cancelled`.
    pub status: JobStatus,
    /// Backend of the run that produced this result.
    pub backend: Backend,
    pub fell_back_to_cpu: bool,
    pub exit_code: Option<i32>,
    pub exit_description: Option<String>,
    /// Lines matching a failure signature, for failed runs.
    pub error_lines: Vec<String>,
    /// Lines matching a failure signature on a run that still succeeded.
    pub warnings: Vec<String>,
    pub size_report: Option<SizeReport>,
    pub final_progress: Option<ProgressSnapshot>,
}

impl JobOutcome {
    fn cancelled(
        backend: Backend,
        exit_code: Option<i32>,
        final_progress: Option<ProgressSnapshot>,
    ) -> Self {
        Self {
            status: JobStatus::Cancelled,
            backend,
            fell_back_to_cpu: false,
            exit_code,
            exit_description: None,
            error_lines: Vec::new(),
            warnings: Vec::new(),
            size_report: None,
            final_progress,
        }
    }
}

/// How one supervised process ended.
enum ProcessEnd {
    /// Stopped on request; the partial output has been removed.
    Cancelled { exit_code: Option<i32> },
    Exited {
        exit_code: Option<i32>,
        matched_lines: Vec<String>,
        hardware_unavailable: bool,
    },
}

type AttemptFuture<'a> =
    Pin<Box<dyn Future<Output = Result<JobOutcome, SuperviseError>> + Send + 'a>>;

/// Supervises jobs for one batch slot, posting events tagged with `job_index`.
pub struct JobSupervisor<P> {
    job_index: usize,
    config: Arc<Config>,
    probe: Arc<P>,
    events: EventSink,
}

impl<P: MetadataProbe> JobSupervisor<P> {
    pub fn new(job_index: usize, config: Arc<Config>, probe: Arc<P>, events: EventSink) -> Self {
        Self {
            job_index,
            config,
            probe,
            events,
        }
    }

    /// Run `spec` to a terminal status.
    ///
    /// Invalid specs are rejected before anything is spawned. Per-job
    /// failures are reported through the returned [`JobOutcome`]; only a
    /// missing binary or a broken pipe surfaces as [`SuperviseError`].
    pub async fn run(
        &self,
        spec: &JobSpec,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, SuperviseError> {
        spec.validate(&self.config.quality)?;

        if cancel.is_cancelled() {
            return Ok(JobOutcome::cancelled(spec.backend, None, None));
        }

        let media = match self.probe.probe(&spec.input_path).await {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    "Could not probe {}: {}; progress totals unavailable",
                    spec.input_path.display(),
                    e
                );
                MediaInfo::default()
            }
        };

        self.attempt(spec, &media, cancel, 0).await
    }

    /// Join the inputs of `spec` into one file without re-encoding.
    ///
    /// Every input is inspected first and must share codec, resolution and
    /// frame rate with the first one. Progress, cancellation and cleanup
    /// behave as in [`run`](Self::run); there is no GPU fallback.
    pub async fn join(
        &self,
        spec: &JoinSpec,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JoinError> {
        spec.validate()?;

        if cancel.is_cancelled() {
            return Ok(JobOutcome::cancelled(Backend::Cpu, None, None));
        }

        let mut sources = Vec::with_capacity(spec.inputs.len());
        for path in &spec.inputs {
            let info = self.probe.probe(path).await.map_err(|source| JoinError::Probe {
                path: path.clone(),
                source,
            })?;
            sources.push(info);
        }
        check_compatibility(&spec.inputs, &sources)?;

        let message = format!(
            "Joining {} videos into {}",
            spec.inputs.len(),
            spec.output_path.display()
        );
        info!("Job {}: {}", self.job_index, message);
        self.events.log(LogLevel::Info, message);

        let list = write_concat_list(spec).await?;
        let program = self.config.tool.ffmpeg_bin.clone();
        let cmd = build_concat_command(&program, &list, &spec.output_path);
        let mut tracker = self.tracker(&MediaInfo::concatenated(&sources), None);

        let end = self
            .supervise_process(cmd, program, &spec.output_path, &mut tracker, cancel)
            .await;
        if let Err(e) = tokio::fs::remove_file(&list).await {
            debug!("Could not remove concat list {}: {}", list.display(), e);
        }
        let final_progress = tracker.last().cloned();

        let outcome = match end? {
            ProcessEnd::Cancelled { exit_code } => {
                JobOutcome::cancelled(Backend::Cpu, exit_code, final_progress)
            }
            ProcessEnd::Exited {
                exit_code: Some(0),
                matched_lines,
                ..
            } => {
                let input_bytes = spec
                    .inputs
                    .iter()
                    .filter_map(|p| std::fs::metadata(p).ok())
                    .map(|m| m.len())
                    .sum::<u64>();
                let size_report = std::fs::metadata(&spec.output_path)
                    .ok()
                    .map(|m| SizeReport::new(input_bytes, m.len()));
                self.completed(
                    Backend::Cpu,
                    &spec.output_path,
                    matched_lines,
                    size_report,
                    final_progress,
                )
            }
            ProcessEnd::Exited {
                exit_code,
                matched_lines,
                ..
            } => self.failed(
                Backend::Cpu,
                &spec.output_path,
                exit_code,
                matched_lines,
                final_progress,
            ),
        };
        Ok(outcome)
    }

    /// Boxed so a failed GPU attempt can recurse into its CPU fallback.
    fn attempt<'a>(
        &'a self,
        spec: &'a JobSpec,
        media: &'a MediaInfo,
        cancel: &'a CancellationToken,
        depth: u8,
    ) -> AttemptFuture<'a> {
        Box::pin(self.run_once(spec, media, cancel, depth))
    }

    async fn run_once(
        &self,
        spec: &JobSpec,
        media: &MediaInfo,
        cancel: &CancellationToken,
        depth: u8,
    ) -> Result<JobOutcome, SuperviseError> {
        let program = self.config.tool.ffmpeg_bin.clone();
        let cmd = build_command(&program, spec, &self.config.encoder);
        info!(
            "Job {}: encoding {} on {}",
            self.job_index,
            spec.input_path.display(),
            spec.backend
        );

        let mut tracker = self.tracker(media, spec.target_fps);
        let end = self
            .supervise_process(cmd, program, &spec.output_path, &mut tracker, cancel)
            .await?;
        let final_progress = tracker.last().cloned();

        let (exit_code, matched_lines, hardware_unavailable) = match end {
            ProcessEnd::Cancelled { exit_code } => {
                return Ok(JobOutcome::cancelled(spec.backend, exit_code, final_progress));
            }
            ProcessEnd::Exited {
                exit_code,
                matched_lines,
                hardware_unavailable,
            } => (exit_code, matched_lines, hardware_unavailable),
        };

        if exit_code == Some(0) {
            let size_report = SizeReport::from_files(&spec.input_path, &spec.output_path);
            return Ok(self.completed(
                spec.backend,
                &spec.output_path,
                matched_lines,
                size_report,
                final_progress,
            ));
        }

        if hardware_unavailable && spec.backend == Backend::Gpu && depth < MAX_FALLBACK_DEPTH {
            let message = format!(
                "Hardware encoder unavailable for {}; retrying with {}",
                spec.input_path.display(),
                self.config.encoder.cpu_codec
            );
            warn!("Job {}: {}", self.job_index, message);
            self.events.log(LogLevel::Warning, message);
            self.remove_partial_output(&spec.output_path).await;

            let fallback = spec.as_cpu_fallback();
            let mut outcome = self.attempt(&fallback, media, cancel, depth + 1).await?;
            outcome.fell_back_to_cpu = true;
            return Ok(outcome);
        }

        Ok(self.failed(
            spec.backend,
            &spec.input_path,
            exit_code,
            matched_lines,
            final_progress,
        ))
    }

    fn tracker(&self, media: &MediaInfo, target_fps: Option<f64>) -> ProgressTracker {
        let supervision = &self.config.supervision;
        ProgressTracker::new(
            media,
            target_fps,
            supervision.progress_window,
            supervision.recompute_every,
            Instant::now(),
        )
    }

    /// Spawn `cmd` and follow it until it exits or `cancel` is raised.
    ///
    /// Every line from stdout and stderr is classified and fed to `tracker`.
    /// On cancellation the process is stopped and `output` is deleted.
    async fn supervise_process(
        &self,
        mut cmd: Command,
        program: PathBuf,
        output: &Path,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<ProcessEnd, SuperviseError> {
        debug!("Spawning {:?}", cmd.as_std());
        let mut child = cmd
            .spawn()
            .map_err(|source| SuperviseError::Spawn { program, source })?;

        let mut stdin = child.stdin.take();
        let mut stdout = LineReader::new(child.stdout.take());
        let mut stderr = LineReader::new(child.stderr.take());

        let classifier = ErrorClassifier::new();
        let mut matched_lines = Vec::new();
        let mut hardware_unavailable = false;

        let poll = self.config.supervision.cancel_poll_interval_ms.max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(poll));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while stdout.open || stderr.open {
            if cancel.is_cancelled() {
                let exit_code = self.cancel_running(&mut child, stdin.take()).await;
                self.remove_partial_output(output).await;
                return Ok(ProcessEnd::Cancelled { exit_code });
            }

            let line = tokio::select! {
                line = stdout.next_line(), if stdout.open => line?,
                line = stderr.next_line(), if stderr.open => line?,
                _ = ticker.tick() => None,
            };
            let Some(line) = line else { continue };

            let class = classifier.classify(&line);
            hardware_unavailable |= class.hardware_unavailable;
            if class.fatal {
                debug!("Job {}: {}", self.job_index, line);
                matched_lines.push(line.clone());
            }
            if let Some(snapshot) = tracker.observe(&line, Instant::now()) {
                self.post_progress(snapshot);
            }
        }

        if let Some(snapshot) = tracker.finish(Instant::now()) {
            self.post_progress(snapshot);
        }
        drop(stdin);

        let exit_code = child.wait().await?.code();

        if cancel.is_cancelled() {
            self.remove_partial_output(output).await;
            return Ok(ProcessEnd::Cancelled { exit_code });
        }

        Ok(ProcessEnd::Exited {
            exit_code,
            matched_lines,
            hardware_unavailable,
        })
    }

    fn completed(
        &self,
        backend: Backend,
        output: &Path,
        warnings: Vec<String>,
        size_report: Option<SizeReport>,
        final_progress: Option<ProgressSnapshot>,
    ) -> JobOutcome {
        info!("Job {}: completed {}", self.job_index, output.display());

        if !warnings.is_empty() {
            let preview = self.config.supervision.warning_preview;
            self.events.log(
                LogLevel::Warning,
                format!("Completed with {} warning(s):", warnings.len()),
            );
            for line in warnings.iter().take(preview) {
                self.events.log(LogLevel::Warning, line.as_str());
            }
            if warnings.len() > preview {
                self.events.log(
                    LogLevel::Warning,
                    format!("... and {} more", warnings.len() - preview),
                );
            }
        }

        if let Some(report) = &size_report {
            self.events.log(LogLevel::Info, report.to_string());
        }

        JobOutcome {
            status: JobStatus::Completed,
            backend,
            fell_back_to_cpu: false,
            exit_code: Some(0),
            exit_description: Some(describe_exit_code(Some(0))),
            error_lines: Vec::new(),
            warnings,
            size_report,
            final_progress,
        }
    }

    fn failed(
        &self,
        backend: Backend,
        subject: &Path,
        exit_code: Option<i32>,
        error_lines: Vec<String>,
        final_progress: Option<ProgressSnapshot>,
    ) -> JobOutcome {
        let description = describe_exit_code(exit_code);
        warn!(
            "Job {}: encoder failed for {} ({})",
            self.job_index,
            subject.display(),
            description
        );
        JobOutcome {
            status: JobStatus::Error,
            backend,
            fell_back_to_cpu: false,
            exit_code,
            exit_description: Some(description),
            error_lines,
            warnings: Vec::new(),
            size_report: None,
            final_progress,
        }
    }

    /// Stop a running child: ask it to quit, then force kill after the
    /// grace period. Returns the exit code if the child exited on its own.
    async fn cancel_running(&self, child: &mut Child, stdin: Option<ChildStdin>) -> Option<i32> {
        info!("Job {}: cancelling", self.job_index);

        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(b"q\n").await {
                debug!("Job {}: quit request not delivered: {}", self.job_index, e);
            }
        }

        let grace = Duration::from_secs(self.config.supervision.termination_timeout_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!("Job {}: waiting for encoder failed: {}", self.job_index, e);
                None
            }
            Err(_) => {
                warn!(
                    "Job {}: encoder did not exit within {}s, killing",
                    self.job_index,
                    grace.as_secs()
                );
                if let Err(e) = child.kill().await {
                    warn!("Job {}: kill failed: {}", self.job_index, e);
                }
                None
            }
        }
    }

    /// Best-effort delete; failures are reported as warnings only.
    async fn remove_partial_output(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed partial output {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let message =
                    format!("Could not remove partial output {}: {}", path.display(), e);
                warn!("{}", message);
                self.events.log(LogLevel::Warning, message);
            }
        }
    }

    fn post_progress(&self, snapshot: ProgressSnapshot) {
        self.events.post(Event::Progress {
            job: self.job_index,
            snapshot,
        });
    }
}

/// Lossy line reader over one child pipe.
///
/// Partial lines survive a cancelled read, so it is safe inside `select!`.
struct LineReader<R> {
    reader: Option<BufReader<R>>,
    buf: Vec<u8>,
    open: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(pipe: Option<R>) -> Self {
        Self {
            open: pipe.is_some(),
            reader: pipe.map(BufReader::new),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            self.open = false;
            return Ok(None);
        };

        let read = reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            self.open = false;
            if self.buf.is_empty() {
                return Ok(None);
            }
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}
