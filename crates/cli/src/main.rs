//! CLI entry point for the transcode batch supervisor
//!
//! Builds one job per input file, hands the batch to the background worker,
//! and renders the events it posts. With `--join` the inputs are instead
//! stream-copied into a single file. Ctrl-C cancels the running job.

use clap::Parser;
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use transcode_supervisor::{
    collect_inputs, events, output_path_for, run_startup_checks, Backend, BatchSummary,
    CancellationToken, Config, Event, FfprobeProbe, JobSpec, JobStatus, JobSupervisor, JoinSpec,
    MetadataProbe, Preset, ProgressSnapshot, ThreadPolicy, Worker, STANDARD_RESOLUTIONS,
};

/// Exit code used when the batch was interrupted.
const EXIT_CANCELLED: u8 = 130;

/// Batch video rescaler with GPU encoding and automatic CPU fallback
#[derive(Parser, Debug)]
#[command(name = "transcode-batch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video files
    inputs: Vec<PathBuf>,

    /// Also process every video file directly inside this folder
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Directory for encoded files (default: next to each input)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Target width in pixels (default: source size if 720p, 1080p or 4K, else 720p)
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Target height in pixels
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Constant-quality value (default from configuration)
    #[arg(short, long)]
    quality: Option<u32>,

    /// Encoder preset, ultrafast through veryslow
    #[arg(short, long, default_value = "medium")]
    preset: Preset,

    /// Output frame rate (default: keep the source rate)
    #[arg(long)]
    fps: Option<f64>,

    /// Encoder threads for CPU jobs: auto, all, half, or a number
    #[arg(short, long, default_value = "auto")]
    threads: ThreadPolicy,

    /// Encode on the GPU, falling back to the CPU if it is unavailable
    #[arg(long)]
    gpu: bool,

    /// Join the inputs, in order, into one file without re-encoding
    #[arg(long, conflicts_with_all = ["width", "height", "quality", "fps", "gpu"])]
    join: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print events as JSON lines instead of human-readable text
    #[arg(long)]
    json: bool,

    /// Skip encoder availability checks
    #[arg(long)]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG overrides the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else {
        match run_startup_checks(&config) {
            Ok(report) => {
                if args.gpu && !report.gpu_encoder_available {
                    warn!(
                        "{} is not available in {}; GPU jobs will fall back to {}",
                        config.encoder.gpu_codec,
                        config.tool.ffmpeg_bin.display(),
                        config.encoder.cpu_codec
                    );
                }
            }
            Err(e) => {
                error!("Startup check failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let inputs = match gather_inputs(&args) {
        Ok(inputs) => inputs,
        Err(message) => {
            error!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    if args.join {
        run_join(&args, config, inputs).await
    } else {
        run_batch(&args, config, inputs).await
    }
}

async fn run_batch(args: &Args, config: Config, inputs: Vec<PathBuf>) -> ExitCode {
    let probe = FfprobeProbe::new(config.tool.ffprobe_bin.clone());
    let jobs = build_jobs(args, &config, inputs, &probe).await;

    let (worker, handle, mut events) = Worker::new(config, probe);
    let worker_task = worker.spawn();

    if let Err(e) = handle.submit(jobs).await {
        error!("Batch rejected: {}", e);
        return ExitCode::FAILURE;
    }

    let interrupt = {
        let handle = handle.clone();
        spawn_interrupt(move || handle.cancel())
    };

    let mut summary = None;
    while let Some(event) = events.recv().await {
        emit(&event, args.json);
        if let Event::BatchDone(done) = event {
            summary = Some(done);
            break;
        }
    }

    interrupt.abort();
    drop(handle);
    if let Err(e) = worker_task.await {
        error!("Worker task failed: {}", e);
    }

    match summary {
        Some(summary) => exit_code(&summary),
        None => {
            error!("Worker stopped before the batch finished");
            ExitCode::FAILURE
        }
    }
}

async fn run_join(args: &Args, config: Config, inputs: Vec<PathBuf>) -> ExitCode {
    let spec = JoinSpec::new(inputs, args.output_dir.as_deref());
    info!(
        "Joining {} file(s) into {}",
        spec.inputs.len(),
        spec.output_path.display()
    );

    let probe = Arc::new(FfprobeProbe::new(config.tool.ffprobe_bin.clone()));
    let (sink, mut events) = events::channel();
    let supervisor = JobSupervisor::new(0, Arc::new(config), probe, sink);
    let cancel = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        spawn_interrupt(move || cancel.cancel())
    };
    // the sink drops with the supervisor, which ends the event loop below
    let join_task = tokio::spawn(async move { supervisor.join(&spec, &cancel).await });

    while let Some(event) = events.recv().await {
        emit(&event, args.json);
    }
    interrupt.abort();

    let outcome = match join_task.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!("Join failed: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Join task failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string(&outcome) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize outcome: {}", e),
        }
    } else {
        println!();
        println!("Join {}", outcome.status);
        if let Some(report) = &outcome.size_report {
            println!("{}", report);
        }
    }
    status_exit_code(outcome.status)
}

/// Cancel through `cancel` on every Ctrl-C until aborted.
fn spawn_interrupt(cancel: impl Fn() + Send + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling current job");
            cancel();
        }
    })
}

fn gather_inputs(args: &Args) -> Result<Vec<PathBuf>, String> {
    let mut inputs = args.inputs.clone();
    if let Some(folder) = &args.folder {
        let found = collect_inputs(folder)
            .map_err(|e| format!("Could not read folder {}: {}", folder.display(), e))?;
        info!("Found {} video file(s) in {}", found.len(), folder.display());
        inputs.extend(found);
    }
    if inputs.is_empty() {
        return Err("No input files given (pass files or --folder)".to_string());
    }

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Could not create output directory {}: {}", dir.display(), e))?;
    }
    Ok(inputs)
}

/// One job per input. Without an explicit size each input keeps its own
/// resolution when it is a standard one.
async fn build_jobs(
    args: &Args,
    config: &Config,
    inputs: Vec<PathBuf>,
    probe: &impl MetadataProbe,
) -> Vec<JobSpec> {
    let quality = args.quality.unwrap_or(config.quality.default);
    let threads = args.threads.resolve();
    let backend = if args.gpu { Backend::Gpu } else { Backend::Cpu };

    let mut jobs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let (width, height) = match args.width.zip(args.height) {
            Some(size) => size,
            None => match probe.probe(&input).await {
                Ok(info) => info.default_resolution(),
                Err(e) => {
                    let (width, height) = STANDARD_RESOLUTIONS[0];
                    warn!(
                        "Could not probe {}: {}; encoding at {}x{}",
                        input.display(),
                        e,
                        width,
                        height
                    );
                    (width, height)
                }
            },
        };

        jobs.push(JobSpec {
            output_path: output_path_for(
                &input,
                args.output_dir.as_deref(),
                width,
                height,
                quality,
                args.preset.as_str(),
            ),
            input_path: input,
            width,
            height,
            quality,
            preset: args.preset,
            target_fps: args.fps,
            threads,
            backend,
        });
    }
    jobs
}

fn emit(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize event: {}", e),
        }
    } else {
        render(event);
    }
}

fn render(event: &Event) {
    match event {
        Event::Progress { job, snapshot } => {
            print!("\r{}", progress_line(*job, snapshot));
            let _ = std::io::stdout().flush();
        }
        Event::StatusChanged { job, status } => {
            if *status != JobStatus::Processing {
                println!();
                println!("[{}] {}", job + 1, status);
            }
        }
        Event::CurrentFile { job, input } => {
            println!("[{}] {}", job + 1, input.display());
        }
        Event::BatchProgress {
            completed,
            total,
            percent,
        } => {
            println!("Batch: {}/{} files ({:.0}%)", completed, total, percent);
        }
        Event::Log { level, line } => {
            println!("{}: {}", level, line);
        }
        Event::BatchDone(summary) => {
            println!(
                "Done: {} completed, {} failed, {} pending{}",
                summary.completed,
                summary.failed,
                summary.pending,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
}

fn progress_line(job: usize, snapshot: &ProgressSnapshot) -> String {
    let frames = match snapshot.expected_frames {
        Some(total) => format!("{}/{}", snapshot.frame, total),
        None => snapshot.frame.to_string(),
    };
    format!(
        "[{}] {:6.2}%  frame {}  {:.1} fps  elapsed {}  eta {}",
        job + 1,
        snapshot.percent,
        frames,
        snapshot.throughput,
        format_clock(snapshot.elapsed_secs),
        format_clock(snapshot.remaining_secs)
    )
}

/// `MM:SS`, or `H:MM:SS` past an hour.
fn format_clock(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.round() as u64
    } else {
        0
    };
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn status_exit_code(status: JobStatus) -> ExitCode {
    match status {
        JobStatus::Completed => ExitCode::SUCCESS,
        JobStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::FAILURE,
    }
}

fn exit_code(summary: &BatchSummary) -> ExitCode {
    if summary.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_supervisor::{MediaInfo, StaticProbe};

    fn source(width: u32, height: u32) -> StaticProbe {
        StaticProbe(MediaInfo {
            width: Some(width),
            height: Some(height),
            ..MediaInfo::default()
        })
    }

    async fn jobs_for(argv: &[&str], probe: &StaticProbe) -> Vec<JobSpec> {
        let args = Args::parse_from(argv);
        let inputs = args.inputs.clone();
        build_jobs(&args, &Config::default(), inputs, probe).await
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(-4.0), "00:00");
        assert_eq!(format_clock(75.4), "01:15");
        assert_eq!(format_clock(3723.0), "1:02:03");
    }

    #[tokio::test]
    async fn test_build_jobs_from_arguments() {
        let jobs = jobs_for(
            &[
                "transcode-batch",
                "/videos/a.mkv",
                "--width",
                "640",
                "--height",
                "360",
                "--preset",
                "slow",
                "--gpu",
                "--threads",
                "4",
            ],
            &source(1920, 1080),
        )
        .await;

        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.backend, Backend::Gpu);
        assert_eq!(job.quality, Config::default().quality.default);
        assert_eq!(job.threads, 4);
        assert_eq!(job.preset, Preset::Slow);
        assert_eq!((job.width, job.height), (640, 360));
        assert_eq!(job.output_path, PathBuf::from("/videos/a_640x360_q26_slow.mp4"));
    }

    #[tokio::test]
    async fn test_resolution_defaults_to_standard_source_size() {
        let argv = ["transcode-batch", "/videos/a.mkv", "--preset", "slow"];

        let jobs = jobs_for(&argv, &source(1920, 1080)).await;
        assert_eq!((jobs[0].width, jobs[0].height), (1920, 1080));
        assert_eq!(
            jobs[0].output_path,
            PathBuf::from("/videos/a_1920x1080_q26_slow.mp4")
        );

        let jobs = jobs_for(&argv, &source(3840, 2160)).await;
        assert_eq!((jobs[0].width, jobs[0].height), (3840, 2160));

        let jobs = jobs_for(&argv, &source(1000, 500)).await;
        assert_eq!((jobs[0].width, jobs[0].height), (1280, 720));

        let jobs = jobs_for(&argv, &StaticProbe::default()).await;
        assert_eq!((jobs[0].width, jobs[0].height), (1280, 720));
    }

    #[test]
    fn test_width_and_height_go_together() {
        assert!(Args::try_parse_from(["transcode-batch", "a.mp4", "--width", "640"]).is_err());
        assert!(Args::try_parse_from(["transcode-batch", "a.mp4", "--height", "360"]).is_err());
        assert!(Args::try_parse_from(["transcode-batch", "a.mp4", "--join", "--gpu"]).is_err());
        assert!(Args::try_parse_from(["transcode-batch", "a.mp4", "b.mp4", "--join"]).is_ok());
    }

    #[test]
    fn test_gather_inputs_requires_inputs() {
        let args = Args::parse_from(["transcode-batch"]);
        assert!(gather_inputs(&args).is_err());
    }

    #[test]
    fn test_join_exit_codes() {
        assert_eq!(status_exit_code(JobStatus::Completed), ExitCode::SUCCESS);
        assert_eq!(status_exit_code(JobStatus::Error), ExitCode::FAILURE);
        assert_eq!(
            status_exit_code(JobStatus::Cancelled),
            ExitCode::from(EXIT_CANCELLED)
        );
    }
}
