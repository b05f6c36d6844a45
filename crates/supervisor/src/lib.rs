//! Transcode Supervisor
//!
//! Drives batches of transcode jobs through an external encoder: builds the
//! command line, follows the encoder's progress stream, classifies failures,
//! falls back from GPU to CPU encoding, and handles cancellation. Videos
//! sharing one stream layout can also be joined without re-encoding.

pub mod batch;
pub mod cancel;
pub mod classify;
pub mod encode;
pub mod events;
pub mod job;
pub mod join;
pub mod probe;
pub mod progress;
pub mod scan;
pub mod size_report;
pub mod startup;
pub mod supervisor;
pub mod threads;
pub mod worker;

#[cfg(all(test, unix))]
mod test_support;

pub use transcode_supervisor_config as config;
pub use transcode_supervisor_config::Config;
pub use batch::{BatchError, BatchItem, BatchQueue, BatchSummary};
pub use cancel::CancellationToken;
pub use classify::{describe_exit_code, ErrorClassifier, LineClass};
pub use encode::{build_args, build_command, build_concat_args, build_concat_command};
pub use events::{Event, EventSink, EventStream, LogLevel};
pub use job::{Backend, JobSpec, JobSpecError, JobStatus, Preset};
pub use join::{check_compatibility, JoinError, JoinSpec};
pub use probe::{
    parse_frame_rate, FfprobeProbe, MediaInfo, MetadataProbe, ProbeError, StaticProbe,
    STANDARD_RESOLUTIONS,
};
pub use progress::{
    expected_output_frames, percent_complete, ProgressEstimator, ProgressParser, ProgressSnapshot,
    ProgressTracker,
};
pub use scan::{collect_inputs, output_path_for};
pub use size_report::SizeReport;
pub use startup::{
    check_tool_available, detect_gpu_encoder, parse_tool_version, run_startup_checks,
    StartupError, StartupReport,
};
pub use supervisor::{JobOutcome, JobSupervisor, SuperviseError};
pub use threads::ThreadPolicy;
pub use worker::{Worker, WorkerHandle};
