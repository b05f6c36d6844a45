//! ffmpeg command builder
//!
//! Turns a [`JobSpec`] into the argument vector for one encoder invocation.
//! Both backends write structured progress to stdout (`-progress pipe:1`)
//! and suppress the periodic human-readable statistics on stderr.

use crate::config::EncoderConfig;
use crate::job::{Backend, JobSpec};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Where the structured `key=value` progress blocks are written
pub const PROGRESS_TARGET: &str = "pipe:1";

/// Build the argument vector (program name excluded) for `spec`.
///
/// Pure and deterministic: the same spec and encoder settings always
/// produce the same vector. No validation happens here; callers are
/// expected to have run [`JobSpec::validate`]. Paths are passed through
/// untouched, so non-UTF-8 file names reach the encoder intact.
pub fn build_args(spec: &JobSpec, encoder: &EncoderConfig) -> Vec<OsString> {
    match spec.backend {
        Backend::Cpu => build_cpu_args(spec, encoder),
        Backend::Gpu => build_gpu_args(spec, encoder),
    }
}

fn build_cpu_args(spec: &JobSpec, encoder: &EncoderConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(28);

    args.push("-hide_banner".into());
    push_input(&mut args, &spec.input_path);
    args.push("-vf".into());
    args.push(format!("scale={}:{}", spec.width, spec.height).into());

    args.push("-c:v".into());
    args.push(encoder.cpu_codec.as_str().into());

    // 0 means the encoder picks its own thread count
    if spec.threads > 0 {
        args.push("-threads".into());
        args.push(spec.threads.to_string().into());
    }

    args.push("-crf".into());
    args.push(spec.quality.to_string().into());
    args.push("-preset".into());
    args.push(spec.preset.as_str().into());

    push_tail(&mut args, spec, encoder);
    args
}

fn build_gpu_args(spec: &JobSpec, encoder: &EncoderConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(32);
    let nvenc = encoder.gpu_codec.contains("nvenc");

    args.push("-hide_banner".into());
    args.push("-hwaccel".into());
    args.push(encoder.hwaccel.as_str().into());
    args.push("-hwaccel_device".into());
    args.push(encoder.gpu_device.to_string().into());
    if nvenc {
        // Keep decoded frames on the device so scale_cuda can consume them
        args.push("-hwaccel_output_format".into());
        args.push(encoder.hwaccel.as_str().into());
    }

    push_input(&mut args, &spec.input_path);

    let scale_filter = if nvenc { "scale_cuda" } else { "scale" };
    args.push("-vf".into());
    args.push(format!("{}={}:{}", scale_filter, spec.width, spec.height).into());

    args.push("-c:v".into());
    args.push(encoder.gpu_codec.as_str().into());
    args.push("-preset".into());
    args.push(spec.preset.hardware_tier().into());
    args.push("-rc".into());
    args.push("vbr".into());
    args.push("-cq".into());
    args.push(spec.quality.to_string().into());

    push_tail(&mut args, spec, encoder);
    args
}

fn push_input(args: &mut Vec<OsString>, input: &Path) {
    args.push("-i".into());
    args.push(input.as_os_str().to_os_string());
}

/// Frame rate, audio, progress reporting, overwrite and output path.
fn push_tail(args: &mut Vec<OsString>, spec: &JobSpec, encoder: &EncoderConfig) {
    if let Some(fps) = spec.target_fps {
        args.push("-r".into());
        args.push(fps.to_string().into());
    }

    args.push("-c:a".into());
    args.push(encoder.audio_codec.as_str().into());
    args.push("-b:a".into());
    args.push(encoder.audio_bitrate.as_str().into());

    push_progress_and_output(args, &spec.output_path);
}

/// Progress reporting, overwrite and the output path; shared by every invocation.
pub(crate) fn push_progress_and_output(args: &mut Vec<OsString>, output: &Path) {
    args.push("-progress".into());
    args.push(PROGRESS_TARGET.into());
    args.push("-nostats".into());
    args.push("-y".into());
    args.push(output.as_os_str().to_os_string());
}

/// Build a ready-to-spawn command with stdin/stdout/stderr piped.
///
/// stdin stays open so the supervisor can ask the encoder to quit.
pub fn build_command(program: &Path, spec: &JobSpec, encoder: &EncoderConfig) -> Command {
    piped_command(program, build_args(spec, encoder))
}

pub(crate) fn piped_command(program: &Path, args: Vec<OsString>) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Preset;
    use proptest::prelude::*;
    use std::path::PathBuf;

    /// Flags that only ever appear on hardware-accelerated invocations
    const HWACCEL_FLAGS: &[&str] = &["-hwaccel", "-hwaccel_device", "-hwaccel_output_format"];

    /// Arguments as strings; every test path here is UTF-8.
    fn args_of(spec: &JobSpec, encoder: &EncoderConfig) -> Vec<String> {
        build_args(spec, encoder)
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn count_flag(args: &[String], flag: &str) -> usize {
        args.iter().filter(|arg| arg.as_str() == flag).count()
    }

    fn preset_strategy() -> impl Strategy<Value = Preset> {
        prop::sample::select(Preset::ALL.to_vec())
    }

    fn spec_strategy() -> impl Strategy<Value = JobSpec> {
        (
            prop::string::string_regex("[a-zA-Z0-9_/.-]{1,40}").unwrap(),
            1u32..8192,
            1u32..8192,
            17u32..=30,
            preset_strategy(),
            proptest::option::of(prop::sample::select(vec![12.0, 23.976, 24.0, 25.0, 30.0, 60.0])),
            0u32..64,
            proptest::bool::ANY,
        )
            .prop_map(|(name, width, height, quality, preset, target_fps, threads, gpu)| JobSpec {
                input_path: PathBuf::from(format!("in/{}", name)),
                output_path: PathBuf::from(format!("out/{}", name)),
                width,
                height,
                quality,
                preset,
                target_fps,
                threads,
                backend: if gpu { Backend::Gpu } else { Backend::Cpu },
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_backend_flags_are_exclusive(spec in spec_strategy()) {
            let encoder = EncoderConfig::default();
            let args = args_of(&spec, &encoder);

            match spec.backend {
                Backend::Cpu => {
                    prop_assert!(has_flag_with_value(&args, "-c:v", &encoder.cpu_codec));
                    prop_assert!(!args.contains(&encoder.gpu_codec));
                    for flag in HWACCEL_FLAGS {
                        prop_assert!(!has_flag(&args, flag), "CPU args: {:?}", args);
                    }
                }
                Backend::Gpu => {
                    prop_assert!(has_flag_with_value(&args, "-c:v", &encoder.gpu_codec));
                    prop_assert!(!args.contains(&encoder.cpu_codec));
                    prop_assert!(has_flag_with_value(&args, "-hwaccel", &encoder.hwaccel));
                    prop_assert!(has_flag(&args, "-hwaccel_device"));
                }
            }
        }

        #[test]
        fn prop_exactly_one_quality_flag(spec in spec_strategy()) {
            let args = args_of(&spec, &EncoderConfig::default());
            let (flag, other) = match spec.backend {
                Backend::Cpu => ("-crf", "-cq"),
                Backend::Gpu => ("-cq", "-crf"),
            };

            prop_assert_eq!(count_flag(&args, flag), 1);
            prop_assert_eq!(count_flag(&args, other), 0);
            prop_assert!(has_flag_with_value(&args, flag, &spec.quality.to_string()));
        }

        #[test]
        fn prop_progress_and_overwrite_always_requested(spec in spec_strategy()) {
            let args = args_of(&spec, &EncoderConfig::default());

            prop_assert!(has_flag_with_value(&args, "-progress", PROGRESS_TARGET));
            prop_assert!(has_flag(&args, "-nostats"));
            prop_assert_eq!(args.first().map(String::as_str), Some("-hide_banner"));
            prop_assert!(has_flag(&args, "-y"));
            let output = spec.output_path.to_string_lossy().into_owned();
            prop_assert_eq!(args.last(), Some(&output));
            prop_assert_eq!(has_flag(&args, "-r"), spec.target_fps.is_some());
        }

        #[test]
        fn prop_build_is_deterministic(spec in spec_strategy()) {
            let encoder = EncoderConfig::default();
            prop_assert_eq!(build_args(&spec, &encoder), build_args(&spec, &encoder));
        }
    }

    #[test]
    fn test_cpu_threads_only_when_nonzero() {
        let mut spec = crate::job::tests::sample_spec(Backend::Cpu);
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(!has_flag(&args, "-threads"));

        spec.threads = 4;
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(has_flag_with_value(&args, "-threads", "4"));
    }

    #[test]
    fn test_gpu_ignores_thread_count() {
        let mut spec = crate::job::tests::sample_spec(Backend::Gpu);
        spec.threads = 8;
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(!has_flag(&args, "-threads"));
    }

    #[test]
    fn test_gpu_preset_is_remapped() {
        let mut spec = crate::job::tests::sample_spec(Backend::Gpu);
        spec.preset = Preset::Veryslow;
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(has_flag_with_value(&args, "-preset", "slow"));
        assert!(!args.iter().any(|a| a == "veryslow"));
    }

    #[test]
    fn test_nvenc_uses_cuda_scaler() {
        let spec = crate::job::tests::sample_spec(Backend::Gpu);
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(has_flag_with_value(&args, "-vf", "scale_cuda=1280:720"));
        assert!(has_flag_with_value(&args, "-hwaccel_output_format", "cuda"));
    }

    #[test]
    fn test_non_nvenc_hardware_codec_uses_plain_scaler() {
        let spec = crate::job::tests::sample_spec(Backend::Gpu);
        let encoder = EncoderConfig {
            gpu_codec: "h264_qsv".to_string(),
            hwaccel: "qsv".to_string(),
            ..EncoderConfig::default()
        };
        let args = args_of(&spec, &encoder);
        assert!(has_flag_with_value(&args, "-vf", "scale=1280:720"));
        assert!(!has_flag(&args, "-hwaccel_output_format"));
    }

    #[test]
    fn test_frame_rate_flag_formatting() {
        let mut spec = crate::job::tests::sample_spec(Backend::Cpu);
        spec.target_fps = Some(30.0);
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(has_flag_with_value(&args, "-r", "30"));

        spec.target_fps = Some(23.976);
        let args = args_of(&spec, &EncoderConfig::default());
        assert!(has_flag_with_value(&args, "-r", "23.976"));
    }

    #[test]
    fn test_build_command_program_and_args() {
        let spec = crate::job::tests::sample_spec(Backend::Cpu);
        let cmd = build_command(Path::new("/usr/bin/ffmpeg"), &spec, &EncoderConfig::default());
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), std::ffi::OsStr::new("/usr/bin/ffmpeg"));
        let args: Vec<OsString> = std_cmd.get_args().map(|arg| arg.to_os_string()).collect();
        assert_eq!(args, build_args(&spec, &EncoderConfig::default()));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_pass_through_unchanged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let input = PathBuf::from(OsStr::from_bytes(b"/videos/caf\xe9.mp4"));
        let output = PathBuf::from(OsStr::from_bytes(b"/videos/caf\xe9_1280x720.mp4"));
        for backend in [Backend::Cpu, Backend::Gpu] {
            let spec = JobSpec {
                input_path: input.clone(),
                output_path: output.clone(),
                ..crate::job::tests::sample_spec(backend)
            };
            let args = build_args(&spec, &EncoderConfig::default());

            let input_at = args.iter().position(|arg| arg == "-i").expect("-i flag");
            assert_eq!(args[input_at + 1].as_os_str(), input.as_os_str());
            assert_eq!(args.last().map(OsString::as_os_str), Some(output.as_os_str()));
        }
    }
}
