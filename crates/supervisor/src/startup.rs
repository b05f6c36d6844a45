//! Startup checks
//!
//! Preflight checks run before a batch is accepted:
//! - the encoder binary exists and reports a parseable version
//! - the prober binary exists (optional: progress totals degrade without it)
//! - whether the configured hardware codec is compiled into the encoder

use crate::config::Config;
use log::{info, warn};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Could not parse {tool} version from output: {first_line}")]
    UnparseableVersion { tool: String, first_line: String },
}

/// Outcome of [`run_startup_checks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub encoder_major: u32,
    /// `None` when the prober is missing.
    pub prober_major: Option<u32>,
    pub gpu_encoder_available: bool,
}

/// Extract the major version from `<tool> -version` output.
///
/// Handles `ffmpeg version 7.1.2 ...`, `ffprobe version n8.0-5-gabc ...`
/// and distribution suffixes such as `6.1.1-3ubuntu5`.
pub fn parse_tool_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains(" version "))?;

    let lower = version_line.to_lowercase();
    let version_part = lower.split(" version ").nth(1)?.split_whitespace().next()?;

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Run `<bin> -version` and return the major version.
pub fn check_tool_available(bin: &Path) -> Result<u32, StartupError> {
    let tool = bin.display().to_string();
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!(
                "failed to run '{} -version'; is it installed and in PATH? Error: {}",
                tool, e
            ),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            reason: format!("'{} -version' exited with {}", tool, output.status),
            tool,
        });
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    parse_tool_version(&version_output).ok_or_else(|| StartupError::UnparseableVersion {
        first_line: version_output.lines().next().unwrap_or("(empty)").to_string(),
        tool,
    })
}

/// Whether `codec` appears as an encoder name in `-encoders` output.
///
/// Encoder lines look like ` V....D h264_nvenc   NVIDIA NVENC H.264 encoder`.
pub fn encoder_listed(encoders_output: &str, codec: &str) -> bool {
    encoders_output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == codec)
}

/// Run `<bin> -hide_banner -encoders` and report whether `codec` is built in.
pub fn detect_gpu_encoder(bin: &Path, codec: &str) -> Result<bool, StartupError> {
    let output = Command::new(bin)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            tool: bin.display().to_string(),
            reason: e.to_string(),
        })?;

    let listing = String::from_utf8_lossy(&output.stdout);
    Ok(encoder_listed(&listing, codec))
}

/// Run all startup checks in order
///
/// 1. Encoder availability and version (fatal)
/// 2. Prober availability (warning only)
/// 3. Hardware codec presence (informational)
pub fn run_startup_checks(cfg: &Config) -> Result<StartupReport, StartupError> {
    let encoder_major = check_tool_available(&cfg.tool.ffmpeg_bin)?;
    info!(
        "Encoder {} found (major version {})",
        cfg.tool.ffmpeg_bin.display(),
        encoder_major
    );

    let prober_major = match check_tool_available(&cfg.tool.ffprobe_bin) {
        Ok(major) => Some(major),
        Err(e) => {
            warn!("{}; progress totals will be unavailable", e);
            None
        }
    };

    let gpu_encoder_available = detect_gpu_encoder(&cfg.tool.ffmpeg_bin, &cfg.encoder.gpu_codec)?;
    if !gpu_encoder_available {
        info!(
            "Hardware codec {} is not available; GPU jobs will fall back to {}",
            cfg.encoder.gpu_codec, cfg.encoder.cpu_codec
        );
    }

    Ok(StartupReport {
        encoder_major,
        prober_major,
        gpu_encoder_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_parsing_standard(
            tool in prop::sample::select(vec!["ffmpeg", "ffprobe"]),
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "{} version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                tool, major, minor, patch
            );
            prop_assert_eq!(parse_tool_version(&version_output), Some(major));
        }

        #[test]
        fn prop_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_tool_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_parse_distribution_suffix() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc 13";
        assert_eq!(parse_tool_version(output), Some(6));
    }

    #[test]
    fn test_parse_version_invalid() {
        assert_eq!(parse_tool_version("not a tool"), None);
        assert_eq!(parse_tool_version(""), None);
        assert_eq!(parse_tool_version("ffmpeg version git-2024 Copyright"), None);
    }

    #[test]
    fn test_encoder_listing() {
        let listing = concat!(
            "Encoders:\n",
            " V..... = Video\n",
            " ------\n",
            " V....D libx264              libx264 H.264\n",
            " V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)\n",
            " A....D aac                  AAC (Advanced Audio Coding)\n",
        );
        assert!(encoder_listed(listing, "h264_nvenc"));
        assert!(encoder_listed(listing, "libx264"));
        assert!(!encoder_listed(listing, "hevc_nvenc"));
        assert!(!encoder_listed(listing, "NVIDIA"));
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let result = check_tool_available(Path::new("/nonexistent/transcode-tool"));
        assert!(matches!(result, Err(StartupError::ToolUnavailable { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_startup_checks_with_fake_tools() {
        use crate::test_support::write_script;

        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            r#"case "$*" in
  *-encoders*) echo " V....D libx264   libx264 H.264" ;;
  *) echo "ffmpeg version 7.0.1 Copyright (c) 2000-2024" ;;
esac"#,
        );

        let mut cfg = Config::default();
        cfg.tool.ffmpeg_bin = ffmpeg;
        cfg.tool.ffprobe_bin = dir.path().join("missing-ffprobe");

        let report = run_startup_checks(&cfg).expect("encoder present");
        assert_eq!(
            report,
            StartupReport {
                encoder_major: 7,
                prober_major: None,
                gpu_encoder_available: false,
            }
        );
    }
}
