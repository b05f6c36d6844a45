//! Metadata probe collaborator.
//!
//! Reads static facts about an input file (duration, frame rate, resolution,
//! codec) through ffprobe. Encodes only need these to size their progress
//! estimates, so a failed probe degrades progress reporting rather than
//! failing the job. Joins use them to check the inputs are compatible.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe ran but reported failure.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// ffprobe could not be started.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Static metadata for one input file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container duration in seconds.
    pub duration_secs: Option<f64>,
    /// Frame rate as reported by the prober, e.g. `30000/1001`.
    pub frame_rate: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frame count stored in the container, when present.
    pub frame_count: Option<u64>,
    /// Video codec name, e.g. `h264`.
    pub codec: Option<String>,
}

/// Output resolutions offered when none is requested, HD first.
pub const STANDARD_RESOLUTIONS: [(u32, u32); 3] = [(1280, 720), (1920, 1080), (3840, 2160)];

impl MediaInfo {
    /// Parsed frame rate in frames per second.
    pub fn fps(&self) -> Option<f64> {
        self.frame_rate.as_deref().and_then(parse_frame_rate)
    }

    /// Input frame count: stored count if present, otherwise duration x fps.
    pub fn input_frames(&self) -> Option<u64> {
        if let Some(count) = self.frame_count.filter(|&c| c > 0) {
            return Some(count);
        }
        match (self.duration_secs, self.fps()) {
            (Some(duration), Some(fps)) if duration > 0.0 => Some((duration * fps).round() as u64),
            _ => None,
        }
    }

    /// Output resolution when the caller did not ask for one.
    ///
    /// Keeps the source resolution if it is one of [`STANDARD_RESOLUTIONS`],
    /// otherwise (or when unknown) picks HD.
    pub fn default_resolution(&self) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(width), Some(height)) if STANDARD_RESOLUTIONS.contains(&(width, height)) => {
                (width, height)
            }
            _ => STANDARD_RESOLUTIONS[0],
        }
    }

    /// Metadata of `parts` played back to back.
    ///
    /// Durations and frame counts add up and are unknown if any part's is.
    /// Stream properties are taken from the first part.
    pub fn concatenated(parts: &[MediaInfo]) -> MediaInfo {
        let duration_secs = parts.iter().map(|p| p.duration_secs).sum::<Option<f64>>();
        let frame_count = parts.iter().map(MediaInfo::input_frames).sum::<Option<u64>>();
        let first = parts.first().cloned().unwrap_or_default();
        MediaInfo {
            duration_secs: duration_secs.filter(|_| !parts.is_empty()),
            frame_count: frame_count.filter(|_| !parts.is_empty()),
            ..first
        }
    }
}

/// Parse `N/D` or a plain decimal frame rate. Zero or malformed rates yield `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };

    if fps.is_finite() && fps > 0.0 {
        Some(fps)
    } else {
        None
    }
}

/// Source of per-file metadata.
pub trait MetadataProbe: Send + Sync {
    fn probe(&self, path: &Path) -> impl Future<Output = Result<MediaInfo, ProbeError>> + Send;
}

/// Probe backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

impl MetadataProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}

/// Probe that answers every request with the same metadata.
///
/// Used when metadata is already known, and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub MediaInfo);

impl MetadataProbe for StaticProbe {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, ProbeError> {
        Ok(self.0.clone())
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub r_frame_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub nb_frames: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Parses ffprobe JSON output into a [`MediaInfo`].
pub fn parse_ffprobe_output(json_str: &str) -> Result<MediaInfo, ProbeError> {
    let parsed: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = parsed.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref().unwrap_or("video") == "video")
        .ok_or_else(|| ProbeError::ParseError("no video stream in ffprobe output".to_string()))?;

    // r_frame_rate is 0/0 for some containers; fall back to the average rate
    let frame_rate = [&video.r_frame_rate, &video.avg_frame_rate]
        .into_iter()
        .flatten()
        .find(|rate| parse_frame_rate(rate).is_some())
        .cloned();

    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .filter(|&n| n > 0);

    Ok(MediaInfo {
        duration_secs,
        frame_rate,
        width: video.width,
        height: video.height,
        frame_count,
        codec: video.codec_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate_variants() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("0/1"), None);
        assert_eq!(parse_frame_rate("N/A"), None);
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let json = r#"{
            "streams": [{
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "0/0",
                "avg_frame_rate": "24000/1001",
                "nb_frames": "2877"
            }],
            "format": { "duration": "120.012000" }
        }"#;

        let info = parse_ffprobe_output(json).expect("valid probe output");
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.frame_rate.as_deref(), Some("24000/1001"));
        assert_eq!(info.frame_count, Some(2877));
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert!((info.duration_secs.unwrap() - 120.012).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ffprobe_output_without_video() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3.0"}}"#;
        assert!(matches!(parse_ffprobe_output(json), Err(ProbeError::ParseError(_))));
    }

    #[test]
    fn test_parse_ffprobe_garbage() {
        assert!(parse_ffprobe_output("not json").is_err());
    }

    #[test]
    fn test_input_frames_prefers_stored_count() {
        let info = MediaInfo {
            duration_secs: Some(10.0),
            frame_rate: Some("30/1".to_string()),
            frame_count: Some(299),
            ..MediaInfo::default()
        };
        assert_eq!(info.input_frames(), Some(299));

        let info = MediaInfo {
            frame_count: None,
            ..info
        };
        assert_eq!(info.input_frames(), Some(300));
    }

    #[test]
    fn test_default_resolution_keeps_standard_sizes_only() {
        let sized = |width, height| MediaInfo {
            width: Some(width),
            height: Some(height),
            ..MediaInfo::default()
        };
        assert_eq!(sized(1920, 1080).default_resolution(), (1920, 1080));
        assert_eq!(sized(3840, 2160).default_resolution(), (3840, 2160));
        assert_eq!(sized(1280, 720).default_resolution(), (1280, 720));
        assert_eq!(sized(720, 480).default_resolution(), (1280, 720));
        assert_eq!(MediaInfo::default().default_resolution(), (1280, 720));
    }

    #[test]
    fn test_concatenated_sums_lengths() {
        let part = MediaInfo {
            duration_secs: Some(10.0),
            frame_rate: Some("25/1".to_string()),
            codec: Some("h264".to_string()),
            ..MediaInfo::default()
        };
        let joined = MediaInfo::concatenated(&[part.clone(), part.clone()]);
        assert_eq!(joined.duration_secs, Some(20.0));
        assert_eq!(joined.frame_count, Some(500));
        assert_eq!(joined.codec.as_deref(), Some("h264"));

        let unknown = MediaInfo::concatenated(&[part, MediaInfo::default()]);
        assert_eq!(unknown.duration_secs, None);
        assert_eq!(unknown.frame_count, None);
        assert_eq!(MediaInfo::concatenated(&[]), MediaInfo::default());
    }

    #[tokio::test]
    async fn test_missing_ffprobe_binary_is_io_error() {
        let probe = FfprobeProbe::new("/nonexistent/bin/ffprobe-for-tests");
        let result = probe.probe(Path::new("whatever.mp4")).await;
        assert!(matches!(result, Err(ProbeError::Io(_))));
    }
}
