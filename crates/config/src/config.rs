//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Values parsed but violate a cross-field invariant
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Locations of the external encoder and prober binaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,
}

fn default_ffmpeg_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_bin() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
        }
    }
}

/// Codec selection for both encoder backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Software video codec used by the CPU backend
    #[serde(default = "default_cpu_codec")]
    pub cpu_codec: String,
    /// Hardware video codec used by the GPU backend
    #[serde(default = "default_gpu_codec")]
    pub gpu_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Value passed to `-hwaccel` for GPU jobs
    #[serde(default = "default_hwaccel")]
    pub hwaccel: String,
    /// Device index passed to `-hwaccel_device` for GPU jobs
    #[serde(default)]
    pub gpu_device: u32,
}

fn default_cpu_codec() -> String {
    "libx264".to_string()
}

fn default_gpu_codec() -> String {
    "h264_nvenc".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_hwaccel() -> String {
    "cuda".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            cpu_codec: default_cpu_codec(),
            gpu_codec: default_gpu_codec(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            hwaccel: default_hwaccel(),
            gpu_device: 0,
        }
    }
}

/// Accepted range for the constant-quality parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    #[serde(default = "default_quality_min")]
    pub min: u32,
    #[serde(default = "default_quality_max")]
    pub max: u32,
    #[serde(default = "default_quality")]
    pub default: u32,
}

fn default_quality_min() -> u32 {
    17
}

fn default_quality_max() -> u32 {
    30
}

fn default_quality() -> u32 {
    26
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min: default_quality_min(),
            max: default_quality_max(),
            default: default_quality(),
        }
    }
}

impl QualityConfig {
    /// Whether `value` lies inside the inclusive `[min, max]` range
    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Tuning knobs for a running job supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisionConfig {
    /// Grace period between the quit request and a force kill
    #[serde(default = "default_termination_timeout_secs")]
    pub termination_timeout_secs: u64,
    /// Idle tick on which the cancellation flag is re-checked
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,
    /// Number of samples kept by the throughput window
    #[serde(default = "default_progress_window")]
    pub progress_window: usize,
    /// Throughput is recomputed once every this many samples
    #[serde(default = "default_recompute_every")]
    pub recompute_every: usize,
    /// Warning lines shown after a successful job
    #[serde(default = "default_warning_preview")]
    pub warning_preview: usize,
}

fn default_termination_timeout_secs() -> u64 {
    5
}

fn default_cancel_poll_interval_ms() -> u64 {
    250
}

fn default_progress_window() -> usize {
    50
}

fn default_recompute_every() -> usize {
    5
}

fn default_warning_preview() -> usize {
    5
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            termination_timeout_secs: default_termination_timeout_secs(),
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
            progress_window: default_progress_window(),
            recompute_every: default_recompute_every(),
            warning_preview: default_warning_preview(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if q.min > q.max {
            return Err(ConfigError::Invalid(format!(
                "quality.min ({}) is greater than quality.max ({})",
                q.min, q.max
            )));
        }
        if !q.contains(q.default) {
            return Err(ConfigError::Invalid(format!(
                "quality.default ({}) is outside [{}, {}]",
                q.default, q.min, q.max
            )));
        }
        if self.supervision.progress_window == 0 {
            return Err(ConfigError::Invalid(
                "supervision.progress_window must be at least 1".to_string(),
            ));
        }
        if self.supervision.recompute_every == 0 {
            return Err(ConfigError::Invalid(
                "supervision.recompute_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - TRANSCODE_FFMPEG_BIN -> tool.ffmpeg_bin
    /// - TRANSCODE_FFPROBE_BIN -> tool.ffprobe_bin
    /// - TRANSCODE_GPU_DEVICE -> encoder.gpu_device
    /// - TRANSCODE_TERMINATION_TIMEOUT_SECS -> supervision.termination_timeout_secs
    /// - TRANSCODE_QUALITY_MIN -> quality.min
    /// - TRANSCODE_QUALITY_MAX -> quality.max
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("TRANSCODE_FFMPEG_BIN") {
            if !val.trim().is_empty() {
                self.tool.ffmpeg_bin = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TRANSCODE_FFPROBE_BIN") {
            if !val.trim().is_empty() {
                self.tool.ffprobe_bin = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("TRANSCODE_GPU_DEVICE") {
            if let Ok(device) = val.parse::<u32>() {
                self.encoder.gpu_device = device;
            }
        }

        if let Ok(val) = env::var("TRANSCODE_TERMINATION_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.supervision.termination_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("TRANSCODE_QUALITY_MIN") {
            if let Ok(min) = val.parse::<u32>() {
                self.quality.min = min;
            }
        }

        if let Ok(val) = env::var("TRANSCODE_QUALITY_MAX") {
            if let Ok(max) = val.parse::<u32>() {
                self.quality.max = max;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
