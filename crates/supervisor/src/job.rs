//! Job model: the immutable transcode request and its lifecycle status.

use crate::config::QualityConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Invariant violations detected before a job is accepted.
#[derive(Debug, Error, PartialEq)]
pub enum JobSpecError {
    #[error("target resolution must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("quality {value} is outside the accepted range [{min}, {max}]")]
    QualityOutOfBounds { value: u32, min: u32, max: u32 },

    #[error("output path is the same as the input path: {0}")]
    OutputIsInput(PathBuf),

    #[error("target frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),
}

/// Encoder backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Software encoding.
    Cpu,
    /// Hardware-accelerated encoding.
    Gpu,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
            Backend::Gpu => write!(f, "gpu"),
        }
    }
}

/// Encoder speed tier, slowest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub const ALL: [Preset; 9] = [
        Preset::Ultrafast,
        Preset::Superfast,
        Preset::Veryfast,
        Preset::Faster,
        Preset::Fast,
        Preset::Medium,
        Preset::Slow,
        Preset::Slower,
        Preset::Veryslow,
    ];

    /// Name understood by the software encoder.
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }

    /// Closest tier supported by the hardware encoder (fast/medium/slow).
    pub fn hardware_tier(&self) -> &'static str {
        match self {
            Preset::Ultrafast
            | Preset::Superfast
            | Preset::Veryfast
            | Preset::Faster
            | Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow | Preset::Slower | Preset::Veryslow => "slow",
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Preset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

/// Immutable description of one transcode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Constant-quality value (CRF on CPU, CQ on GPU).
    pub quality: u32,
    pub preset: Preset,
    /// Requested output frame rate; `None` keeps the source rate.
    pub target_fps: Option<f64>,
    /// Encoder threads, 0 lets the tool decide.
    pub threads: u32,
    pub backend: Backend,
}

impl JobSpec {
    /// Check the invariants every queued or supervised job must satisfy.
    pub fn validate(&self, bounds: &QualityConfig) -> Result<(), JobSpecError> {
        if self.width == 0 || self.height == 0 {
            return Err(JobSpecError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }

        if !bounds.contains(self.quality) {
            return Err(JobSpecError::QualityOutOfBounds {
                value: self.quality,
                min: bounds.min,
                max: bounds.max,
            });
        }

        if self.output_path == self.input_path {
            return Err(JobSpecError::OutputIsInput(self.output_path.clone()));
        }

        if let Some(fps) = self.target_fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(JobSpecError::InvalidFrameRate(fps));
            }
        }

        Ok(())
    }

    /// Copy of this spec re-targeted at the software encoder.
    ///
    /// Thread count resets to 0 since the GPU job never carried a CPU thread budget.
    pub fn as_cpu_fallback(&self) -> JobSpec {
        JobSpec {
            backend: Backend::Cpu,
            threads: 0,
            ..self.clone()
        }
    }
}

/// Lifecycle status of a job inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Processing => write!(f, "Processing"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Error => write!(f, "Error"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}
