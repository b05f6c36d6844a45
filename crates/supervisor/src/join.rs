//! Lossless joining of several videos into one.
//!
//! Inputs are stream-copied through the concat demuxer, so they must share
//! codec, resolution and frame rate. The join itself runs under
//! [`JobSupervisor::join`](crate::supervisor::JobSupervisor::join) with the
//! same progress, cancellation and cleanup handling as an encode.

use crate::probe::{MediaInfo, ProbeError};
use crate::scan::collect_inputs;
use crate::supervisor::SuperviseError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the joined video.
pub const JOINED_OUTPUT_NAME: &str = "joined_output.mp4";

/// File name of the concat demuxer list, written next to the output.
pub const CONCAT_LIST_NAME: &str = "concat_list.txt";

/// Tolerance when comparing frame rates given in different notations.
const FPS_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("need at least two videos to join, got {0}")]
    TooFewInputs(usize),

    #[error("output path is also an input: {}", .0.display())]
    OutputIsInput(PathBuf),

    #[error("could not read stream info for {}: {source}", .path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: ProbeError,
    },

    #[error("{} does not match {} ({reason})", .path.display(), .reference.display())]
    Incompatible {
        path: PathBuf,
        reference: PathBuf,
        reason: String,
    },

    #[error("could not write concat list {}: {source}", .path.display())]
    ConcatList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Supervise(#[from] SuperviseError),
}

/// Request to join `inputs`, in order, into `output_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub inputs: Vec<PathBuf>,
    pub output_path: PathBuf,
}

impl JoinSpec {
    /// Join into [`JOINED_OUTPUT_NAME`] inside `output_dir`, or next to the
    /// first input when no directory is given.
    ///
    /// A previous join result at that path is dropped from the inputs.
    pub fn new(inputs: Vec<PathBuf>, output_dir: Option<&Path>) -> Self {
        let dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| inputs.first().and_then(|p| p.parent()).map(Path::to_path_buf))
            .unwrap_or_default();
        let output_path = dir.join(JOINED_OUTPUT_NAME);
        let inputs = inputs.into_iter().filter(|p| *p != output_path).collect();
        Self {
            inputs,
            output_path,
        }
    }

    /// Every video directly inside `folder`, sorted by name.
    pub fn from_folder(folder: &Path) -> std::io::Result<Self> {
        Ok(Self::new(collect_inputs(folder)?, Some(folder)))
    }

    pub fn validate(&self) -> Result<(), JoinError> {
        if self.inputs.len() < 2 {
            return Err(JoinError::TooFewInputs(self.inputs.len()));
        }
        if self.inputs.contains(&self.output_path) {
            return Err(JoinError::OutputIsInput(self.output_path.clone()));
        }
        Ok(())
    }

    /// Where the concat list for this join is written.
    pub fn list_path(&self) -> PathBuf {
        self.output_path
            .parent()
            .map(|dir| dir.join(CONCAT_LIST_NAME))
            .unwrap_or_else(|| PathBuf::from(CONCAT_LIST_NAME))
    }
}

/// Ensure every input can be stream-copied after the first one.
///
/// `infos[i]` is the probe result for `inputs[i]`.
pub fn check_compatibility(inputs: &[PathBuf], infos: &[MediaInfo]) -> Result<(), JoinError> {
    let (Some(reference_path), Some(reference)) = (inputs.first(), infos.first()) else {
        return Ok(());
    };

    for (path, info) in inputs.iter().zip(infos).skip(1) {
        if let Some(reason) = mismatch(reference, info) {
            return Err(JoinError::Incompatible {
                path: path.clone(),
                reference: reference_path.clone(),
                reason,
            });
        }
    }
    Ok(())
}

fn mismatch(reference: &MediaInfo, other: &MediaInfo) -> Option<String> {
    if reference.codec != other.codec {
        return Some(format!(
            "codec {} vs {}",
            other.codec.as_deref().unwrap_or("unknown"),
            reference.codec.as_deref().unwrap_or("unknown")
        ));
    }
    if (reference.width, reference.height) != (other.width, other.height) {
        return Some(format!(
            "resolution {} vs {}",
            describe_size(other),
            describe_size(reference)
        ));
    }
    let same_rate = match (reference.fps(), other.fps()) {
        (Some(a), Some(b)) => (a - b).abs() < FPS_TOLERANCE,
        (None, None) => true,
        _ => false,
    };
    if !same_rate {
        return Some(format!(
            "frame rate {} vs {}",
            other.frame_rate.as_deref().unwrap_or("unknown"),
            reference.frame_rate.as_deref().unwrap_or("unknown")
        ));
    }
    None
}

fn describe_size(info: &MediaInfo) -> String {
    match (info.width, info.height) {
        (Some(w), Some(h)) => format!("{}x{}", w, h),
        _ => "unknown".to_string(),
    }
}

/// Concat demuxer list naming every input by absolute path.
///
/// Single quotes are escaped as `'\''`, the demuxer's quoting rule.
pub fn concat_list(inputs: &[PathBuf]) -> std::io::Result<Vec<u8>> {
    let cwd = std::env::current_dir()?;
    let mut list = Vec::new();
    for input in inputs {
        let absolute = if input.is_absolute() {
            input.clone()
        } else {
            cwd.join(input)
        };
        list.extend_from_slice(b"file '");
        for &byte in path_bytes(&absolute).iter() {
            if byte == b'\'' {
                list.extend_from_slice(b"'\\''");
            } else {
                list.push(byte);
            }
        }
        list.extend_from_slice(b"'\n");
    }
    Ok(list)
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    // the demuxer accepts forward slashes everywhere
    path.to_string_lossy().replace('\\', "/").into_bytes()
}

/// Write the concat list for `spec` to [`JoinSpec::list_path`].
pub(crate) async fn write_concat_list(spec: &JoinSpec) -> Result<PathBuf, JoinError> {
    let path = spec.list_path();
    let write = async {
        let list = concat_list(&spec.inputs)?;
        tokio::fs::write(&path, list).await
    };
    match write.await {
        Ok(()) => Ok(path),
        Err(source) => Err(JoinError::ConcatList { path, source }),
    }
}
