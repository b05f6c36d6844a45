//! Input discovery and output naming for batch intake.
//!
//! Lists the video files in a folder (non-recursive) and derives a
//! deterministic output path for each one, so that submitting the same
//! folder twice yields the same job specs.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions accepted for intake (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".flv", ".wmv"];

/// Container extension written by every job.
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Lists the video files directly inside `dir`, sorted by path.
///
/// Hidden files and subdirectories are ignored. Unreadable entries are
/// logged and skipped.
pub fn collect_inputs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", dir.display()),
        ));
    }

    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false);
        if hidden || !is_video_file(entry.path()) {
            debug!("Ignoring {}", entry.path().display());
            continue;
        }
        inputs.push(entry.into_path());
    }

    inputs.sort();
    Ok(inputs)
}

/// Output path for `input`: `<stem>_<W>x<H>_q<quality>_<preset>.mp4`,
/// placed in `output_dir` or next to the input.
pub fn output_path_for(
    input: &Path,
    output_dir: Option<&Path>,
    width: u32,
    height: u32,
    quality: u32,
    preset: &str,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let file_name = format!(
        "{}_{}x{}_q{}_{}.{}",
        stem, width, height, quality, preset, OUTPUT_EXTENSION
    );

    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(file_name)
}
