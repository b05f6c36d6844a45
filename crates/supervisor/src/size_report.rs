//! Size Report Module
//!
//! Post-encode comparison of input and output file sizes, for display only.

use humansize::{format_size, DECIMAL};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Input/output size comparison for a finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeReport {
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Relative change in percent; negative means the output is smaller.
    pub change_percent: f64,
}

impl SizeReport {
    pub fn new(input_bytes: u64, output_bytes: u64) -> Self {
        let change_percent = if input_bytes > 0 {
            (output_bytes as f64 - input_bytes as f64) / input_bytes as f64 * 100.0
        } else {
            0.0
        };
        Self {
            input_bytes,
            output_bytes,
            change_percent,
        }
    }

    /// Read both sizes from disk. Returns `None` if either file is unreadable.
    pub fn from_files(input: &Path, output: &Path) -> Option<Self> {
        let input_bytes = std::fs::metadata(input).ok()?.len();
        let output_bytes = std::fs::metadata(output).ok()?.len();
        Some(Self::new(input_bytes, output_bytes))
    }
}

impl std::fmt::Display for SizeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Size: {} -> {} ({:+.1}%)",
            format_size(self.input_bytes, DECIMAL),
            format_size(self.output_bytes, DECIMAL),
            self.change_percent
        )
    }
}
