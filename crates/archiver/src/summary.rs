//! Run summary reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Counts for one pipeline run, serializable for `--summary-json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub source_root: PathBuf,
    pub archive_root: PathBuf,
    pub dry_run: bool,
    pub assets_copied: usize,
    pub assets_skipped_existing: usize,
    pub assets_suppressed: usize,
    pub assets_failed: usize,
    pub bytes_copied: u64,
    pub media_already_valid: usize,
    pub media_rendered: usize,
    pub media_failed: usize,
    pub media_conflicts: usize,
    pub excluded: usize,
    /// Relative paths of assets and media that did not make it into the archive.
    pub failures: Vec<FailureRecord>,
}

/// One file that failed, with the logged reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub relative: PathBuf,
    pub reason: String,
}

impl RunSummary {
    /// True when every asset and media file reached the archive.
    pub fn is_clean(&self) -> bool {
        self.assets_failed == 0 && self.media_failed == 0 && self.media_conflicts == 0
    }

    /// Number of copy and render operations actually performed.
    pub fn work_done(&self) -> usize {
        self.assets_copied + self.media_rendered
    }
}

/// Formats a byte count with binary units, e.g. `1,536` -> `"1.50 KB"`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
