//! Advisory start-timecode comparison between a source and its render.

use serde::Serialize;

/// Result of comparing source and output start timecodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum TimecodeCheck {
    /// Source has no timecode, or the output container has no timecode tag.
    NotApplicable,
    Match { timecode: String },
    Mismatch { source: String, output: String },
    /// Source has a timecode but none could be read from the output.
    Unreadable { source: String },
}

/// Containers whose muxers write a start timecode tag.
const TIMECODE_CONTAINERS: &[&str] = &["mp4", "mov", "m4v", "mxf"];

/// Checks if an output container extension carries a timecode tag.
pub fn supports_timecode_tag(extension: &str) -> bool {
    let ext = extension.trim_start_matches('.').to_lowercase();
    TIMECODE_CONTAINERS.contains(&ext.as_str())
}

/// Replaces drop-frame separators (`;` and `.`) with `:`.
///
/// Probe tools commonly report `01:00:00;00` from the camera file and
/// `01:00:00:00` from the render, so both sides are normalized first.
pub fn normalize_timecode(timecode: &str) -> String {
    timecode
        .trim()
        .chars()
        .map(|c| if c == ';' || c == '.' { ':' } else { c })
        .collect()
}

/// Compares the source timecode with the one read back from the output.
pub fn compare_timecodes(source: Option<&str>, output: Option<&str>) -> TimecodeCheck {
    let source = match source.map(str::trim).filter(|s| !s.is_empty()) {
        Some(tc) => normalize_timecode(tc),
        None => return TimecodeCheck::NotApplicable,
    };

    match output.map(str::trim).filter(|s| !s.is_empty()) {
        None => TimecodeCheck::Unreadable { source },
        Some(out) => {
            let output = normalize_timecode(out);
            if output == source {
                TimecodeCheck::Match { timecode: output }
            } else {
                TimecodeCheck::Mismatch { source, output }
            }
        }
    }
}
