//! Setup checks run before any file is touched.
//!
//! A failure here is fatal for the run:
//! - the render tool must be resolvable and runnable
//! - the configured encoders must be compiled into it
//! - the correction preset, when configured, must exist

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Error types for setup checks
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("No decode probe available: neither {ffprobe} nor {ffmpeg} found on PATH")]
    NoProbeTool { ffprobe: String, ffmpeg: String },

    #[error("Encoder not available: {0}")]
    EncoderUnavailable(String),

    #[error("Correction preset missing: {}", .0.display())]
    MissingPreset(PathBuf),

    #[error("Render capability unreachable: {0}")]
    Unreachable(String),
}

/// Resolves a tool name or path to an executable.
///
/// Bare names are looked up on `PATH`; anything with a separator is checked
/// as given.
pub fn resolve_tool(tool: &Path) -> Result<PathBuf, SetupError> {
    which::which(tool).map_err(|e| SetupError::ToolUnavailable {
        tool: tool.display().to_string(),
        reason: e.to_string(),
    })
}

/// Like [`resolve_tool`], but `None` instead of an error.
pub fn find_tool(tool: &Path) -> Option<PathBuf> {
    which::which(tool).ok()
}

/// Runs `<tool> -version` and returns its stdout.
pub fn check_tool_runs(tool: &Path) -> Result<String, SetupError> {
    let output = Command::new(tool)
        .arg("-version")
        .output()
        .map_err(|e| SetupError::ToolUnavailable {
            tool: tool.display().to_string(),
            reason: format!("failed to run -version: {}", e),
        })?;

    if !output.status.success() {
        return Err(SetupError::ToolUnavailable {
            tool: tool.display().to_string(),
            reason: "-version exited with failure".to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles the release form (`ffmpeg version 6.1.1`) and the git form
/// (`ffmpeg version n7.0-12-gabcdef`). Builds reporting a bare commit hash
/// return `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("version"))?
        .to_lowercase();

    let version_part = version_line
        .split("version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .trim_start_matches('n')
        .to_string();

    version_part
        .split(|c| c == '.' || c == '-')
        .next()?
        .parse()
        .ok()
}

/// Parses the encoder names out of `ffmpeg -encoders` output.
///
/// The listing starts after a ` ------` separator line; each entry is
/// `<flags> <name> <description>`.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

/// Checks that every encoder in `wanted` is compiled into the tool.
pub fn check_encoders_available(tool: &Path, wanted: &[&str]) -> Result<(), SetupError> {
    let output = Command::new(tool)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| SetupError::Unreachable(format!("{} -encoders: {}", tool.display(), e)))?;

    if !output.status.success() {
        return Err(SetupError::Unreachable(format!(
            "{} -encoders exited with failure",
            tool.display()
        )));
    }

    let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
    for name in wanted {
        if !encoders.iter().any(|e| e == name) {
            return Err(SetupError::EncoderUnavailable(format!(
                "'{}' is not compiled into {}",
                name,
                tool.display()
            )));
        }
    }

    Ok(())
}

/// Checks that a preset file exists and is a regular file.
pub fn check_preset_file(path: &Path) -> Result<(), SetupError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SetupError::MissingPreset(path.to_path_buf()))
    }
}
