//! Render capability seam.
//!
//! The orchestrator treats rendering as one opaque blocking call: give it a
//! source, an output path and the source properties; it either produced the
//! output or it did not.

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, FfmpegRenderer};

use crate::probe::SourceProperties;
use crate::startup::SetupError;
use std::path::Path;
use thiserror::Error;

/// Error type for render operations
#[derive(Debug, Error)]
pub enum RenderError {
    /// Render process exited with non-zero status
    #[error("Render failed with exit code: {0}")]
    Failed(i32),

    /// Render process was terminated by signal
    #[error("Render process was terminated by signal")]
    Terminated,

    /// `transcode` was called before a successful `prepare`
    #[error("Render capability has not been prepared")]
    NotPrepared,

    /// IO error during rendering
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single stateful render session, shared by every file of a run.
pub trait RenderCapability {
    fn name(&self) -> &str;

    /// Verifies the capability is reachable and fully configured.
    ///
    /// Called once before any file is processed; an error aborts the run.
    fn prepare(&mut self) -> Result<(), SetupError>;

    /// Renders `source` to `output`, blocking until the encode ends.
    fn transcode(
        &mut self,
        source: &Path,
        output: &Path,
        props: &SourceProperties,
    ) -> Result<(), RenderError>;
}
