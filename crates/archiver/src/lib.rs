//! archive265
//!
//! Resumable archive-and-verify pipeline: mirrors a project's non-media
//! assets into a parallel archive tree and renders every media file into an
//! H.265 output, re-deriving what is left to do from the archive tree on
//! every run.

pub mod integrity;
pub mod mirror;
pub mod orchestrator;
pub mod pipeline;
pub mod probe;
pub mod remove;
pub mod render;
pub mod scan;
pub mod sidecar;
pub mod startup;
pub mod summary;
pub mod timecode;

pub use archive265_config as config;
pub use archive265_config::Config;
pub use integrity::{
    DecodeProbe, DecodeResult, FrameDecodeProbe, IntegrityChecker, NullMuxProbe, Verdict,
};
pub use mirror::{AssetMirror, CopyError, MirrorAction, MirrorReport};
pub use orchestrator::{
    destination_for, plan_targets, plan_targets_with, OrchestratorSettings, RemoveFn, TargetPlan,
    TargetState, TranscodeError, TranscodeOrchestrator, TranscodeOutcome, TranscodeReport, TranscodeTarget,
};
pub use pipeline::{archive_root_for, Pipeline, PipelineError, PipelineOptions};
pub use probe::{
    pixel_format_has_alpha, FfprobeProber, MediaProber, NoopProber, ProbeError, SourceProperties,
};
pub use remove::{remove_with_retry, remove_with_retry_by, RemoveError};
pub use render::{build_ffmpeg_command, FfmpegRenderer, RenderCapability, RenderError};
pub use scan::{classify, Classification, EntryKind, ExclusionPolicy, FileEntry, ScanError};
pub use sidecar::BaseNameIndex;
pub use startup::SetupError;
pub use summary::{format_size, FailureRecord, RunSummary};
pub use timecode::{compare_timecodes, TimecodeCheck};
