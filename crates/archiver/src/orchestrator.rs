//! Transcode orchestrator.
//!
//! Every media file maps to one output under the archive root. The output's
//! on-disk state decides what happens to it:
//!
//! | State   | Action                                            |
//! |---------|---------------------------------------------------|
//! | Absent  | render, then verify                               |
//! | Valid   | nothing                                           |
//! | Corrupt | delete (retrying while locked), render, verify    |
//!
//! State is re-derived from the filesystem on every run, so the archive
//! tree itself is the checkpoint. Sources with an alpha channel are written
//! to the alpha container instead of the regular one.

use crate::config::Config;
use crate::integrity::{IntegrityChecker, Verdict};
use crate::probe::{MediaProber, ProbeError};
use crate::remove::{remove_with_retry_by, RemoveError};
use crate::render::{RenderCapability, RenderError};
use crate::scan::FileEntry;
use crate::timecode::{compare_timecodes, supports_timecode_tag, TimecodeCheck};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error type for a single media file
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The source could not be ingested
    #[error("Import failed: {0}")]
    Import(ProbeError),

    /// The render did not complete
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    /// The freshly rendered output does not decode
    #[error("Output {} failed integrity check: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    /// The integrity probe itself could not run
    #[error("Integrity probe failed: {0}")]
    Verify(ProbeError),

    /// A corrupt output could not be removed
    #[error("Could not remove corrupt output: {0}")]
    Delete(#[from] RemoveError),

    /// The output directory could not be created
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// On-disk state of an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    Absent,
    Valid,
    /// Zero-length or undecodable.
    Corrupt(String),
}

impl From<Verdict> for TargetState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Missing => TargetState::Absent,
            Verdict::Valid => TargetState::Valid,
            Verdict::Empty => TargetState::Corrupt("zero-length file".to_string()),
            Verdict::Corrupt(reason) => TargetState::Corrupt(reason),
        }
    }
}

/// A media file paired with its output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeTarget {
    pub source: FileEntry,
    pub destination: PathBuf,
}

/// Output path for a media file: same relative path and base name, with the
/// extension forced to the output container.
pub fn destination_for(archive_root: &Path, relative: &Path, extension: &str) -> PathBuf {
    archive_root.join(relative).with_extension(extension)
}

/// Targets for a run, plus media whose output path was already claimed.
#[derive(Debug, Default)]
pub struct TargetPlan {
    pub targets: Vec<TranscodeTarget>,
    /// `(entry, relative path of the media that owns the output)`
    pub conflicts: Vec<(FileEntry, PathBuf)>,
}

/// Pairs each media file with an output in `extension`.
pub fn plan_targets(media: &[FileEntry], archive_root: &Path, extension: &str) -> TargetPlan {
    plan_targets_with(media, archive_root, |_| extension.to_string())
}

/// Pairs each media file with its output, asking `extension_for` for the
/// container of each one.
///
/// Two sources in one directory sharing a base name (`a.mov`, `a.MXF`) would
/// render onto the same output; the first in walk order keeps it. The key
/// ignores the container, so a source owns one output whichever it gets.
pub fn plan_targets_with<F>(
    media: &[FileEntry],
    archive_root: &Path,
    mut extension_for: F,
) -> TargetPlan
where
    F: FnMut(&FileEntry) -> String,
{
    let mut plan = TargetPlan::default();
    let mut owners: HashMap<(PathBuf, String), PathBuf> = HashMap::new();

    for entry in media {
        let key = (entry.relative_dir().to_path_buf(), entry.base_name());
        if let Some(owner) = owners.get(&key) {
            warn!(
                media = %entry.relative.display(),
                "output already claimed by {}", owner.display()
            );
            plan.conflicts.push((entry.clone(), owner.clone()));
            continue;
        }
        owners.insert(key, entry.relative.clone());
        let extension = extension_for(entry);
        plan.targets.push(TranscodeTarget {
            destination: destination_for(archive_root, &entry.relative, &extension),
            source: entry.clone(),
        });
    }

    plan
}

/// What happened to one media file.
#[derive(Debug)]
pub enum TranscodeOutcome {
    AlreadyValid,
    Rendered {
        replaced_corrupt: bool,
        timecode: TimecodeCheck,
    },
    /// Dry run: the file would have been rendered.
    WouldRender { replaces_corrupt: bool },
    /// Another source in the same directory owns the output.
    Conflict { owner: PathBuf },
    Failed(TranscodeError),
}

impl TranscodeOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(
            self,
            TranscodeOutcome::AlreadyValid
                | TranscodeOutcome::Rendered { .. }
                | TranscodeOutcome::WouldRender { .. }
        )
    }
}

/// Outcomes of a run over every planned target, in processing order.
#[derive(Debug, Default)]
pub struct TranscodeReport {
    pub outcomes: Vec<(PathBuf, TranscodeOutcome)>,
}

impl TranscodeReport {
    fn count(&self, pred: impl Fn(&TranscodeOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn already_valid(&self) -> usize {
        self.count(|o| matches!(o, TranscodeOutcome::AlreadyValid))
    }

    /// Rendered, or would be rendered in a dry run.
    pub fn rendered(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                TranscodeOutcome::Rendered { .. } | TranscodeOutcome::WouldRender { .. }
            )
        })
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TranscodeOutcome::Failed(_)))
    }

    pub fn conflicts(&self) -> usize {
        self.count(|o| matches!(o, TranscodeOutcome::Conflict { .. }))
    }
}

/// Settings for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub output_extension: String,
    /// Container for sources with an alpha channel; `None` renders them like any other.
    pub alpha_extension: Option<String>,
    pub delete_attempts: u32,
    pub delete_retry_delay: Duration,
    /// Compare source and output start timecodes after each render.
    pub verify_timecode: bool,
    pub dry_run: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), false)
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &Config, dry_run: bool) -> Self {
        let output = &cfg.output;
        Self {
            output_extension: output.normalized_extension(),
            alpha_extension: cfg
                .render
                .preserve_alpha
                .then(|| output.normalized_alpha_extension()),
            delete_attempts: output.delete_attempts,
            delete_retry_delay: Duration::from_millis(output.delete_retry_delay_ms),
            verify_timecode: output.verify_timecode,
            dry_run,
        }
    }
}

/// Single removal attempt used when deleting a corrupt output.
pub type RemoveFn<'a> = Box<dyn FnMut(&Path) -> io::Result<()> + 'a>;

/// Drives each target through the state machine, one at a time.
pub struct TranscodeOrchestrator<'a> {
    checker: &'a IntegrityChecker,
    prober: &'a dyn MediaProber,
    renderer: &'a mut dyn RenderCapability,
    settings: OrchestratorSettings,
    remover: RemoveFn<'a>,
}

impl<'a> TranscodeOrchestrator<'a> {
    pub fn new(
        checker: &'a IntegrityChecker,
        prober: &'a dyn MediaProber,
        renderer: &'a mut dyn RenderCapability,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            checker,
            prober,
            renderer,
            settings,
            remover: Box::new(|path: &Path| fs::remove_file(path)),
        }
    }

    /// Replaces the filesystem removal used for corrupt outputs.
    pub fn with_remover(mut self, remover: RemoveFn<'a>) -> Self {
        self.remover = remover;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Output container for a media file.
    ///
    /// With alpha preservation on, the source is probed for its pixel format;
    /// a source that cannot be probed gets the regular container and fails
    /// later at import.
    pub fn output_extension_for(&self, entry: &FileEntry) -> String {
        let Some(alpha_ext) = &self.settings.alpha_extension else {
            return self.settings.output_extension.clone();
        };
        match self.prober.probe(&entry.path) {
            Ok(props) if props.has_alpha() => {
                debug!(media = %entry.relative.display(), "alpha channel detected");
                alpha_ext.clone()
            }
            Ok(_) => self.settings.output_extension.clone(),
            Err(e) => {
                debug!(media = %entry.relative.display(), "pixel format unknown: {}", e);
                self.settings.output_extension.clone()
            }
        }
    }

    /// Pairs every media file with its output under `archive_root`.
    pub fn plan(&self, media: &[FileEntry], archive_root: &Path) -> TargetPlan {
        plan_targets_with(media, archive_root, |entry| self.output_extension_for(entry))
    }

    /// Current on-disk state of a target's output.
    pub fn inspect(&self, target: &TranscodeTarget) -> Result<TargetState, ProbeError> {
        self.checker.check(&target.destination).map(TargetState::from)
    }

    /// Brings one target to a valid output, rendering only when needed.
    pub fn ensure_transcoded(&mut self, target: &TranscodeTarget) -> TranscodeOutcome {
        match self.try_ensure(target) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(media = %target.source.relative.display(), "{}", e);
                TranscodeOutcome::Failed(e)
            }
        }
    }

    fn try_ensure(&mut self, target: &TranscodeTarget) -> Result<TranscodeOutcome, TranscodeError> {
        let media = target.source.relative.display();
        let state = self.inspect(target).map_err(TranscodeError::Verify)?;

        let replaced_corrupt = match state {
            TargetState::Valid => {
                debug!(media = %media, "output already valid, skipping");
                return Ok(TranscodeOutcome::AlreadyValid);
            }
            TargetState::Absent => false,
            TargetState::Corrupt(reason) => {
                if self.settings.dry_run {
                    info!(media = %media, "[dry-run] would replace corrupt output ({})", reason);
                    return Ok(TranscodeOutcome::WouldRender {
                        replaces_corrupt: true,
                    });
                }
                warn!(
                    media = %media,
                    "deleting corrupt output {} ({})",
                    target.destination.display(),
                    reason
                );
                let attempts = remove_with_retry_by(
                    &target.destination,
                    self.settings.delete_attempts,
                    self.settings.delete_retry_delay,
                    &mut self.remover,
                )?;
                if attempts > 1 {
                    info!(media = %media, "corrupt output removed after {} attempts", attempts);
                }
                true
            }
        };

        if self.settings.dry_run {
            info!(media = %media, "[dry-run] would render to {}", target.destination.display());
            return Ok(TranscodeOutcome::WouldRender {
                replaces_corrupt: false,
            });
        }

        if let Some(parent) = target.destination.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TranscodeError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let props = self
            .prober
            .probe(&target.source.path)
            .map_err(TranscodeError::Import)?;

        info!(
            media = %media,
            "rendering with {} -> {}",
            self.renderer.name(),
            target.destination.display()
        );
        self.renderer
            .transcode(&target.source.path, &target.destination, &props)?;

        let verdict = self
            .checker
            .check(&target.destination)
            .map_err(TranscodeError::Verify)?;
        let failure = match verdict {
            Verdict::Valid => None,
            Verdict::Missing => Some("render reported success but wrote no file".to_string()),
            Verdict::Empty => Some("zero-length file".to_string()),
            Verdict::Corrupt(reason) => Some(reason),
        };
        if let Some(reason) = failure {
            return Err(TranscodeError::Integrity {
                path: target.destination.clone(),
                reason,
            });
        }

        let timecode = self.check_timecode(target, props.start_timecode.as_deref());
        info!(media = %media, "rendered and verified");

        Ok(TranscodeOutcome::Rendered {
            replaced_corrupt,
            timecode,
        })
    }

    /// Advisory only; the outcome never depends on it.
    fn check_timecode(&self, target: &TranscodeTarget, source_tc: Option<&str>) -> TimecodeCheck {
        let extension = target
            .destination
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.settings.verify_timecode || !supports_timecode_tag(&extension) {
            return TimecodeCheck::NotApplicable;
        }
        let Some(source_tc) = source_tc else {
            return TimecodeCheck::NotApplicable;
        };

        let output_tc = self.prober.timecode(&target.destination);
        let check = compare_timecodes(Some(source_tc), output_tc.as_deref());
        let media = target.source.relative.display();
        match &check {
            TimecodeCheck::Match { timecode } => {
                info!(media = %media, "timecode match: {}", timecode)
            }
            TimecodeCheck::Mismatch { source, output } => {
                warn!(media = %media, "timecode mismatch: source {} output {}", source, output)
            }
            TimecodeCheck::Unreadable { source } => {
                warn!(media = %media, "source timecode {} not found in output", source)
            }
            TimecodeCheck::NotApplicable => {}
        }
        check
    }

    /// Runs every target in order; one failure never stops the batch.
    pub fn run_all(&mut self, plan: &TargetPlan) -> TranscodeReport {
        let mut report = TranscodeReport::default();

        for (entry, owner) in &plan.conflicts {
            report.outcomes.push((
                entry.relative.clone(),
                TranscodeOutcome::Conflict {
                    owner: owner.clone(),
                },
            ));
        }

        let total = plan.targets.len();
        for (i, target) in plan.targets.iter().enumerate() {
            debug!("[{}/{}] {}", i + 1, total, target.source.relative.display());
            let outcome = self.ensure_transcoded(target);
            report.outcomes.push((target.source.relative.clone(), outcome));
        }

        report
    }
}
