//! One archive run, from scan to summary.
//!
//! The run is strictly sequential:
//! 1. Resolve the source root and derive the archive root
//! 2. Classify the source tree
//! 3. Prepare the render capability (fatal on failure)
//! 4. Create the archive root
//! 5. Mirror assets, suppressing side-cars
//! 6. Ensure every media file has a valid output
//! 7. Summarize

use crate::config::{Config, ConfigError, SidecarScope};
use crate::integrity::IntegrityChecker;
use crate::mirror::AssetMirror;
use crate::orchestrator::{OrchestratorSettings, TranscodeOrchestrator, TranscodeOutcome};
use crate::probe::{FfprobeProber, MediaProber, NoopProber};
use crate::render::{FfmpegRenderer, RenderCapability};
use crate::scan::{classify, ExclusionPolicy, ScanError};
use crate::sidecar::BaseNameIndex;
use crate::startup::{find_tool, SetupError};
use crate::summary::{format_size, FailureRecord, RunSummary};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Error type for a pipeline run; every variant stops the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No {0} root configured")]
    MissingRoot(&'static str),

    #[error("Invalid source root {}: {source}", path.display())]
    InvalidSource { path: PathBuf, source: io::Error },

    #[error("Source root {} has no folder name to derive the archive name from", .0.display())]
    UnnamedSource(PathBuf),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Failed to create archive root {}: {source}", path.display())]
    CreateArchiveRoot { path: PathBuf, source: io::Error },
}

/// Roots and run mode.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub archive_suffix: String,
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn from_config(cfg: &Config, dry_run: bool) -> Result<Self, PipelineError> {
        let source_root = cfg
            .paths
            .source_root
            .clone()
            .ok_or(PipelineError::MissingRoot("source"))?;
        let destination_root = cfg
            .paths
            .destination_root
            .clone()
            .ok_or(PipelineError::MissingRoot("destination"))?;
        Ok(Self {
            source_root,
            destination_root,
            archive_suffix: cfg.paths.archive_suffix.clone(),
            dry_run,
        })
    }
}

/// `<destination>/<source folder name><suffix>`, e.g. `/archive/ShowA-265`.
pub fn archive_root_for(
    source_root: &Path,
    destination_root: &Path,
    suffix: &str,
) -> Result<PathBuf, PipelineError> {
    let name = source_root
        .file_name()
        .ok_or_else(|| PipelineError::UnnamedSource(source_root.to_path_buf()))?;
    let mut folder = name.to_os_string();
    folder.push(suffix);
    Ok(destination_root.join(folder))
}

/// Canonical form of a path that may not exist yet.
fn resolve_destination(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Builds the prober for source properties; ffprobe is optional.
pub fn default_prober(cfg: &Config) -> Box<dyn MediaProber + Send + Sync> {
    match find_tool(&cfg.integrity.ffprobe_path) {
        Some(ffprobe) => Box::new(FfprobeProber::new(ffprobe)),
        None => {
            warn!(
                "{} not found; source properties and timecodes will not be read",
                cfg.integrity.ffprobe_path.display()
            );
            Box::new(NoopProber)
        }
    }
}

/// A configured run with its collaborators.
pub struct Pipeline {
    options: PipelineOptions,
    policy: ExclusionPolicy,
    sidecar_scope: SidecarScope,
    settings: OrchestratorSettings,
    checker: IntegrityChecker,
    prober: Box<dyn MediaProber + Send + Sync>,
    renderer: Box<dyn RenderCapability + Send>,
}

impl Pipeline {
    /// Assemble a pipeline with explicit collaborators.
    pub fn new(
        cfg: &Config,
        options: PipelineOptions,
        checker: IntegrityChecker,
        prober: Box<dyn MediaProber + Send + Sync>,
        renderer: Box<dyn RenderCapability + Send>,
    ) -> Self {
        Self {
            policy: ExclusionPolicy::from_config(&cfg.classify),
            sidecar_scope: cfg.sidecar.scope,
            settings: OrchestratorSettings::from_config(cfg, options.dry_run),
            options,
            checker,
            prober,
            renderer,
        }
    }

    /// Assemble a pipeline backed by ffmpeg and ffprobe.
    pub fn from_config(cfg: &Config, dry_run: bool) -> Result<Self, PipelineError> {
        cfg.validate()?;
        let options = PipelineOptions::from_config(cfg, dry_run)?;
        let checker = IntegrityChecker::from_config(&cfg.integrity)?;
        info!("Integrity probe: {}", checker.backend_name());

        let renderer = FfmpegRenderer::new(cfg.integrity.ffmpeg_path.clone(), cfg.render.clone());
        Ok(Self::new(
            cfg,
            options,
            checker,
            default_prober(cfg),
            Box::new(renderer),
        ))
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs the whole pipeline once.
    ///
    /// Only setup-level problems return `Err`; per-file failures are recorded
    /// in the summary.
    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        let source_root = fs::canonicalize(&self.options.source_root).map_err(|source| {
            PipelineError::InvalidSource {
                path: self.options.source_root.clone(),
                source,
            }
        })?;
        let destination_root = resolve_destination(&self.options.destination_root);
        let archive_root =
            archive_root_for(&source_root, &destination_root, &self.options.archive_suffix)?;
        let dry_run = self.options.dry_run;

        info!(
            "Archiving {} -> {}{}",
            source_root.display(),
            archive_root.display(),
            if dry_run { " (dry run)" } else { "" }
        );

        let mut policy = self.policy.clone();
        if archive_root.starts_with(&source_root) {
            policy = policy.with_pruned_path(archive_root.clone());
        }
        let classification = classify(&source_root, &policy)?;
        info!(
            "Found {} assets, {} media, {} excluded",
            classification.assets.len(),
            classification.media.len(),
            classification.excluded.len()
        );

        if !dry_run {
            self.renderer.prepare()?;
            fs::create_dir_all(&archive_root).map_err(|source| {
                PipelineError::CreateArchiveRoot {
                    path: archive_root.clone(),
                    source,
                }
            })?;
        }

        let sidecars = BaseNameIndex::from_media(&classification.media, self.sidecar_scope);
        let mirror = AssetMirror::new(&archive_root).with_dry_run(dry_run);
        let mirror_report = mirror.mirror(&classification.assets, &sidecars);
        if mirror_report.stale_removed > 0 {
            warn!(
                "Removed {} partial copies left by an interrupted run",
                mirror_report.stale_removed
            );
        }

        let mut orchestrator = TranscodeOrchestrator::new(
            &self.checker,
            self.prober.as_ref(),
            self.renderer.as_mut(),
            self.settings.clone(),
        );
        let plan = orchestrator.plan(&classification.media, &archive_root);
        let transcode_report = orchestrator.run_all(&plan);

        let mut failures: Vec<FailureRecord> = mirror_report
            .failed
            .iter()
            .map(|(relative, e)| FailureRecord {
                relative: relative.clone(),
                reason: e.to_string(),
            })
            .collect();
        for (relative, outcome) in &transcode_report.outcomes {
            let reason = match outcome {
                TranscodeOutcome::Failed(e) => e.to_string(),
                TranscodeOutcome::Conflict { owner } => {
                    format!("output already claimed by {}", owner.display())
                }
                _ => continue,
            };
            failures.push(FailureRecord {
                relative: relative.clone(),
                reason,
            });
        }

        let summary = RunSummary {
            source_root,
            archive_root,
            dry_run,
            assets_copied: mirror_report.copied.len(),
            assets_skipped_existing: mirror_report.skipped_existing.len(),
            assets_suppressed: mirror_report.suppressed.len(),
            assets_failed: mirror_report.failed.len(),
            bytes_copied: mirror_report.bytes_copied,
            media_already_valid: transcode_report.already_valid(),
            media_rendered: transcode_report.rendered(),
            media_failed: transcode_report.failed(),
            media_conflicts: transcode_report.conflicts(),
            excluded: classification.excluded.len(),
            failures,
        };

        log_summary(&summary);
        Ok(summary)
    }
}

fn log_summary(summary: &RunSummary) {
    let verb = if summary.dry_run { "would copy" } else { "copied" };
    info!(
        "Assets: {} {} ({}), {} already present, {} side-cars suppressed, {} failed",
        verb,
        summary.assets_copied,
        format_size(summary.bytes_copied),
        summary.assets_skipped_existing,
        summary.assets_suppressed,
        summary.assets_failed
    );
    let verb = if summary.dry_run { "to render" } else { "rendered" };
    info!(
        "Media: {} {}, {} already valid, {} failed, {} conflicts",
        summary.media_rendered,
        verb,
        summary.media_already_valid,
        summary.media_failed,
        summary.media_conflicts
    );
    for failure in &summary.failures {
        warn!("not archived: {}: {}", failure.relative.display(), failure.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use proptest::prelude::*;

    #[test]
    fn test_archive_root_for() {
        let root = archive_root_for(Path::new("/projects/ShowA"), Path::new("/archive"), "-265")
            .unwrap();
        assert_eq!(root, PathBuf::from("/archive/ShowA-265"));

        assert!(matches!(
            archive_root_for(Path::new("/"), Path::new("/archive"), "-265"),
            Err(PipelineError::UnnamedSource(_))
        ));
    }

    #[test]
    fn test_options_require_both_roots() {
        let mut cfg = Config::default();
        assert!(matches!(
            PipelineOptions::from_config(&cfg, false),
            Err(PipelineError::MissingRoot("source"))
        ));

        cfg.paths = PathsConfig {
            source_root: Some(PathBuf::from("/projects/ShowA")),
            ..PathsConfig::default()
        };
        assert!(matches!(
            PipelineOptions::from_config(&cfg, false),
            Err(PipelineError::MissingRoot("destination"))
        ));

        cfg.paths.destination_root = Some(PathBuf::from("/archive"));
        let options = PipelineOptions::from_config(&cfg, true).unwrap();
        assert!(options.dry_run);
        assert_eq!(options.archive_suffix, "-265");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_archive_root_is_sibling_named_after_source(
            parent in "[a-z]{1,8}",
            name in "[A-Za-z0-9_]{1,12}",
            dest in "[a-z]{1,8}",
        ) {
            let source = PathBuf::from(format!("/{}/{}", parent, name));
            let destination = PathBuf::from(format!("/{}", dest));

            let root = archive_root_for(&source, &destination, "-265").unwrap();
            prop_assert_eq!(root.parent(), Some(destination.as_path()));
            prop_assert_eq!(
                root.file_name().and_then(|n| n.to_str()).map(str::to_string),
                Some(format!("{}-265", name))
            );
        }
    }
}
