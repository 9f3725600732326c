//! Asset mirror: copies non-media files into the archive tree.
//!
//! The mirror is append-only. A destination that already exists with the
//! source's size is left alone, side-cars of media files are never copied,
//! and a copy only replaces its destination once it has been fully written.
//! Staged copies orphaned by an interrupted run are swept from each
//! destination directory the first time the mirror visits it.

use crate::scan::FileEntry;
use crate::sidecar::BaseNameIndex;
use crate::summary::format_size;
use filetime::FileTime;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const STAGING_PREFIX: &str = ".archive265-";
const STAGING_SUFFIX: &str = ".partial";

/// Errors that can occur while copying a single asset.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Failed to create the destination directory.
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    /// Failed to read the source or write the staged copy.
    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Failed to move the staged copy onto the destination.
    #[error("Failed to finalize {}: {source}", path.display())]
    Persist { path: PathBuf, source: io::Error },
}

/// What the mirror did with one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
    /// The asset was copied; carries the byte count.
    Copied(u64),
    /// The destination already held a file of the same size.
    SkippedExisting,
    /// The asset shares a base name with a media file.
    Suppressed,
    /// Dry run: the asset would have been copied.
    WouldCopy,
}

/// Per-run accounting of asset handling, by relative path.
#[derive(Debug, Default)]
pub struct MirrorReport {
    pub copied: Vec<PathBuf>,
    pub skipped_existing: Vec<PathBuf>,
    pub suppressed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, CopyError)>,
    pub bytes_copied: u64,
    /// Staged copies left behind by an interrupted run and removed.
    pub stale_removed: usize,
}

impl MirrorReport {
    fn record(&mut self, relative: &Path, action: MirrorAction) {
        let relative = relative.to_path_buf();
        match action {
            MirrorAction::Copied(bytes) => {
                self.bytes_copied += bytes;
                self.copied.push(relative);
            }
            MirrorAction::WouldCopy => self.copied.push(relative),
            MirrorAction::SkippedExisting => self.skipped_existing.push(relative),
            MirrorAction::Suppressed => self.suppressed.push(relative),
        }
    }
}

/// Copies assets from the source tree into the archive root.
#[derive(Debug, Clone)]
pub struct AssetMirror {
    archive_root: PathBuf,
    dry_run: bool,
}

impl AssetMirror {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            dry_run: false,
        }
    }

    /// When enabled, decisions are logged but nothing is written.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Mirrored location of an asset under the archive root.
    pub fn destination_for(&self, asset: &FileEntry) -> PathBuf {
        self.archive_root.join(&asset.relative)
    }

    /// Mirrors every asset, continuing past individual copy failures.
    pub fn mirror(&self, assets: &[FileEntry], sidecars: &BaseNameIndex) -> MirrorReport {
        let mut report = MirrorReport::default();
        let mut swept: HashSet<PathBuf> = HashSet::new();

        for asset in assets {
            if !self.dry_run {
                if let Some(dir) = self.destination_for(asset).parent() {
                    if swept.insert(dir.to_path_buf()) {
                        report.stale_removed += sweep_stale_partials(dir);
                    }
                }
            }
            match self.mirror_one(asset, sidecars) {
                Ok(action) => report.record(&asset.relative, action),
                Err(e) => {
                    error!(asset = %asset.relative.display(), "asset copy failed: {}", e);
                    report.failed.push((asset.relative.clone(), e));
                }
            }
        }

        report
    }

    /// Applies the suppression, resume and copy decision to a single asset.
    pub fn mirror_one(
        &self,
        asset: &FileEntry,
        sidecars: &BaseNameIndex,
    ) -> Result<MirrorAction, CopyError> {
        if sidecars.is_sidecar(asset) {
            info!(asset = %asset.relative.display(), "skipping side-car asset");
            return Ok(MirrorAction::Suppressed);
        }

        let dest = self.destination_for(asset);
        if already_mirrored(&dest, asset.size_bytes) {
            debug!(asset = %asset.relative.display(), "skipping existing asset");
            return Ok(MirrorAction::SkippedExisting);
        }

        if self.dry_run {
            info!(
                asset = %asset.relative.display(),
                size = %format_size(asset.size_bytes),
                "would copy asset"
            );
            return Ok(MirrorAction::WouldCopy);
        }

        let bytes = copy_preserving_mtime(&asset.path, &dest)?;
        info!(
            asset = %asset.relative.display(),
            size = %format_size(bytes),
            "copied asset"
        );
        Ok(MirrorAction::Copied(bytes))
    }
}

/// Size equality is the resume signal; contents are not checksummed.
fn already_mirrored(dest: &Path, source_size: u64) -> bool {
    fs::metadata(dest)
        .map(|m| m.is_file() && m.len() == source_size)
        .unwrap_or(false)
}

fn is_staged_copy(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

/// Removes staged copies in `dir`; returns how many were removed.
pub fn sweep_stale_partials(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "nothing to sweep: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !is_staged_copy(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(path = %path.display(), "removed partial copy from an interrupted run");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), "could not remove partial copy: {}", e),
        }
    }
    removed
}

/// Copies `src` to `dest` through a staged temp file in the destination
/// directory, then applies the source permissions and timestamps.
///
/// Returns the number of bytes copied.
pub fn copy_preserving_mtime(src: &Path, dest: &Path) -> Result<u64, CopyError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| CopyError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let copy_err = |source: io::Error| CopyError::Copy {
        from: src.to_path_buf(),
        to: dest.to_path_buf(),
        source,
    };

    let src_meta = fs::metadata(src).map_err(copy_err)?;
    let mut reader = File::open(src).map_err(copy_err)?;

    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(parent)
        .map_err(copy_err)?;
    let bytes = io::copy(&mut reader, staged.as_file_mut()).map_err(copy_err)?;
    staged.as_file().sync_all().map_err(copy_err)?;
    fs::set_permissions(staged.path(), src_meta.permissions()).map_err(copy_err)?;

    staged.persist(dest).map_err(|e| CopyError::Persist {
        path: dest.to_path_buf(),
        source: e.error,
    })?;

    let atime = FileTime::from_last_access_time(&src_meta);
    let mtime = FileTime::from_last_modification_time(&src_meta);
    filetime::set_file_times(dest, atime, mtime).map_err(|source| CopyError::Persist {
        path: dest.to_path_buf(),
        source,
    })?;

    Ok(bytes)
}
