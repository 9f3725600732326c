//! Scanner module for classifying a project tree into assets and media.
//!
//! The walk prunes excluded directories before descending into them, drops
//! files matching an excluded name pattern, and sorts every remaining file
//! into exactly one of the asset or media sets (or the excluded set, for raw
//! files under [`RawPolicy::Exclude`]).

use crate::config::{normalize_extension, ClassifyConfig, RawPolicy};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Errors that prevent a scan from starting.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The source root does not exist or is not a directory.
    #[error("Source root is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),
}

/// Classification assigned to every scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Copied verbatim into the archive tree.
    Asset,
    /// Transcoded into the output container.
    Media,
    /// Dropped by a name pattern or the raw policy.
    Excluded,
}

/// A file discovered under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full path to the file.
    pub path: PathBuf,
    /// Path relative to the source root.
    pub relative: PathBuf,
    /// File size in bytes at scan time.
    pub size_bytes: u64,
    pub kind: EntryKind,
}

impl FileEntry {
    /// Directory of the file relative to the source root (empty for top-level files).
    pub fn relative_dir(&self) -> &Path {
        self.relative.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Lowercased file name without its final extension.
    ///
    /// `A/shot1.MOV` -> `shot1`, `A/clip.take2.mov` -> `clip.take2`.
    pub fn base_name(&self) -> String {
        self.relative
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Returns the normalized extension of a path, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_extension)
        .filter(|ext| !ext.is_empty())
}

/// Rules deciding which parts of the tree are visited and how files are classified.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    excluded_dirs: BTreeSet<String>,
    excluded_name_patterns: Vec<String>,
    media_extensions: BTreeSet<String>,
    raw_extensions: BTreeSet<String>,
    raw_policy: RawPolicy,
    pruned_paths: Vec<PathBuf>,
}

impl ExclusionPolicy {
    pub fn new<D, P, M, R>(
        excluded_dirs: D,
        excluded_name_patterns: P,
        media_extensions: M,
        raw_extensions: R,
        raw_policy: RawPolicy,
    ) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        P: IntoIterator,
        P::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        Self {
            excluded_dirs: excluded_dirs.into_iter().map(Into::into).collect(),
            excluded_name_patterns: excluded_name_patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            media_extensions: media_extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
            raw_extensions: raw_extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
            raw_policy,
            pruned_paths: Vec::new(),
        }
    }

    pub fn from_config(cfg: &ClassifyConfig) -> Self {
        Self::new(
            cfg.excluded_dirs.iter().cloned(),
            cfg.excluded_name_patterns.iter(),
            cfg.media_extensions.iter(),
            cfg.raw_extensions.iter(),
            cfg.raw_policy,
        )
    }

    /// Additionally prunes one exact path from the walk.
    ///
    /// Used for an archive root that lives inside the source tree, so a run
    /// never picks up its own outputs.
    pub fn with_pruned_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pruned_paths.push(path.into());
        self
    }

    /// Checks if a directory name is pruned (exact match).
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.contains(name)
    }

    /// Checks if a file name contains an excluded pattern (case-insensitive).
    pub fn is_excluded_name(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.excluded_name_patterns
            .iter()
            .any(|pattern| lower.contains(pattern.as_str()))
    }

    /// Classifies a single file by name.
    pub fn classify_path(&self, path: &Path) -> EntryKind {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if self.is_excluded_name(&name) {
            return EntryKind::Excluded;
        }

        match extension_of(path) {
            Some(ext) if self.raw_extensions.contains(&ext) => match self.raw_policy {
                RawPolicy::Exclude => EntryKind::Excluded,
                RawPolicy::Asset => EntryKind::Asset,
                RawPolicy::Media => EntryKind::Media,
            },
            Some(ext) if self.media_extensions.contains(&ext) => EntryKind::Media,
            _ => EntryKind::Asset,
        }
    }

    fn prunes(&self, entry: &walkdir::DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        if self.pruned_paths.iter().any(|p| p == entry.path()) {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .map(|name| self.is_excluded_dir(name))
            .unwrap_or(false)
    }
}

/// Result of scanning a source tree.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub assets: Vec<FileEntry>,
    pub media: Vec<FileEntry>,
    pub excluded: Vec<FileEntry>,
}

impl Classification {
    /// Number of files seen outside pruned directories.
    pub fn total(&self) -> usize {
        self.assets.len() + self.media.len() + self.excluded.len()
    }
}

/// Walks the source root and classifies every visible file.
///
/// This function:
/// - Recursively walks the source root in file-name order
/// - Prunes directories named in the policy before descending
/// - Classifies each file as asset, media or excluded
/// - Captures the file size for the mirror's resume check
pub fn classify(source_root: &Path, policy: &ExclusionPolicy) -> Result<Classification, ScanError> {
    if !source_root.is_dir() {
        return Err(ScanError::SourceNotDirectory(source_root.to_path_buf()));
    }

    let mut result = Classification::default();

    let walker = WalkDir::new(source_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let pruned = policy.prunes(entry);
            if pruned {
                debug!(path = %entry.path().display(), "pruning excluded directory");
            }
            !pruned
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry during scan: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = match path.strip_prefix(source_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };

        let size_bytes = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!(path = %path.display(), "cannot read metadata, skipping: {}", e);
                continue;
            }
        };

        let kind = policy.classify_path(path);
        let file = FileEntry {
            path: path.to_path_buf(),
            relative,
            size_bytes,
            kind,
        };

        match kind {
            EntryKind::Asset => result.assets.push(file),
            EntryKind::Media => result.media.push(file),
            EntryKind::Excluded => {
                debug!(path = %file.relative.display(), "excluded from archive");
                result.excluded.push(file);
            }
        }
    }

    Ok(result)
}
