//! Side-car suppression index.
//!
//! A side-car is an asset sharing its base name with a media file, e.g. the
//! `clip.srt` or `clip.xml` next to `clip.mov`. The transcoded output is taken
//! to supersede it, so the mirror does not copy it.

use crate::config::SidecarScope;
use crate::scan::FileEntry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Lowercased media base names, grouped by relative directory.
#[derive(Debug, Clone, Default)]
pub struct BaseNameIndex {
    scope: SidecarScope,
    by_dir: BTreeMap<PathBuf, BTreeSet<String>>,
    global: BTreeSet<String>,
}

impl BaseNameIndex {
    /// Builds the index from the media set of a scan.
    pub fn from_media(media: &[FileEntry], scope: SidecarScope) -> Self {
        let mut index = Self {
            scope,
            ..Self::default()
        };
        for entry in media {
            let base = entry.base_name();
            index
                .by_dir
                .entry(entry.relative_dir().to_path_buf())
                .or_default()
                .insert(base.clone());
            index.global.insert(base);
        }
        index
    }

    /// Checks if a media base name exists for `base` under the configured scope.
    pub fn contains(&self, relative_dir: &Path, base: &str) -> bool {
        let base = base.to_lowercase();
        match self.scope {
            SidecarScope::SameDirectory => self
                .by_dir
                .get(relative_dir)
                .map(|names| names.contains(&base))
                .unwrap_or(false),
            SidecarScope::Global => self.global.contains(&base),
        }
    }

    /// Checks if an asset is a side-car of some media file.
    pub fn is_sidecar(&self, asset: &FileEntry) -> bool {
        self.contains(asset.relative_dir(), &asset.base_name())
    }
}
