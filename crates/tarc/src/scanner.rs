//! Walk a directory tree and report the files in it.
//!
//! The scanner knows nothing about torrents and never reads file contents,
//! it only collects what `stat` says. Symbolic links are neither followed
//! nor reported, so a tree with link cycles, or links into other trees, is
//! walked exactly once.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use walkdir::{DirEntry, WalkDir};

use crate::error::ScanError;

/// A regular file found under the scan root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the scan root, `/` separated.
    pub relative_path: String,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub modified_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Skip files and directories whose name starts with a dot.
    pub skip_hidden: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Start a new walk of `root`.
    ///
    /// Nothing is read until the iterator is polled, and dropping it stops
    /// the walk. Entries are visited in file name order. A directory that
    /// cannot be read yields one `Err` and the walk goes on with its
    /// siblings.
    pub fn scan(&self, root: impl AsRef<Path>) -> ScanIter {
        let root = root.as_ref().to_path_buf();
        let inner = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        ScanIter { root, options: self.options, inner }
    }
}

/// Lazy walk started by [`Scanner::scan`].
pub struct ScanIter {
    root: PathBuf,
    options: ScanOptions,
    inner: walkdir::IntoIter,
}

impl ScanIter {
    fn record(&self, entry: &DirEntry) -> Result<FileRecord, ScanError> {
        let metadata = entry.metadata().map_err(|e| ScanError {
            path: self.display(entry.path()),
            message: e.to_string(),
        })?;

        Ok(FileRecord {
            relative_path: self.display(entry.path()),
            size_bytes: metadata.len(),
            modified_at: metadata.modified().ok().map(OffsetDateTime::from),
        })
    }

    fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_owned(),
            Ok(rel) => normalize(rel),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

impl Iterator for ScanIter {
    type Item = Result<FileRecord, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| self.display(p))
                        .unwrap_or_else(|| ".".to_owned());
                    return Some(Err(ScanError {
                        path,
                        message: err.to_string(),
                    }));
                }
            };

            // the root itself
            if entry.depth() == 0 {
                continue;
            }

            if self.options.skip_hidden && is_hidden(&entry) {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            return Some(self.record(&entry));
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

/// Join the normal components of a relative path with `/`, the same way
/// torrent paths are joined.
pub fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
