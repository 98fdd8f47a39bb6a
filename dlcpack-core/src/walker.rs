//! Directory tree walking
//!
//! Produces `(archive name, absolute path)` pairs in the order packages are
//! laid out: the files of a directory first, then each subdirectory in turn.
//! Symbolic links are followed, so a linked file is packed with its target's
//! content under the link's own name.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::warn;
use walkdir::{DirEntry, WalkDir};

/// One file found under a walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the walk root, joined with `/`.
    pub name: String,
    pub path: PathBuf,
}

/// A lazy, restartable walk over every file below `root`.
///
/// Each call to `iter` (or each `for` loop over `&walk`) starts a fresh
/// traversal of the current file-system state.
#[derive(Debug, Clone)]
pub struct DirectoryWalk {
    root: PathBuf,
}

impl DirectoryWalk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn iter(&self) -> WalkIter {
        WalkIter {
            root: self.root.clone(),
            inner: WalkDir::new(&self.root)
                .min_depth(1)
                .follow_links(true)
                .sort_by(files_first)
                .into_iter(),
        }
    }
}

impl<'a> IntoIterator for &'a DirectoryWalk {
    type Item = Result<WalkEntry>;
    type IntoIter = WalkIter;

    fn into_iter(self) -> WalkIter {
        self.iter()
    }
}

pub struct WalkIter {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl Iterator for WalkIter {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(e).with_context(|| format!("Failed to walk {}", self.root.display())));
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                warn!("Skipping {}: not a regular file", entry.path().display());
                continue;
            }
            return Some(Ok(WalkEntry {
                name: archive_name(&self.root, entry.path()),
                path: entry.into_path(),
            }));
        }
    }
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// `/`-joined path of `path` relative to `root`.
pub fn archive_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Direct children of `dir` that are files, sorted by name.
pub fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    children(dir, |entry| entry.file_type().is_file())
}

/// Direct children of `dir` that are directories, sorted by name.
pub fn dirs_in(dir: &Path) -> Result<Vec<PathBuf>> {
    children(dir, |entry| entry.file_type().is_dir())
}

fn children(dir: &Path, keep: impl Fn(&DirEntry) -> bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if keep(&entry) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Every file below `dir` (recursively) whose path satisfies `matches`.
pub fn find_files(dir: &Path, matches: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in DirectoryWalk::new(dir).iter() {
        let entry = entry?;
        if matches(&entry.path) {
            found.push(entry.path);
        }
    }
    Ok(found)
}

/// Lowercased file name, for case-insensitive suffix checks.
pub fn lower_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
