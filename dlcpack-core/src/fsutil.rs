use std::fs::{self, File};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::warn;

/// Write `dst` through a temp file in the same directory, replacing it only on success.
pub fn write_atomically<F>(dst: &Path, f: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".dlcpack-")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    f(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all().ok();
    tmp.persist(dst)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write {}", dst.display()))?;
    Ok(())
}

/// Append `.ext` unless the file name already ends with it (case-insensitive).
pub fn with_suffix_extension(path: &Path, ext: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{}", ext);
    if name.to_lowercase().ends_with(&suffix.to_lowercase()) {
        return path.to_path_buf();
    }
    path.with_file_name(format!("{}{}", name, suffix))
}

/// Rename, falling back to copy and delete across file systems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if to.exists() {
        fs::remove_file(to).with_context(|| format!("Failed to replace {}", to.display()))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("Failed to move {} -> {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("Failed to remove {}", from.display()))?;
    Ok(())
}

/// Delete a file if present, logging instead of failing.
pub fn remove_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

/// File name of `path` as a string (empty when it has none).
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Removes the registered files when dropped, on success and failure alike.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_best_effort(path);
        }
    }
}
