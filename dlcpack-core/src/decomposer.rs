//! Package to directory decomposition
//!
//! Mirrors [`crate::composer`]: strip the platform wrapper, then expand the
//! archive and every archive nested in it. The outermost output folder is
//! named `<package>_<Platform>`; nested archives expand beside their entry
//! without a suffix.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use psarc::{is_archive_name, Psarc};
use crate::crypto::{DrmDirection, PlatformCryptoAdapter};
use crate::error::PackError;
use crate::fsutil::{file_name_of, remove_best_effort, ScratchFiles};
use crate::platform::{GamePlatform, Platform};
use crate::resolver::CONSOLE_ROOT_DIR;
use crate::walker::{files_in, lower_file_name};

/// Deepest archive-in-archive chain that will be expanded.
pub const MAX_NESTING_DEPTH: usize = 4;
const DECRYPTED_SUFFIX: &str = ".psarc.dat";

pub struct ArchiveDecomposer<'a> {
    crypto: &'a PlatformCryptoAdapter,
}

impl<'a> ArchiveDecomposer<'a> {
    pub fn new(crypto: &'a PlatformCryptoAdapter) -> Self {
        Self { crypto }
    }

    /// Desktop packages. Legacy packages are decrypted into memory first.
    pub fn decompose_desktop(&self, source: &Path, output_dir: &Path, platform: Platform) -> Result<PathBuf> {
        let dest = output_dir.join(package_dir_name(source, platform.platform));
        let mut input = File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;

        let count = if platform.is_legacy() {
            let mut plain: Vec<u8> = Vec::new();
            self.crypto
                .unwrap(platform, &mut input, &mut plain)
                .with_context(|| format!("Failed to decrypt {}", source.display()))?;
            extract_archive(Cursor::new(plain), &dest)?
        } else {
            extract_archive(BufReader::new(input), &dest)?
        };

        info!("Extracted {} files from {} to {}", count, source.display(), dest.display());
        Ok(dest)
    }

    /// Xbox 360 packages: extract the console payload, then expand every
    /// archive directly under `Root/` in place and delete it.
    pub fn decompose_xbox360(&self, source: &Path, output_dir: &Path) -> Result<PathBuf> {
        let dest = output_dir.join(package_dir_name(source, GamePlatform::XBox360));

        let mut package = self.crypto.console().open(source)?;
        let extracted = package.extract_payload(&dest);
        package.close();
        let payload = extracted.with_context(|| format!("Failed to extract payload of {}", source.display()))?;
        debug!("Extracted {} payload files", payload.len());

        let root = dest.join(CONSOLE_ROOT_DIR);
        if root.is_dir() {
            for inner in files_in(&root)? {
                if !is_archive_name(&file_name_of(&inner)) {
                    continue;
                }
                let target = inner.with_extension("");
                {
                    let file = File::open(&inner).with_context(|| format!("Failed to open {}", inner.display()))?;
                    extract_archive(BufReader::new(file), &target)?;
                }
                fs::remove_file(&inner).with_context(|| format!("Failed to remove {}", inner.display()))?;
            }
        }

        info!("Extracted console package {} to {}", source.display(), dest.display());
        Ok(dest)
    }

    /// PS3 packages: decrypt through the staging directory, then expand every
    /// archive decrypted from this package. A tool report without the success
    /// phrase is an error even though extraction has already happened.
    ///
    /// Decrypted archives are removed from the staging directory whatever the
    /// outcome, so one corrupt package cannot break the next unpack.
    pub fn decompose_ps3(&self, source: &Path, output_dir: &Path) -> Result<PathBuf> {
        if !source.is_file() {
            anyhow::bail!("File '{}' not found.", source.display());
        }
        self.crypto.ensure_drm_tool()?;

        let staging = self.crypto.staging_dir();
        fs::create_dir_all(staging).with_context(|| format!("Failed to create {}", staging.display()))?;
        let staged_name = file_name_of(source);
        let prefix = decrypted_prefix(&staged_name);
        discard_stale_decrypted(staging)?;

        let staged = staging.join(&staged_name);
        fs::copy(source, &staged).with_context(|| format!("Failed to stage {}", source.display()))?;
        let outcome = self.crypto.run_drm(DrmDirection::Decrypt);
        remove_best_effort(&staged);

        let decrypted = decrypted_outputs(staging)?;
        let outcome = outcome?;

        let ours: Vec<PathBuf> = decrypted
            .paths()
            .iter()
            .filter(|p| lower_file_name(p).starts_with(&prefix))
            .cloned()
            .collect();
        let dest = output_dir.join(ps3_dir_name(source));
        let extracted = extract_all(&ours, &dest);
        drop(decrypted);

        if !outcome.succeeded {
            if let Err(e) = &extracted {
                warn!("Extraction after failed decryption also failed: {:#}", e);
            }
            return Err(PackError::EncryptionToolFailure {
                output: outcome.report,
                artifact: dest,
            }
            .into());
        }

        if extracted? == 0 {
            anyhow::bail!("DRM tool produced no decrypted archive for {}", source.display());
        }
        info!("Extracted PS3 package {} to {}", source.display(), dest.display());
        Ok(dest)
    }
}

/// Lowercased name a decrypted archive of `staged_name` starts with:
/// `song.psarc.edat` gives `song`.
fn decrypted_prefix(staged_name: &str) -> String {
    let lower = staged_name.to_ascii_lowercase();
    let base = lower.strip_suffix(".edat").unwrap_or(&lower);
    base.strip_suffix(".psarc").unwrap_or(base).to_string()
}

/// Remove decrypted archives left over from an interrupted run.
fn discard_stale_decrypted(staging: &Path) -> Result<()> {
    for file in files_in(staging)? {
        if lower_file_name(&file).ends_with(DECRYPTED_SUFFIX) {
            warn!("Removing stale decrypted archive {}", file.display());
            remove_best_effort(&file);
        }
    }
    Ok(())
}

/// Every `*.psarc.dat` the tool left in the staging directory, tracked for removal.
fn decrypted_outputs(staging: &Path) -> Result<ScratchFiles> {
    let mut decrypted = ScratchFiles::new();
    for file in files_in(staging)? {
        if lower_file_name(&file).ends_with(DECRYPTED_SUFFIX) {
            decrypted.track(file);
        }
    }
    Ok(decrypted)
}

/// Expand each archive into `dest`. Every archive is attempted; the first
/// failure is returned once all have been tried.
fn extract_all(archives: &[PathBuf], dest: &Path) -> Result<usize> {
    let mut first_error = None;
    for archive in archives {
        let result = File::open(archive)
            .with_context(|| format!("Failed to open {}", archive.display()))
            .and_then(|input| extract_archive(BufReader::new(input), dest));
        if let Err(e) = result {
            match first_error {
                None => first_error = Some(e),
                Some(_) => warn!("Failed to extract {}: {:#}", archive.display(), e),
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(archives.len()),
    }
}

/// `<file stem>_<Platform>`
pub fn package_dir_name(source: &Path, platform: GamePlatform) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}", stem, platform)
}

/// `song.psarc.edat` expands to `song_PS3`.
fn ps3_dir_name(source: &Path) -> String {
    let stem = Path::new(&file_name_of(source))
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = match stem.rfind('.') {
        Some(i) if i > 0 => &stem[..i],
        _ => stem.as_str(),
    };
    format!("{}_{}", base, GamePlatform::PS3)
}

/// Expand an archive into `dest`, recursing into nested archives.
/// Returns the number of plain files written.
pub fn extract_archive<R: Read + Seek>(input: R, dest: &Path) -> Result<usize> {
    extract_nested(input, dest, 0)
}

fn extract_nested<R: Read + Seek>(input: R, dest: &Path, depth: usize) -> Result<usize> {
    if depth > MAX_NESTING_DEPTH {
        anyhow::bail!("Archives nested deeper than {} levels at {}", MAX_NESTING_DEPTH, dest.display());
    }
    let mut archive = Psarc::read(input).with_context(|| format!("Failed to read archive for {}", dest.display()))?;
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut written = 0;
    for entry in archive.entries_mut() {
        let target = safe_join(dest, &entry.name)?;

        if is_archive_name(&entry.name) {
            debug!("Expanding nested archive {}", entry.name);
            entry.rewind()?;
            written += extract_nested(entry.data()?, &target.with_extension(""), depth + 1)?;
            entry.rewind()?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let mut file = File::create(&target).with_context(|| format!("Failed to create {}", target.display()))?;
            entry.copy_to(&mut file)?;
            written += 1;
        }
        entry.release();
    }
    Ok(written)
}

/// Join an archive entry name onto `dest`, refusing names that would escape it.
fn safe_join(dest: &Path, name: &str) -> Result<PathBuf> {
    let mut path = dest.to_path_buf();
    let mut parts = 0;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return Err(PackError::UnsafeEntryName(name.to_string()).into()),
        }
    }
    if parts == 0 {
        return Err(PackError::UnsafeEntryName(name.to_string()).into());
    }
    Ok(path)
}
