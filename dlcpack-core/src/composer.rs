//! Directory to package composition
//!
//! Each function builds one platform's package layout from a source tree:
//! flat or nested archives, then the platform's cipher, container or DRM
//! wrapper. Input files are opened as archive entries and closed as soon
//! as the archive that holds them has been written.

use std::fs::{self, File};
use std::io::{Cursor, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use psarc::{normalize_entry_name, Psarc, PSARC_EXTENSION};
use crate::crypto::{DrmDirection, PlatformCryptoAdapter};
use crate::error::PackError;
use crate::fsutil::{file_name_of, move_file, remove_best_effort, with_suffix_extension, write_atomically, ScratchFiles};
use crate::header::{find_header_file, read_header_file};
use crate::metadata::{AudioLevels, PackageMetadata};
use crate::platform::{GamePlatform, GameVersion, Platform};
use crate::resolver::{APP_ID_FILE, CONSOLE_ROOT_DIR, LEGACY_APP_ID_FILE};
use crate::sng::{ChartCompiler, SngRegenerator};
use crate::walker::{dirs_in, files_in, find_files, lower_file_name, DirectoryWalk};

/// Generated index file removed before legacy packing.
pub const NAMES_BLOCK_FILE: &str = "NamesBlock.bin";
const TONE_FOLDER_MARKER: &str = "dlc_tone_";
const EDAT_EXTENSION: &str = "edat";
/// Legacy charts are compiled for the PC layout whatever the target platform.
const LEGACY_CHART_PLATFORM: Platform = Platform::new(GamePlatform::Pc, GameVersion::Rs2012);

pub struct ArchiveComposer<'a> {
    crypto: &'a PlatformCryptoAdapter,
    charts: Option<&'a dyn ChartCompiler>,
}

impl<'a> ArchiveComposer<'a> {
    pub fn new(crypto: &'a PlatformCryptoAdapter, charts: Option<&'a dyn ChartCompiler>) -> Self {
        Self { crypto, charts }
    }

    fn regenerator(&self) -> Result<SngRegenerator<'a>> {
        let compiler = self.charts.ok_or(PackError::MissingTool("chart compiler"))?;
        Ok(SngRegenerator::new(compiler))
    }

    /// Legacy desktop package: top-level files stay flat, every top-level
    /// folder becomes one nested archive. Written as `<output>.dat`.
    pub fn compose_legacy_desktop(
        &self,
        source: &Path,
        output: &Path,
        metadata: &PackageMetadata,
        regenerate: bool,
    ) -> Result<PathBuf> {
        let platform = metadata.platform;
        self.crypto.ensure_cipher(platform)?;
        delete_names_blocks(source);
        let output = with_suffix_extension(output, "dat");

        let mut outer = Psarc::new();
        for file in files_in(source)? {
            let name = file_name_of(&file);
            if metadata.app_id.is_some() && name == LEGACY_APP_ID_FILE {
                continue;
            }
            add_file(&mut outer, &name, &file)?;
        }
        if let Some(app_id) = &metadata.app_id {
            add_bytes(&mut outer, LEGACY_APP_ID_FILE, app_id.as_bytes().to_vec())?;
        }

        for dir in dirs_in(source)? {
            let dir_name = file_name_of(&dir);
            if regenerate && !dir_name.to_lowercase().contains(TONE_FOLDER_MARKER) {
                self.regenerator()?.regenerate_legacy(&dir, LEGACY_CHART_PLATFORM)?;
            }

            let mut inner = package_archive(&dir, &metadata.audio, None)?;
            let mut spool = tempfile::tempfile().context("Failed to create inner archive scratch file")?;
            inner
                .write(&mut spool, false)
                .with_context(|| format!("Failed to build inner archive for {}", dir.display()))?;
            release_all(&mut inner);

            let name = format!("{}.{}", dir_name, PSARC_EXTENSION);
            ensure_unique(&outer, &name)?;
            outer.add_entry(&name, spool)?;
        }

        let mut plain = tempfile::tempfile().context("Failed to create package scratch file")?;
        outer.write(&mut plain, false)?;
        release_all(&mut outer);
        plain.seek(SeekFrom::Start(0))?;

        write_atomically(&output, |file| {
            self.crypto.wrap(platform, &mut plain, file)?;
            Ok(())
        })?;
        info!("Wrote legacy package {}", output.display());
        Ok(output)
    }

    /// Current-format package: the whole tree as one flat archive, written
    /// as `<output>.psarc`. Console targets are stored uncompressed.
    pub fn compose_current(
        &self,
        source: &Path,
        output: &Path,
        metadata: &PackageMetadata,
        regenerate: bool,
    ) -> Result<PathBuf> {
        let platform = metadata.platform;
        if regenerate {
            self.regenerator()?.regenerate_current(source, platform)?;
        }
        let output = with_suffix_extension(output, PSARC_EXTENSION);

        let app_id = metadata.app_id.as_deref().map(|id| (APP_ID_FILE, id));
        let mut archive = package_archive(source, &metadata.audio, app_id)?;
        let compress = !platform.is_console();
        write_atomically(&output, |file| archive.write(file, compress))?;
        release_all(&mut archive);

        info!("Wrote {} entries to {} (compressed: {})", archive.len(), output.display(), compress);
        Ok(output)
    }

    /// Xbox 360 package: one archive per folder under `Root/`, then a signed
    /// console package holding the top-level files and `Root/`. Charts are
    /// only regenerated for current-format packages.
    pub fn compose_xbox360(
        &self,
        source: &Path,
        output: &Path,
        metadata: &mut PackageMetadata,
        regenerate: bool,
    ) -> Result<PathBuf> {
        let platform = metadata.platform;
        let header = find_header_file(source)?;
        metadata.apply_console_header(read_header_file(&header)?);

        let root = source.join(CONSOLE_ROOT_DIR);
        if !root.is_dir() {
            anyhow::bail!("Console package source {} has no {} folder", source.display(), CONSOLE_ROOT_DIR);
        }

        let mut generated = ScratchFiles::new();
        for dir in dirs_in(&root)? {
            let target = root.join(format!("{}.{}", file_name_of(&dir), PSARC_EXTENSION));
            if target.exists() {
                return Err(PackError::DuplicateEntry(format!("{}/{}", CONSOLE_ROOT_DIR, file_name_of(&target))).into());
            }
            generated.track(target.clone());

            if regenerate && platform.version == GameVersion::Rs2014 {
                self.regenerator()?.regenerate_current(&dir, platform)?;
            }
            let mut inner = package_archive(&dir, &metadata.audio, None)?;
            write_atomically(&target, |file| inner.write(file, false))?;
            release_all(&mut inner);
            debug!("Wrote inner archive {}", target.display());
        }

        let mut files = Vec::new();
        for file in files_in(source)? {
            files.push((file_name_of(&file), file));
        }
        for file in files_in(&root)? {
            files.push((format!("{}/{}", CONSOLE_ROOT_DIR, file_name_of(&file)), file));
        }

        let package_header = metadata.to_package_header();
        self.crypto
            .console()
            .build_package(output, &package_header, &files)
            .with_context(|| format!("Failed to build console package {}", output.display()))?;

        info!(
            "Wrote console package {} ({} licenses, {} inner archives)",
            output.display(),
            package_header.licenses.len(),
            generated.paths().len()
        );
        Ok(output.to_path_buf())
    }

    /// PS3 package: a current-format archive run through the DRM tool.
    ///
    /// On success the result is `<output>.psarc.edat`. When the tool does not
    /// report success, the clean archive is moved back to `<output>.psarc` and
    /// [`PackError::EncryptionToolFailure`] carries the tool's report.
    pub fn compose_ps3(
        &self,
        source: &Path,
        output: &Path,
        metadata: &PackageMetadata,
        regenerate: bool,
    ) -> Result<PathBuf> {
        self.crypto.ensure_drm_tool()?;
        let base = strip_edat(output);
        let clean = self.compose_current(source, &base, metadata, regenerate)?;

        let staging = self.crypto.staging_dir();
        let clean_name = file_name_of(&clean);
        let staged = staging.join(&clean_name);
        let encrypted = staging.join(format!("{}.{}", clean_name, EDAT_EXTENSION));
        remove_best_effort(&encrypted);
        move_file(&clean, &staged)?;

        let outcome = match self.crypto.run_drm(DrmDirection::Encrypt) {
            Ok(outcome) => outcome,
            Err(e) => {
                move_file(&staged, &clean)?;
                return Err(e);
            }
        };

        if outcome.succeeded && encrypted.is_file() {
            let target = with_suffix_extension(&clean, EDAT_EXTENSION);
            move_file(&encrypted, &target)?;
            remove_best_effort(&staged);
            info!("Wrote encrypted package {}", target.display());
            return Ok(target);
        }

        warn!("DRM tool did not encrypt {}", clean.display());
        move_file(&staged, &clean)?;
        remove_best_effort(&encrypted);
        Err(PackError::EncryptionToolFailure {
            output: outcome.report,
            artifact: clean,
        }
        .into())
    }
}

/// Every file under `dir` as one archive, named by its `/`-joined relative path.
///
/// Song manifests get `audio` where their own volumes are unset. With
/// `app_id` as `(marker, id)`, the marker file is replaced by one holding `id`.
pub fn package_archive(dir: &Path, audio: &AudioLevels, app_id: Option<(&str, &str)>) -> Result<Psarc> {
    let mut archive = Psarc::new();
    for entry in &DirectoryWalk::new(dir) {
        let entry = entry?;
        if app_id.is_some_and(|(marker, _)| entry.name == marker) {
            continue;
        }
        if is_manifest(&entry.name) {
            if let Some(filled) = filled_manifest(&entry.path, audio)? {
                debug!("Filled unset volumes in {}", entry.name);
                add_bytes(&mut archive, &entry.name, filled)?;
                continue;
            }
        }
        add_file(&mut archive, &entry.name, &entry.path)?;
    }
    if let Some((marker, id)) = app_id {
        add_bytes(&mut archive, marker, id.as_bytes().to_vec())?;
    }
    Ok(archive)
}

fn is_manifest(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("manifests/") && name.ends_with(".json")
}

fn filled_manifest(path: &Path, audio: &AudioLevels) -> Result<Option<Vec<u8>>> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match audio.fill_unset_volumes(&raw) {
        Ok(filled) => Ok(filled),
        Err(e) => {
            warn!("Leaving manifest {} unchanged: {:#}", path.display(), e);
            Ok(None)
        }
    }
}

fn add_file(archive: &mut Psarc, name: &str, path: &Path) -> Result<()> {
    ensure_unique(archive, name)?;
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let length = file.metadata()?.len();
    archive.add_entry_with_length(name, Box::new(file), length)
}

fn add_bytes(archive: &mut Psarc, name: &str, data: Vec<u8>) -> Result<()> {
    ensure_unique(archive, name)?;
    archive.add_entry(name, Cursor::new(data))
}

fn ensure_unique(archive: &Psarc, name: &str) -> Result<()> {
    let normalized = normalize_entry_name(name);
    if archive.contains(&normalized) {
        return Err(PackError::DuplicateEntry(normalized).into());
    }
    Ok(())
}

fn release_all(archive: &mut Psarc) {
    for entry in archive.entries_mut() {
        entry.release();
    }
}

fn strip_edat(output: &Path) -> PathBuf {
    let name = file_name_of(output);
    let lower = name.to_ascii_lowercase();
    match lower.strip_suffix(&format!(".{}", EDAT_EXTENSION)) {
        Some(rest) => output.with_file_name(&name[..rest.len()]),
        None => output.to_path_buf(),
    }
}

/// Remove stale `NamesBlock.bin` files anywhere under `dir`. Failures are logged.
pub fn delete_names_blocks(dir: &Path) {
    let stale = match find_files(dir, |p| file_name_of(p) == NAMES_BLOCK_FILE) {
        Ok(found) => found,
        Err(e) => {
            warn!("Failed to look for {} files: {:#}", NAMES_BLOCK_FILE, e);
            return;
        }
    };
    for path in stale {
        debug!("Removing stale {}", path.display());
        remove_best_effort(&path);
    }
}

/// Remove leftover `*_fixed.ogg` / `*_fixed.wem` audio anywhere under `dir`.
pub fn delete_fixed_audio(dir: &Path) -> Result<usize> {
    let fixed = find_files(dir, |p| {
        let name = lower_file_name(p);
        name.contains("_fixed.") && (name.ends_with(".ogg") || name.ends_with(".wem"))
    })?;
    for path in &fixed {
        fs::remove_file(path).with_context(|| format!("Can't delete fixed audio file {}", path.display()))?;
    }
    Ok(fixed.len())
}
