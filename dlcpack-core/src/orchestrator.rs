//! Pack/unpack entry points
//!
//! Resolves the platform once per top-level item, picks the strategy for it
//! and hands the item to the composer or decomposer. Batches run item by
//! item; a failing item is logged and the batch moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use log::{error, info};
use crate::composer::{delete_fixed_audio, ArchiveComposer};
use crate::crypto::PlatformCryptoAdapter;
use crate::decomposer::ArchiveDecomposer;
use crate::error::PackError;
use crate::metadata::{AudioLevels, PackageMetadata, DEFAULT_REVISION};
use crate::platform::Platform;
use crate::resolver;
use crate::settings::PackSettings;
use crate::sng::{ChartCompiler, ExternalChartCompiler};
use crate::strategy::{strategy_for, PackJob, PlatformStrategy};

/// Progress callback: (current, total, item)
pub type ProgressFn = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// The pluggable adapters one packer works with.
pub struct Collaborators {
    pub crypto: PlatformCryptoAdapter,
    pub chart_compiler: Option<Box<dyn ChartCompiler>>,
}

impl Collaborators {
    pub fn new(crypto: PlatformCryptoAdapter) -> Self {
        Self {
            crypto,
            chart_compiler: None,
        }
    }

    pub fn from_settings(settings: &PackSettings) -> Result<Self> {
        let mut collaborators = Self::new(PlatformCryptoAdapter::from_settings(settings)?);
        if let Some(command) = &settings.chart_compiler {
            collaborators.chart_compiler = Some(Box::new(ExternalChartCompiler::new(command.clone())));
        }
        Ok(collaborators)
    }

    pub fn with_chart_compiler(mut self, compiler: impl ChartCompiler + 'static) -> Self {
        self.chart_compiler = Some(Box::new(compiler));
        self
    }
}

#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Explicit platform; resolved from the source when `None`.
    pub platform: Option<Platform>,
    pub regenerate_sng: bool,
    /// Replaces the source's app id marker; `None` packs the marker as found.
    pub app_id: Option<String>,
    pub revision: String,
    /// Fills song manifest volumes left at 0 and is recorded in console headers.
    pub audio: AudioLevels,
    /// Remove leftover `*_fixed` audio from the source before packing.
    pub delete_fixed_audio: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            platform: None,
            regenerate_sng: false,
            app_id: None,
            revision: DEFAULT_REVISION.to_string(),
            audio: AudioLevels::default(),
            delete_fixed_audio: false,
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, anyhow::Error)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Packer {
    collaborators: Collaborators,
}

impl Packer {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    pub fn from_settings(settings: &PackSettings) -> Result<Self> {
        Ok(Self::new(Collaborators::from_settings(settings)?))
    }

    fn composer(&self) -> ArchiveComposer<'_> {
        ArchiveComposer::new(&self.collaborators.crypto, self.collaborators.chart_compiler.as_deref())
    }

    fn decomposer(&self) -> ArchiveDecomposer<'_> {
        ArchiveDecomposer::new(&self.collaborators.crypto)
    }

    /// Resolve `path` and look up its strategy. Nothing is written before this succeeds.
    pub fn resolve(&self, path: &Path, explicit: Option<Platform>) -> Result<(Platform, &'static dyn PlatformStrategy)> {
        let platform = resolver::resolve(path, explicit);
        if platform.is_unknown() {
            return Err(PackError::UnresolvedPlatform(path.to_path_buf()).into());
        }
        let strategy = strategy_for(platform).ok_or(PackError::UnsupportedPlatform(platform))?;
        Ok((platform, strategy))
    }

    fn prepare(&self, source: &Path, options: &PackOptions) -> Result<(&'static dyn PlatformStrategy, PackageMetadata)> {
        if !source.is_dir() {
            anyhow::bail!("Source folder '{}' not found.", source.display());
        }
        let (platform, strategy) = self.resolve(source, options.platform)?;

        if options.delete_fixed_audio {
            let removed = delete_fixed_audio(source)?;
            info!("Removed {} fixed audio files from {}", removed, source.display());
        }

        let mut metadata = PackageMetadata::from_directory(source, platform)?;
        metadata.app_id = options.app_id.clone();
        metadata.revision = options.revision.clone();
        metadata.audio = options.audio;
        metadata.normalize_combo_arrangements()?;
        Ok((strategy, metadata))
    }

    fn run_pack(&self, strategy: &dyn PlatformStrategy, mut job: PackJob) -> Result<PathBuf> {
        info!(
            "Packing {} as {} ({}, app id {}, {} arrangements)",
            job.source.display(),
            job.platform(),
            strategy.name(),
            job.metadata.app_id.as_deref().unwrap_or("from source"),
            job.metadata.arrangements.len()
        );
        let source = job.source.clone();
        strategy
            .pack(&self.composer(), &mut job)
            .with_context(|| format!("Failed to pack {}", source.display()))
    }

    /// Pack `source` to `output`. The platform's extension is appended to
    /// `output` where it has one. Returns the written package path.
    pub fn pack(&self, source: &Path, output: &Path, options: &PackOptions) -> Result<PathBuf> {
        let (strategy, metadata) = self.prepare(source, options)?;
        self.run_pack(
            strategy,
            PackJob {
                source: source.to_path_buf(),
                output: output.to_path_buf(),
                regenerate_sng: options.regenerate_sng,
                metadata,
            },
        )
    }

    /// Pack `source` into `output_dir`, naming the package `<name>_v<revision><suffix>`.
    pub fn pack_into(&self, source: &Path, output_dir: &Path, options: &PackOptions) -> Result<PathBuf> {
        let (strategy, metadata) = self.prepare(source, options)?;
        let output = output_dir.join(metadata.package_file_name());
        self.run_pack(
            strategy,
            PackJob {
                source: source.to_path_buf(),
                output,
                regenerate_sng: options.regenerate_sng,
                metadata,
            },
        )
    }

    /// Compose `source` for an already resolved platform.
    pub fn compose(&self, source: &Path, output: &Path, platform: Platform, regenerate_sng: bool) -> Result<PathBuf> {
        let strategy = strategy_for(platform).ok_or(PackError::UnsupportedPlatform(platform))?;
        let mut metadata = PackageMetadata::from_directory(source, platform)?;
        metadata.normalize_combo_arrangements()?;
        self.run_pack(
            strategy,
            PackJob {
                source: source.to_path_buf(),
                output: output.to_path_buf(),
                regenerate_sng,
                metadata,
            },
        )
    }

    /// Unpack `source` under `output_dir`. Returns the created folder.
    pub fn unpack(&self, source: &Path, output_dir: &Path, explicit: Option<Platform>) -> Result<PathBuf> {
        if !source.exists() {
            anyhow::bail!("File '{}' not found.", source.display());
        }
        let (platform, strategy) = self.resolve(source, explicit)?;
        info!("Unpacking {} as {} ({})", source.display(), platform, strategy.name());
        strategy
            .unpack(&self.decomposer(), source, output_dir, platform)
            .with_context(|| format!("Failed to unpack {}", source.display()))
    }

    /// Decompose `source` for an already resolved platform.
    pub fn decompose(&self, source: &Path, output_dir: &Path, platform: Platform) -> Result<PathBuf> {
        let strategy = strategy_for(platform).ok_or(PackError::UnsupportedPlatform(platform))?;
        strategy.unpack(&self.decomposer(), source, output_dir, platform)
    }

    pub fn pack_batch(
        &self,
        sources: &[PathBuf],
        output_dir: &Path,
        options: &PackOptions,
        progress: Option<ProgressFn>,
    ) -> BatchReport {
        run_batch(sources, progress, "pack", |source| self.pack_into(source, output_dir, options))
    }

    pub fn unpack_batch(
        &self,
        sources: &[PathBuf],
        output_dir: &Path,
        explicit: Option<Platform>,
        progress: Option<ProgressFn>,
    ) -> BatchReport {
        run_batch(sources, progress, "unpack", |source| self.unpack(source, output_dir, explicit))
    }
}

fn run_batch<F>(sources: &[PathBuf], progress: Option<ProgressFn>, action: &str, mut run: F) -> BatchReport
where
    F: FnMut(&Path) -> Result<PathBuf>,
{
    let mut report = BatchReport::default();
    let total = sources.len();

    for (i, source) in sources.iter().enumerate() {
        if let Some(ref cb) = progress {
            cb(i, total, &source.to_string_lossy());
        }
        match run(source) {
            Ok(path) => report.completed.push(path),
            Err(e) => {
                error!("Failed to {} {}: {:#}", action, source.display(), e);
                report.failed.push((source.clone(), e));
            }
        }
    }
    if let Some(ref cb) = progress {
        cb(total, total, "done");
    }

    info!("{} {} of {} items ({} failed)", action, report.completed.len(), total, report.failed.len());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{GamePlatform, GameVersion};
    use std::fs;
    use std::sync::Mutex;

    fn packer(dir: &Path) -> Packer {
        Packer::new(Collaborators::new(PlatformCryptoAdapter::new(dir.join("edat"))))
    }

    #[test]
    fn unresolved_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("plain_folder");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("readme.txt"), b"x").unwrap();

        let out = dir.path().join("out");
        let err = packer(dir.path()).pack_into(&source, &out, &PackOptions::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<PackError>(), Some(PackError::UnresolvedPlatform(_))));
        assert!(!out.exists());
    }

    #[test]
    fn unknown_desktop_version_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("song");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("appid.appid"), b"248750").unwrap();
        fs::write(source.join("song.nt"), b"no tag here").unwrap();

        let err = packer(dir.path())
            .resolve(&source, None)
            .map(|(platform, _)| platform)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackError>(),
            Some(PackError::UnsupportedPlatform(p)) if p.platform == GamePlatform::Pc && p.version == GameVersion::None
        ));
    }

    #[test]
    fn batch_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good_m");
        fs::create_dir_all(good.join("songs")).unwrap();
        fs::write(good.join("songs/a.txt"), b"a").unwrap();
        let missing = dir.path().join("missing");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let progress: ProgressFn = Arc::new(move |current: usize, total: usize, _item: &str| {
            seen.lock().unwrap().push((current, total));
        });

        let options = PackOptions {
            platform: Some(Platform::new(GamePlatform::Mac, GameVersion::Rs2014)),
            ..PackOptions::default()
        };
        let report = packer(dir.path()).pack_batch(
            &[missing.clone(), good.clone()],
            &dir.path().join("out"),
            &options,
            Some(progress),
        );

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, missing);
        assert_eq!(report.completed, [dir.path().join("out/good_m_v1_m.psarc")]);
        assert_eq!(*calls.lock().unwrap(), [(0, 2), (1, 2), (2, 2)]);
    }
}
