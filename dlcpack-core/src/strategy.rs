//! Per-platform pack/unpack policies
//!
//! One strategy object per package layout, looked up by platform and version.

use std::path::{Path, PathBuf};
use anyhow::Result;
use crate::composer::ArchiveComposer;
use crate::decomposer::ArchiveDecomposer;
use crate::metadata::PackageMetadata;
use crate::platform::{GamePlatform, GameVersion, Platform};

/// One resolved pack request.
#[derive(Debug, Clone)]
pub struct PackJob {
    pub source: PathBuf,
    /// Output path without the platform extension.
    pub output: PathBuf,
    pub regenerate_sng: bool,
    pub metadata: PackageMetadata,
}

impl PackJob {
    pub fn platform(&self) -> Platform {
        self.metadata.platform
    }
}

pub trait PlatformStrategy: Sync {
    fn name(&self) -> &'static str;

    /// Build the package. Returns the path actually written.
    fn pack(&self, composer: &ArchiveComposer<'_>, job: &mut PackJob) -> Result<PathBuf>;

    /// Expand `source` under `output_dir`. Returns the created folder.
    fn unpack(
        &self,
        decomposer: &ArchiveDecomposer<'_>,
        source: &Path,
        output_dir: &Path,
        platform: Platform,
    ) -> Result<PathBuf>;
}

struct DesktopLegacy;
struct DesktopCurrent;
struct XBox360Package;
struct Ps3Edat;

impl PlatformStrategy for DesktopLegacy {
    fn name(&self) -> &'static str {
        "desktop legacy"
    }

    fn pack(&self, composer: &ArchiveComposer<'_>, job: &mut PackJob) -> Result<PathBuf> {
        composer.compose_legacy_desktop(&job.source, &job.output, &job.metadata, job.regenerate_sng)
    }

    fn unpack(&self, decomposer: &ArchiveDecomposer<'_>, source: &Path, output_dir: &Path, platform: Platform) -> Result<PathBuf> {
        decomposer.decompose_desktop(source, output_dir, platform)
    }
}

impl PlatformStrategy for DesktopCurrent {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn pack(&self, composer: &ArchiveComposer<'_>, job: &mut PackJob) -> Result<PathBuf> {
        composer.compose_current(&job.source, &job.output, &job.metadata, job.regenerate_sng)
    }

    fn unpack(&self, decomposer: &ArchiveDecomposer<'_>, source: &Path, output_dir: &Path, platform: Platform) -> Result<PathBuf> {
        decomposer.decompose_desktop(source, output_dir, platform)
    }
}

impl PlatformStrategy for XBox360Package {
    fn name(&self) -> &'static str {
        "xbox360"
    }

    fn pack(&self, composer: &ArchiveComposer<'_>, job: &mut PackJob) -> Result<PathBuf> {
        composer.compose_xbox360(&job.source, &job.output, &mut job.metadata, job.regenerate_sng)
    }

    fn unpack(&self, decomposer: &ArchiveDecomposer<'_>, source: &Path, output_dir: &Path, _platform: Platform) -> Result<PathBuf> {
        decomposer.decompose_xbox360(source, output_dir)
    }
}

impl PlatformStrategy for Ps3Edat {
    fn name(&self) -> &'static str {
        "ps3"
    }

    fn pack(&self, composer: &ArchiveComposer<'_>, job: &mut PackJob) -> Result<PathBuf> {
        composer.compose_ps3(&job.source, &job.output, &job.metadata, job.regenerate_sng)
    }

    fn unpack(&self, decomposer: &ArchiveDecomposer<'_>, source: &Path, output_dir: &Path, _platform: Platform) -> Result<PathBuf> {
        decomposer.decompose_ps3(source, output_dir)
    }
}

static STRATEGIES: &[(GamePlatform, GameVersion, &dyn PlatformStrategy)] = &[
    (GamePlatform::Pc, GameVersion::Rs2012, &DesktopLegacy),
    (GamePlatform::Pc, GameVersion::Rs2014, &DesktopCurrent),
    (GamePlatform::Mac, GameVersion::Rs2012, &DesktopLegacy),
    (GamePlatform::Mac, GameVersion::Rs2014, &DesktopCurrent),
    (GamePlatform::XBox360, GameVersion::Rs2012, &XBox360Package),
    (GamePlatform::XBox360, GameVersion::Rs2014, &XBox360Package),
    (GamePlatform::XBox360, GameVersion::None, &XBox360Package),
    (GamePlatform::PS3, GameVersion::Rs2012, &Ps3Edat),
    (GamePlatform::PS3, GameVersion::Rs2014, &Ps3Edat),
    (GamePlatform::PS3, GameVersion::None, &Ps3Edat),
];

/// Strategy for `platform`, if its layout is known. Desktop packages need a
/// known version; console packages do not.
pub fn strategy_for(platform: Platform) -> Option<&'static dyn PlatformStrategy> {
    STRATEGIES
        .iter()
        .find(|(p, v, _)| *p == platform.platform && *v == platform.version)
        .map(|(_, _, strategy)| *strategy)
}
