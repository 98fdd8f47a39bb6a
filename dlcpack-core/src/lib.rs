//! Song package packing and unpacking
//!
//! Resolves the target platform of a package folder or file, composes a
//! folder into the platform's package layout (flat or nested archives,
//! legacy cipher, console container, DRM-wrapped archive) and decomposes
//! packages back into folders.

pub mod composer;
pub mod crypto;
pub mod decomposer;
pub mod error;
pub mod fsutil;
pub mod header;
pub mod metadata;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod settings;
pub mod sng;
pub mod strategy;
pub mod walker;

pub use composer::ArchiveComposer;
pub use crypto::{
    ConsoleContainer, ConsolePackage, ContentCipher, DrmDirection, DrmTool, OutcomeClassifier,
    PlatformCryptoAdapter, SuccessPhraseClassifier,
};
pub use decomposer::ArchiveDecomposer;
pub use error::PackError;
pub use header::{parse_header, ConsoleHeader, SongInfo};
pub use metadata::PackageMetadata;
pub use orchestrator::{BatchReport, Collaborators, PackOptions, Packer, ProgressFn};
pub use platform::{GamePlatform, GameVersion, Platform};
pub use resolver::{resolve, resolve_by_name_suffix};
pub use settings::PackSettings;
pub use sng::{ArrangementType, ChartCompiler};
pub use walker::{DirectoryWalk, WalkEntry};
