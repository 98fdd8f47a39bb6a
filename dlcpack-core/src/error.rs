use std::path::PathBuf;
use thiserror::Error;
use crate::platform::{GamePlatform, GameVersion, Platform};

/// Packing pipeline errors
///
/// Raised through `anyhow`; callers recover the kind with `downcast_ref`.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("Could not determine the package platform for {0}")]
    UnresolvedPlatform(PathBuf),

    #[error("Platform and version must be given together (platform: {platform}, version: {version})")]
    PartialPlatform {
        platform: GamePlatform,
        version: GameVersion,
    },

    #[error("Unsupported package platform: {0}")]
    UnsupportedPlatform(Platform),

    #[error("Console header file not found or invalid: {0}")]
    MalformedHeader(String),

    #[error("Encryption tool did not report success, unverified output left at {}:\n{output}", artifact.display())]
    EncryptionToolFailure { output: String, artifact: PathBuf },

    #[error("Too many Combo arrangements")]
    TooManyComboArrangements,

    #[error("Two source files map to the same archive entry: {0}")]
    DuplicateEntry(String),

    #[error("Archive entry escapes the output directory: {0}")]
    UnsafeEntryName(String),

    #[error("No legacy package key configured (set legacy_key in the settings file)")]
    MissingKey,

    #[error("No {0} configured")]
    MissingTool(&'static str),
}
