//! PSARC archive codec
//!
//! Reads and writes the flat, ordered archive container used by song
//! packages, and provides the AES stream wrapper applied to legacy desktop
//! packages. Entries are named byte streams; an entry may itself hold a
//! serialized archive.

pub mod core;
pub mod formats;

pub use crate::core::archive::{ArchiveError, Entry, ReadSeek};
pub use crate::core::crypto::{AesCipher, CryptoError, LegacyCipher};
pub use crate::formats::psarc::{normalize_entry_name, Psarc};

/// Extension carried by archive files and by archives nested in archives.
pub const PSARC_EXTENSION: &str = "psarc";

/// True when `name` ends with the archive extension (case-insensitive).
pub fn is_archive_name(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(PSARC_EXTENSION))
        .unwrap_or(false)
}
