//! Platform detection from file-system evidence
//!
//! Resolution never fails: unreadable or missing evidence degrades to a less
//! specific answer, and a path that does not exist resolves to
//! [`Platform::unknown`]. Callers decide whether an unknown platform is fatal.

use std::fs;
use std::path::Path;
use log::{debug, warn};
use crate::platform::{GamePlatform, GameVersion, Platform};
use crate::walker::files_in;

/// Marker file at the root of a legacy desktop package.
pub const LEGACY_APP_ID_FILE: &str = "APP_ID";
/// Marker file at the root of a current-format package.
pub const APP_ID_FILE: &str = "appid.appid";
/// Folder holding the payload of an unpacked Xbox 360 package.
pub const CONSOLE_ROOT_DIR: &str = "Root";

const MANIFEST_EXTENSION: &str = "nt";
const HEADER_EXTENSION: &str = "txt";

pub const LEGACY_XBOX_TITLE_ID: &str = "55530873";
pub const CURRENT_XBOX_TITLE_ID: &str = "555308C0";

/// Resolve the platform of `path`. An explicit override wins unconditionally.
pub fn resolve(path: &Path, explicit: Option<Platform>) -> Platform {
    if let Some(platform) = explicit {
        debug!("Using explicit platform {} for {}", platform, path.display());
        return platform;
    }

    let detected = if path.is_file() {
        resolve_file(path)
    } else if path.is_dir() {
        let by_content = resolve_directory(path);
        if by_content.is_unknown() {
            resolve_by_name_suffix(path)
        } else {
            by_content
        }
    } else {
        Platform::unknown()
    };

    debug!("Resolved {} as {}", path.display(), detected);
    detected
}

fn resolve_file(path: &Path) -> Platform {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "dat" => Platform::new(GamePlatform::Pc, GameVersion::Rs2012),
        "" => Platform::new(GamePlatform::XBox360, GameVersion::Rs2012),
        "edat" => Platform::new(GamePlatform::PS3, GameVersion::None),
        "psarc" => resolve_by_name_suffix(path),
        _ => Platform::unknown(),
    }
}

fn resolve_directory(dir: &Path) -> Platform {
    if dir.join(LEGACY_APP_ID_FILE).is_file() {
        return Platform::new(GamePlatform::Pc, GameVersion::Rs2012);
    }

    if dir.join(APP_ID_FILE).is_file() {
        let manifest = first_with_extension(dir, MANIFEST_EXTENSION).unwrap_or_default();
        return if manifest.contains("\"dx9\"") {
            Platform::new(GamePlatform::Pc, GameVersion::Rs2014)
        } else if manifest.contains("\"macos\"") {
            Platform::new(GamePlatform::Mac, GameVersion::Rs2014)
        } else {
            Platform::new(GamePlatform::Pc, GameVersion::None)
        };
    }

    if dir.join(CONSOLE_ROOT_DIR).is_dir() {
        let header = first_with_extension(dir, HEADER_EXTENSION).unwrap_or_default();
        return if header.contains(&format!("Title ID: {}", LEGACY_XBOX_TITLE_ID)) {
            Platform::new(GamePlatform::XBox360, GameVersion::Rs2012)
        } else if header.contains(&format!("Title ID: {}", CURRENT_XBOX_TITLE_ID)) {
            Platform::new(GamePlatform::XBox360, GameVersion::Rs2014)
        } else {
            warn!("Unrecognized title id in console header of {}", dir.display());
            Platform::new(GamePlatform::XBox360, GameVersion::None)
        };
    }

    match first_with_extension(dir, MANIFEST_EXTENSION) {
        Some(manifest) if manifest.contains("\"PS3\"") => Platform::new(GamePlatform::PS3, GameVersion::Rs2012),
        Some(manifest) if manifest.contains("\"ps3\"") => Platform::new(GamePlatform::PS3, GameVersion::Rs2014),
        Some(_) => resolve_by_name_suffix(dir),
        None => Platform::unknown(),
    }
}

/// Text of the first top-level file in `dir` with the given extension.
fn first_with_extension(dir: &Path, extension: &str) -> Option<String> {
    let files = match files_in(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("{:#}", e);
            return None;
        }
    };
    let path = files.into_iter().find(|f| {
        f.extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false)
    })?;
    match fs::read(&path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            Some(String::new())
        }
    }
}

/// Guess the platform from the trailing `_<tag>` of a file or directory name.
///
/// Directories carry a full platform name (`Song_PS3`) and resolve to unknown
/// when it does not match. Files carry a short code (`_p`, `_m`, `_ps3`,
/// `_xbox`) and default to PC when none matches.
pub fn resolve_by_name_suffix(path: &Path) -> Platform {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let split = stem.rfind('_');

    if path.is_dir() {
        let tag = match split {
            Some(i) => &stem[i + 1..],
            None => stem.as_str(),
        };
        return match GamePlatform::from_name(tag) {
            Some(platform) => Platform::new(platform, GameVersion::Rs2014),
            None => Platform::unknown(),
        };
    }

    let tag = split.map(|i| stem[i..].to_lowercase()).unwrap_or_default();
    let platform = match tag.as_str() {
        "_m" => GamePlatform::Mac,
        "_ps3" => GamePlatform::PS3,
        "_xbox" => GamePlatform::XBox360,
        _ => GamePlatform::Pc,
    };
    Platform::new(platform, GameVersion::Rs2014)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_with(name: &str, files: &[(&str, &str)]) -> (TempDir, std::path::PathBuf) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        for (file, content) in files {
            let path = dir.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        (tmp, dir)
    }

    #[test]
    fn legacy_app_id_marker() {
        let (_tmp, dir) = dir_with("song", &[("APP_ID", "206102")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::Pc, GameVersion::Rs2012));
    }

    #[test]
    fn current_manifest_tags() {
        let (_tmp, dir) = dir_with("song", &[("appid.appid", "248750"), ("song.nt", "<x \"dx9\"/>")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::Pc, GameVersion::Rs2014));

        let (_tmp, dir) = dir_with("song", &[("appid.appid", "248750"), ("song.nt", "<x \"macos\"/>")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::Mac, GameVersion::Rs2014));

        let (_tmp, dir) = dir_with("song", &[("appid.appid", "248750"), ("song.nt", "<x/>")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::Pc, GameVersion::None));
    }

    #[test]
    fn app_id_without_manifest_degrades() {
        let (_tmp, dir) = dir_with("song", &[("appid.appid", "248750")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::Pc, GameVersion::None));
    }

    #[test]
    fn console_root_title_ids() {
        let (_tmp, dir) = dir_with("song", &[("Root/a.bin", "a"), ("header.txt", "Title ID: 555308C0")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::XBox360, GameVersion::Rs2014));

        let (_tmp, dir) = dir_with("song", &[("Root/a.bin", "a"), ("header.txt", "Title ID: 55530873")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::XBox360, GameVersion::Rs2012));

        let (_tmp, dir) = dir_with("song", &[("Root/a.bin", "a"), ("header.txt", "Title ID: 12345678")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::XBox360, GameVersion::None));
    }

    #[test]
    fn ps3_manifest_casing() {
        let (_tmp, dir) = dir_with("song", &[("song.nt", "\"PS3\"")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::PS3, GameVersion::Rs2012));

        let (_tmp, dir) = dir_with("song", &[("song.nt", "\"ps3\"")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::PS3, GameVersion::Rs2014));
    }

    #[test]
    fn file_extensions() {
        let (_tmp, dir) = dir_with("pkgs", &[("a.dat", ""), ("a_xbox", ""), ("a.psarc.edat", ""), ("a.zip", "")]);
        assert_eq!(resolve(&dir.join("a.dat"), None), Platform::new(GamePlatform::Pc, GameVersion::Rs2012));
        assert_eq!(resolve(&dir.join("a_xbox"), None), Platform::new(GamePlatform::XBox360, GameVersion::Rs2012));
        assert_eq!(resolve(&dir.join("a.psarc.edat"), None), Platform::new(GamePlatform::PS3, GameVersion::None));
        assert_eq!(resolve(&dir.join("a.zip"), None), Platform::unknown());
    }

    #[test]
    fn psarc_file_name_suffixes() {
        let (_tmp, dir) = dir_with(
            "pkgs",
            &[("s_m.psarc", ""), ("s_ps3.psarc", ""), ("s_xbox.psarc", ""), ("s_p.psarc", ""), ("plain.psarc", "")],
        );
        let current = |p| Platform::new(p, GameVersion::Rs2014);
        assert_eq!(resolve(&dir.join("s_m.psarc"), None), current(GamePlatform::Mac));
        assert_eq!(resolve(&dir.join("s_ps3.psarc"), None), current(GamePlatform::PS3));
        assert_eq!(resolve(&dir.join("s_xbox.psarc"), None), current(GamePlatform::XBox360));
        assert_eq!(resolve(&dir.join("s_p.psarc"), None), current(GamePlatform::Pc));
        assert_eq!(resolve(&dir.join("plain.psarc"), None), current(GamePlatform::Pc));
    }

    #[test]
    fn name_suffix_fallback() {
        let (_tmp, dir) = dir_with("Song_PS3", &[("notes.bin", "x")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::PS3, GameVersion::Rs2014));

        let (_tmp, dir) = dir_with("Song_final", &[("notes.bin", "x")]);
        assert_eq!(resolve(&dir, None), Platform::unknown());

        let (_tmp, dir) = dir_with("Song_none", &[("notes.bin", "x")]);
        assert_eq!(resolve(&dir, None), Platform::unknown());

        let (_tmp, dir) = dir_with("pkgs", &[("track_xbox", "")]);
        assert_eq!(
            resolve_by_name_suffix(&dir.join("track_xbox")),
            Platform::new(GamePlatform::XBox360, GameVersion::Rs2014)
        );
        assert_eq!(
            resolve_by_name_suffix(&dir.join("track")),
            Platform::new(GamePlatform::Pc, GameVersion::Rs2014)
        );
    }

    #[test]
    fn manifest_without_ps3_tag_uses_name() {
        let (_tmp, dir) = dir_with("Song_Mac", &[("song.nt", "<x/>")]);
        assert_eq!(resolve(&dir, None), Platform::new(GamePlatform::Mac, GameVersion::Rs2014));
    }

    #[test]
    fn missing_path_is_unknown() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("Song_PS3");
        assert_eq!(resolve(&missing, None), Platform::unknown());
    }

    #[test]
    fn explicit_override_wins() {
        let tmp = TempDir::new().unwrap();
        let forced = Platform::new(GamePlatform::Mac, GameVersion::Rs2012);
        assert_eq!(resolve(&tmp.path().join("anything"), Some(forced)), forced);
    }

    #[test]
    fn resolution_is_deterministic() {
        let (_tmp, dir) = dir_with("song", &[("appid.appid", "1"), ("song.nt", "\"macos\"")]);
        let first = resolve(&dir, None);
        for _ in 0..5 {
            assert_eq!(resolve(&dir, None), first);
        }
    }
}
