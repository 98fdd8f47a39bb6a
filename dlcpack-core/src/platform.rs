//! Platform and format version model

use std::fmt;
use std::str::FromStr;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use crate::error::PackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GamePlatform {
    Pc,
    Mac,
    XBox360,
    PS3,
    #[default]
    None,
}

/// Chart/format generation. `Rs2012` is the legacy format, `Rs2014` the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameVersion {
    Rs2012,
    Rs2014,
    #[default]
    None,
}

impl GamePlatform {
    pub const ALL: [GamePlatform; 4] = [GamePlatform::Pc, GamePlatform::Mac, GamePlatform::XBox360, GamePlatform::PS3];

    pub fn name(self) -> &'static str {
        match self {
            GamePlatform::Pc => "Pc",
            GamePlatform::Mac => "Mac",
            GamePlatform::XBox360 => "XBox360",
            GamePlatform::PS3 => "PS3",
            GamePlatform::None => "None",
        }
    }

    /// Case-insensitive lookup of a known platform. `None` is never matched.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn is_console(self) -> bool {
        matches!(self, GamePlatform::XBox360 | GamePlatform::PS3)
    }
}

impl GameVersion {
    pub fn name(self) -> &'static str {
        match self {
            GameVersion::Rs2012 => "RS2012",
            GameVersion::Rs2014 => "RS2014",
            GameVersion::None => "None",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rs2012" | "rs1" | "legacy" => Some(GameVersion::Rs2012),
            "rs2014" | "rs2" | "current" => Some(GameVersion::Rs2014),
            _ => None,
        }
    }
}

impl fmt::Display for GamePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GamePlatform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("{} is not a valid platform (Pc, Mac, XBox360, PS3)", s))
    }
}

impl FromStr for GameVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("{} is not a valid game version (RS2012, RS2014)", s))
    }
}

/// Target platform plus format version of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Platform {
    pub platform: GamePlatform,
    pub version: GameVersion,
}

impl Platform {
    pub const fn new(platform: GamePlatform, version: GameVersion) -> Self {
        Self { platform, version }
    }

    pub const fn unknown() -> Self {
        Self::new(GamePlatform::None, GameVersion::None)
    }

    /// Build an explicit override. Both halves or neither must be given.
    pub fn from_override(platform: Option<GamePlatform>, version: Option<GameVersion>) -> Result<Option<Self>> {
        let platform = platform.unwrap_or_default();
        let version = version.unwrap_or_default();
        match (platform, version) {
            (GamePlatform::None, GameVersion::None) => Ok(None),
            (GamePlatform::None, _) | (_, GameVersion::None) => {
                Err(PackError::PartialPlatform { platform, version }.into())
            }
            _ => Ok(Some(Self::new(platform, version))),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.platform == GamePlatform::None
    }

    pub fn is_console(&self) -> bool {
        self.platform.is_console()
    }

    pub fn is_legacy(&self) -> bool {
        self.version == GameVersion::Rs2012
    }

    /// Short file-name suffix used in generated package names.
    pub fn suffix(&self) -> &'static str {
        match self.platform {
            GamePlatform::Pc => "_p",
            GamePlatform::Mac => "_m",
            GamePlatform::XBox360 => "_xbox",
            GamePlatform::PS3 => "_ps3",
            GamePlatform::None => "",
        }
    }

    /// Per-platform folder holding compiled charts.
    pub fn bin_dir(&self) -> &'static str {
        match (self.version, self.platform) {
            (GameVersion::Rs2012, GamePlatform::Mac) => "Mac",
            (GameVersion::Rs2012, GamePlatform::XBox360) => "XBox360",
            (GameVersion::Rs2012, GamePlatform::PS3) => "PS3",
            (GameVersion::Rs2012, _) => "Generic",
            (_, GamePlatform::Mac) => "macos",
            (_, GamePlatform::XBox360) => "xbox360",
            (_, GamePlatform::PS3) => "ps3",
            _ => "generic",
        }
    }

    /// Extension of the final package file, without the leading dot.
    pub fn package_extension(&self) -> Option<&'static str> {
        match (self.platform, self.version) {
            (GamePlatform::XBox360, _) => None,
            (GamePlatform::PS3, _) => Some("psarc.edat"),
            (_, GameVersion::Rs2012) => Some("dat"),
            _ => Some("psarc"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.platform, self.version)
    }
}
