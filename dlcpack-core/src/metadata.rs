use std::fmt;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use console_pkg::{AudioInfo, License, PackageHeader, SignatureType};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::PackError;
use crate::header::{ConsoleHeader, SongInfo};
use crate::platform::{GameVersion, Platform};
use crate::resolver::{CURRENT_XBOX_TITLE_ID, LEGACY_XBOX_TITLE_ID};
use crate::sng::{chart_sources, is_showlight};

pub const DEFAULT_REVISION: &str = "1";
pub const DEFAULT_QUALITY: u8 = 4;
pub const DEFAULT_DECIBELS: i16 = -12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrangementName {
    Lead,
    Rhythm,
    Combo,
    Bass,
    Vocals,
}

impl ArrangementName {
    /// Arrangement named by the part after the last `_` of a chart file stem.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();
        let tag = tag.trim_end_matches(|c: char| c.is_ascii_digit());
        match tag {
            "lead" => Some(ArrangementName::Lead),
            "rhythm" => Some(ArrangementName::Rhythm),
            "combo" => Some(ArrangementName::Combo),
            "bass" => Some(ArrangementName::Bass),
            "vocals" | "vocal" | "jvocals" => Some(ArrangementName::Vocals),
            _ => None,
        }
    }
}

impl fmt::Display for ArrangementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrangement {
    pub name: ArrangementName,
    pub chart: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioLevels {
    pub volume: i16,
    pub preview_volume: i16,
    pub quality: u8,
}

impl Default for AudioLevels {
    fn default() -> Self {
        Self {
            volume: DEFAULT_DECIBELS,
            preview_volume: DEFAULT_DECIBELS,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl AudioLevels {
    /// Give every song and preview volume a manifest leaves at 0 these levels.
    /// Returns the rewritten manifest, or `None` when nothing was unset.
    pub fn fill_unset_volumes(&self, manifest: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut json: Value = serde_json::from_slice(manifest).context("manifest is not valid JSON")?;
        let mut filled = false;

        let entries = json.get_mut("Entries").and_then(Value::as_object_mut);
        for entry in entries.into_iter().flat_map(|entries| entries.values_mut()) {
            let Some(attributes) = entry.get_mut("Attributes").and_then(Value::as_object_mut) else {
                continue;
            };
            for (key, level) in [("SongVolume", self.volume), ("PreviewVolume", self.preview_volume)] {
                if let Some(value) = attributes.get_mut(key) {
                    if value.as_f64() == Some(0.0) {
                        *value = Value::from(f64::from(level));
                        filled = true;
                    }
                }
            }
        }

        if !filled {
            return Ok(None);
        }
        Ok(Some(serde_json::to_vec_pretty(&json)?))
    }
}

/// Everything known about one package besides its file tree.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub name: String,
    pub platform: Platform,
    /// Written over the package's app id marker. `None` keeps the source's own.
    pub app_id: Option<String>,
    pub revision: String,
    pub arrangements: Vec<Arrangement>,
    pub audio: AudioLevels,
    pub song_info: Option<SongInfo>,
    pub signature: SignatureType,
    pub licenses: Vec<License>,
    pub title_id: Option<String>,
}

impl PackageMetadata {
    pub fn new(name: &str, platform: Platform) -> Self {
        Self {
            name: valid_name(name),
            platform,
            app_id: None,
            revision: DEFAULT_REVISION.to_string(),
            arrangements: Vec::new(),
            audio: AudioLevels::default(),
            song_info: None,
            signature: SignatureType::default(),
            licenses: Vec::new(),
            title_id: None,
        }
    }

    /// Name the package after `dir` and collect arrangements from its chart files.
    pub fn from_directory(dir: &Path, platform: Platform) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        let mut metadata = Self::new(&name, platform);

        for chart in chart_sources(dir, platform)? {
            if is_showlight(&chart) {
                continue;
            }
            let stem = chart.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let Some((_, tag)) = stem.rsplit_once('_') else {
                continue;
            };
            if let Some(name) = ArrangementName::from_tag(tag) {
                debug!("Arrangement {} from {}", name, chart.display());
                metadata.arrangements.push(Arrangement { name, chart });
            }
        }
        Ok(metadata)
    }

    /// Rename Combo arrangements so the game recognizes them: the first
    /// becomes Rhythm, the second Lead. A third is an error.
    pub fn normalize_combo_arrangements(&mut self) -> Result<()> {
        let mut combos = 0;
        for arrangement in &mut self.arrangements {
            if arrangement.name != ArrangementName::Combo {
                continue;
            }
            combos += 1;
            arrangement.name = match combos {
                1 => ArrangementName::Rhythm,
                2 => ArrangementName::Lead,
                _ => return Err(PackError::TooManyComboArrangements.into()),
            };
        }
        Ok(())
    }

    /// `<name>_v<revision>` plus the platform suffix, without extension.
    pub fn package_file_name(&self) -> String {
        format!("{}_v{}{}", self.name, self.revision.replace('.', "_"), self.platform.suffix())
    }

    pub fn apply_console_header(&mut self, header: ConsoleHeader) {
        self.signature = header.signature;
        self.licenses = header.licenses;
        if header.song_info.is_some() {
            self.song_info = header.song_info;
        }
        if self.title_id.is_none() {
            self.title_id = header.title_id;
        }
    }

    pub fn to_package_header(&self) -> PackageHeader {
        let (display_name, title, artist) = match &self.song_info {
            Some(info) => (info.display_name.clone(), info.title.clone(), info.artist.clone()),
            None => (self.name.clone(), self.name.clone(), String::new()),
        };
        let title_id = match self.platform.version {
            GameVersion::Rs2012 => Some(LEGACY_XBOX_TITLE_ID.to_string()),
            GameVersion::Rs2014 => Some(CURRENT_XBOX_TITLE_ID.to_string()),
            GameVersion::None => self.title_id.clone(),
        };
        PackageHeader {
            display_name,
            title,
            artist,
            signature: self.signature,
            licenses: self.licenses.clone(),
            title_id,
            content_version: self.platform.version.to_string(),
            app_id: self.app_id.clone(),
            audio: Some(AudioInfo {
                volume: self.audio.volume,
                preview_volume: self.audio.preview_volume,
                quality: self.audio.quality,
            }),
        }
    }
}

/// Keep letters, digits, `-` and `_`; everything else becomes `_`.
pub fn valid_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "package".to_string()
    } else {
        cleaned
    }
}
