use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Settings file picked up from the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "dlcpack.json";

/// External DRM wrap/unwrap tool. It runs with the staging directory as its
/// working directory and processes every file it finds there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmToolCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub encrypt_args: Vec<String>,
    #[serde(default)]
    pub decrypt_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartCompilerCommand {
    pub program: PathBuf,
    #[serde(default = "default_compile_args")]
    pub compile_args: Vec<String>,
    #[serde(default = "default_showlight_args")]
    pub showlight_args: Vec<String>,
}

fn default_compile_args() -> Vec<String> {
    ["--input", "{input}", "--output", "{output}", "--arrangement", "{arrangement}", "--platform", "{platform}", "--version", "{version}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_showlight_args() -> Vec<String> {
    vec!["--showlights".to_string(), "{input}".to_string()]
}

/// Literal phrases the DRM tool prints on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessPhrases {
    pub encrypt: String,
    pub decrypt: String,
}

impl Default for SuccessPhrases {
    fn default() -> Self {
        Self {
            encrypt: "Encrypt all EDAT files successfully".to_string(),
            decrypt: "Decrypt all EDAT files successfully".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackSettings {
    /// Hex AES key of legacy desktop packages (16, 24 or 32 bytes).
    pub legacy_key: Option<String>,
    /// Hex IV of legacy desktop packages. Zeroes when unset.
    pub legacy_iv: Option<String>,
    /// Staging directory shared with the DRM tool (defaults to `edat/` next to the executable)
    pub edat_staging_dir: Option<PathBuf>,
    pub drm_tool: Option<DrmToolCommand>,
    pub chart_compiler: Option<ChartCompilerCommand>,
    pub success_phrases: SuccessPhrases,
}

impl PackSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read settings {}", path.display()))?;
        let settings =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse settings {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load `explicit`, else `dlcpack.json` in the working directory when it exists, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let local = Path::new(DEFAULT_SETTINGS_FILE);
        if local.is_file() {
            return Self::load(local);
        }
        debug!("No settings file, using defaults");
        Ok(Self::default())
    }

    pub fn staging_dir(&self) -> PathBuf {
        if let Some(dir) = &self.edat_staging_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|p| p.join("edat")))
            .unwrap_or_else(|| PathBuf::from("edat"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlcpack.json");
        fs::write(
            &path,
            r#"{ "legacy_key": "00ff", "drm_tool": { "program": "TrueAncestor" }, "chart_compiler": { "program": "sngc" } }"#,
        )
        .unwrap();

        let settings = PackSettings::load(&path).unwrap();
        assert_eq!(settings.legacy_key.as_deref(), Some("00ff"));
        assert_eq!(settings.success_phrases, SuccessPhrases::default());
        assert!(settings.drm_tool.unwrap().encrypt_args.is_empty());
        assert_eq!(settings.chart_compiler.unwrap().compile_args, default_compile_args());
    }

    #[test]
    fn explicit_staging_dir_wins() {
        let settings = PackSettings {
            edat_staging_dir: Some(PathBuf::from("/tmp/edat")),
            ..PackSettings::default()
        };
        assert_eq!(settings.staging_dir(), PathBuf::from("/tmp/edat"));
        assert!(PackSettings::default().staging_dir().ends_with("edat"));
    }

    #[test]
    fn bad_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(PackSettings::load(&path).is_err());
    }
}
