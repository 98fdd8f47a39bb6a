//! Per-platform encryption and container wrappers
//!
//! [`PlatformCryptoAdapter`] owns every pluggable transform the pipeline
//! applies to a finished archive: the legacy desktop cipher, the console
//! package container and the external DRM tool with its outcome classifier.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use anyhow::{Context, Result};
use console_pkg::{Package, PackageBuilder, PackageHeader, ZstdCodec};
use log::{debug, info};
use psarc::LegacyCipher;
use crate::error::PackError;
use crate::platform::{GamePlatform, GameVersion, Platform};
use crate::settings::{DrmToolCommand, PackSettings, SuccessPhrases};

/// Symmetric whole-file cipher of legacy desktop packages.
pub trait ContentCipher: Send + Sync {
    fn encrypt_file(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64>;
    fn decrypt_file(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64>;
}

impl ContentCipher for LegacyCipher {
    fn encrypt_file(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        self.encrypt_stream(input, output)
    }

    fn decrypt_file(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        self.decrypt_stream(input, output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmDirection {
    Encrypt,
    Decrypt,
}

pub trait DrmTool: Send + Sync {
    /// Process every file in `staging_dir` and return the tool's text report.
    fn run(&self, direction: DrmDirection, staging_dir: &Path) -> Result<String>;
}

/// Decides from a tool report whether the DRM step worked.
pub trait OutcomeClassifier: Send + Sync {
    fn succeeded(&self, direction: DrmDirection, report: &str) -> bool;
}

/// Success means the report contains the configured literal phrase.
#[derive(Debug, Clone, Default)]
pub struct SuccessPhraseClassifier {
    phrases: SuccessPhrases,
}

impl SuccessPhraseClassifier {
    pub fn new(phrases: SuccessPhrases) -> Self {
        Self { phrases }
    }
}

impl OutcomeClassifier for SuccessPhraseClassifier {
    fn succeeded(&self, direction: DrmDirection, report: &str) -> bool {
        let phrase = match direction {
            DrmDirection::Encrypt => &self.phrases.encrypt,
            DrmDirection::Decrypt => &self.phrases.decrypt,
        };
        report.contains(phrase.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ExternalDrmTool {
    command: DrmToolCommand,
}

impl ExternalDrmTool {
    pub fn new(command: DrmToolCommand) -> Self {
        Self { command }
    }
}

impl DrmTool for ExternalDrmTool {
    fn run(&self, direction: DrmDirection, staging_dir: &Path) -> Result<String> {
        let args = match direction {
            DrmDirection::Encrypt => &self.command.encrypt_args,
            DrmDirection::Decrypt => &self.command.decrypt_args,
        };
        let output = Command::new(&self.command.program)
            .args(args)
            .current_dir(staging_dir)
            .output()
            .with_context(|| format!("Failed to execute DRM tool {}", self.command.program.display()))?;

        debug!("DRM tool exited with {}", output.status);
        let mut report = String::from_utf8_lossy(&output.stdout).into_owned();
        report.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(report)
    }
}

/// An opened console package.
pub trait ConsolePackage {
    fn header(&self) -> &PackageHeader;
    fn extract_payload(&mut self, dest: &Path) -> Result<Vec<PathBuf>>;
    fn close(self: Box<Self>);
}

pub trait ConsoleContainer: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ConsolePackage>>;

    /// Build a package holding `files` (archive name, source path).
    fn build_package(&self, output: &Path, header: &PackageHeader, files: &[(String, PathBuf)]) -> Result<()>;
}

impl ConsolePackage for Package {
    fn header(&self) -> &PackageHeader {
        Package::header(self)
    }

    fn extract_payload(&mut self, dest: &Path) -> Result<Vec<PathBuf>> {
        Package::extract_payload(self, dest)
    }

    fn close(self: Box<Self>) {
        Package::close(*self)
    }
}

/// Console container backed by the `console-pkg` format.
#[derive(Debug, Clone, Default)]
pub struct ConsolePackageAdapter {
    codec: ZstdCodec,
}

impl ConsoleContainer for ConsolePackageAdapter {
    fn open(&self, path: &Path) -> Result<Box<dyn ConsolePackage>> {
        let package = Package::open_with_codec(path, &self.codec)?;
        for line in package.log() {
            debug!("{}", line);
        }
        Ok(Box::new(package))
    }

    fn build_package(&self, output: &Path, header: &PackageHeader, files: &[(String, PathBuf)]) -> Result<()> {
        let mut builder = PackageBuilder::new(header.clone()).with_codec(self.codec.clone());
        for (name, path) in files {
            builder.add_file(name.as_str(), path.as_path());
        }
        builder.build(output)?;
        info!("Built console package {} ({} files)", output.display(), builder.file_count());
        Ok(())
    }
}

/// Report of one DRM tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmOutcome {
    pub report: String,
    pub succeeded: bool,
}

pub struct PlatformCryptoAdapter {
    cipher: Option<Box<dyn ContentCipher>>,
    drm_tool: Option<Box<dyn DrmTool>>,
    classifier: Box<dyn OutcomeClassifier>,
    console: Box<dyn ConsoleContainer>,
    staging_dir: PathBuf,
}

impl PlatformCryptoAdapter {
    /// No cipher and no DRM tool; the built-in console container.
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            cipher: None,
            drm_tool: None,
            classifier: Box::new(SuccessPhraseClassifier::default()),
            console: Box::new(ConsolePackageAdapter::default()),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn from_settings(settings: &PackSettings) -> Result<Self> {
        let mut adapter = Self::new(settings.staging_dir())
            .with_classifier(SuccessPhraseClassifier::new(settings.success_phrases.clone()));
        if let Some(key) = &settings.legacy_key {
            let cipher = LegacyCipher::from_hex(key, settings.legacy_iv.as_deref())
                .context("Invalid legacy package key in settings")?;
            adapter = adapter.with_cipher(cipher);
        }
        if let Some(command) = &settings.drm_tool {
            adapter = adapter.with_drm_tool(ExternalDrmTool::new(command.clone()));
        }
        Ok(adapter)
    }

    pub fn with_cipher(mut self, cipher: impl ContentCipher + 'static) -> Self {
        self.cipher = Some(Box::new(cipher));
        self
    }

    pub fn with_drm_tool(mut self, tool: impl DrmTool + 'static) -> Self {
        self.drm_tool = Some(Box::new(tool));
        self
    }

    pub fn with_classifier(mut self, classifier: impl OutcomeClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_console(mut self, console: impl ConsoleContainer + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn console(&self) -> &dyn ConsoleContainer {
        self.console.as_ref()
    }

    /// Legacy desktop packages, PC and Mac alike, are encrypted.
    pub fn uses_cipher(platform: Platform) -> bool {
        matches!(platform.platform, GamePlatform::Pc | GamePlatform::Mac) && platform.version == GameVersion::Rs2012
    }

    fn cipher(&self) -> Result<&dyn ContentCipher> {
        self.cipher.as_deref().ok_or_else(|| PackError::MissingKey.into())
    }

    /// Fail early when `platform` needs a cipher that is not configured.
    pub fn ensure_cipher(&self, platform: Platform) -> Result<()> {
        if Self::uses_cipher(platform) {
            self.cipher()?;
        }
        Ok(())
    }

    pub fn ensure_drm_tool(&self) -> Result<()> {
        match self.drm_tool {
            Some(_) => Ok(()),
            None => Err(PackError::MissingTool("DRM tool").into()),
        }
    }

    /// Write `input` to `output`, encrypting when the platform requires it.
    pub fn wrap(&self, platform: Platform, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        if Self::uses_cipher(platform) {
            self.cipher()?.encrypt_file(input, output)
        } else {
            Ok(io::copy(input, output)?)
        }
    }

    /// Inverse of [`wrap`](Self::wrap).
    pub fn unwrap(&self, platform: Platform, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        if Self::uses_cipher(platform) {
            self.cipher()?.decrypt_file(input, output)
        } else {
            Ok(io::copy(input, output)?)
        }
    }

    /// Run the DRM tool over the staging directory and classify its report.
    pub fn run_drm(&self, direction: DrmDirection) -> Result<DrmOutcome> {
        let tool = self.drm_tool.as_deref().ok_or(PackError::MissingTool("DRM tool"))?;
        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("Failed to create staging directory {}", self.staging_dir.display()))?;

        info!("Running DRM tool ({:?}) in {}", direction, self.staging_dir.display());
        let report = tool.run(direction, &self.staging_dir)?;
        let succeeded = self.classifier.succeeded(direction, &report);
        Ok(DrmOutcome { report, succeeded })
    }
}
