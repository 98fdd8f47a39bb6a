//! Binary chart (SNG) regeneration
//!
//! Chart XML is compiled to the platform's binary chart form by a pluggable
//! [`ChartCompiler`]. Show-light files are never compiled; they are
//! normalized in place instead.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use anyhow::{Context, Result};
use log::{debug, info};
use crate::platform::{GameVersion, Platform};
use crate::settings::ChartCompilerCommand;
use crate::walker::{dirs_in, files_in, find_files, lower_file_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrangementType {
    Guitar,
    Bass,
    Vocal,
}

impl ArrangementType {
    /// Classify a chart by its file name.
    pub fn from_chart_name(path: &Path) -> Self {
        let name = lower_file_name(path);
        if name.contains("vocal") {
            ArrangementType::Vocal
        } else if name.contains("bass") {
            ArrangementType::Bass
        } else {
            ArrangementType::Guitar
        }
    }
}

impl fmt::Display for ArrangementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArrangementType::Guitar => "guitar",
            ArrangementType::Bass => "bass",
            ArrangementType::Vocal => "vocal",
        })
    }
}

pub trait ChartCompiler: Send + Sync {
    /// Compile chart XML at `xml` into a binary chart at `sng`.
    fn compile(&self, xml: &Path, sng: &Path, arrangement: ArrangementType, platform: Platform) -> Result<()>;

    /// Rewrite a show-light XML file in place after normalizing it.
    fn normalize_showlights(&self, xml: &Path) -> Result<()>;
}

/// Runs a configured command-line chart compiler.
///
/// Argument templates may use `{input}`, `{output}`, `{arrangement}`,
/// `{platform}` and `{version}`.
#[derive(Debug, Clone)]
pub struct ExternalChartCompiler {
    command: ChartCompilerCommand,
}

impl ExternalChartCompiler {
    pub fn new(command: ChartCompilerCommand) -> Self {
        Self { command }
    }

    fn run(&self, templates: &[String], values: &[(&str, String)]) -> Result<()> {
        let args = templates.iter().map(|t| {
            values
                .iter()
                .fold(t.clone(), |arg, (key, value)| arg.replace(&format!("{{{}}}", key), value))
        });

        let output = Command::new(&self.command.program)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute chart compiler {}", self.command.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Chart compiler failed: {}", stderr);
        }
        Ok(())
    }
}

impl ChartCompiler for ExternalChartCompiler {
    fn compile(&self, xml: &Path, sng: &Path, arrangement: ArrangementType, platform: Platform) -> Result<()> {
        self.run(
            &self.command.compile_args,
            &[
                ("input", xml.display().to_string()),
                ("output", sng.display().to_string()),
                ("arrangement", arrangement.to_string()),
                ("platform", platform.platform.to_string()),
                ("version", platform.version.to_string()),
            ],
        )
    }

    fn normalize_showlights(&self, xml: &Path) -> Result<()> {
        self.run(&self.command.showlight_args, &[("input", xml.display().to_string())])
    }
}

pub fn is_showlight(path: &Path) -> bool {
    lower_file_name(path).contains("showlight")
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

/// Chart XML files of a package directory.
///
/// Current format: `songs/arr/**/*_*.xml`. Legacy format: the XML files in
/// `GR/Behaviors/Songs` of each top-level song folder.
pub fn chart_sources(dir: &Path, platform: Platform) -> Result<Vec<PathBuf>> {
    if platform.version == GameVersion::Rs2012 {
        let mut charts = Vec::new();
        for song_dir in dirs_in(dir)? {
            let songs = legacy_songs_dir(&song_dir);
            if songs.is_dir() {
                charts.extend(files_in(&songs)?.into_iter().filter(|f| is_xml(f)));
            }
        }
        return Ok(charts);
    }

    let arr = dir.join("songs").join("arr");
    if !arr.is_dir() {
        return Ok(Vec::new());
    }
    find_files(&arr, |f| is_xml(f) && lower_file_name(f).contains('_'))
}

fn legacy_songs_dir(song_dir: &Path) -> PathBuf {
    song_dir.join("GR").join("Behaviors").join("Songs")
}

/// Rebuilds binary charts from their XML before packing.
pub struct SngRegenerator<'a> {
    compiler: &'a dyn ChartCompiler,
}

impl<'a> SngRegenerator<'a> {
    pub fn new(compiler: &'a dyn ChartCompiler) -> Self {
        Self { compiler }
    }

    /// Current format: compile every chart into `songs/bin/<platform>/`.
    /// Returns the number of files compiled or normalized.
    pub fn regenerate_current(&self, dir: &Path, platform: Platform) -> Result<usize> {
        let charts = chart_sources(dir, platform)?;
        let bin_dir = dir.join("songs").join("bin").join(platform.bin_dir());

        for xml in &charts {
            if is_showlight(xml) {
                debug!("Normalizing show lights {}", xml.display());
                self.compiler.normalize_showlights(xml)?;
                continue;
            }
            let sng = bin_dir.join(sng_name(xml));
            self.compile(xml, &sng, platform)?;
        }

        info!("Regenerated {} chart file(s) in {}", charts.len(), dir.display());
        Ok(charts.len())
    }

    /// Legacy format: compile every file of `GR/Behaviors/Songs` inside one
    /// song folder into `GRExports/<platform>/`. Non-XML files are an error.
    pub fn regenerate_legacy(&self, song_dir: &Path, platform: Platform) -> Result<usize> {
        let songs = legacy_songs_dir(song_dir);
        let files = files_in(&songs).with_context(|| format!("No chart folder in {}", song_dir.display()))?;
        let exports = song_dir.join("GRExports").join(platform.bin_dir());

        for xml in &files {
            if !is_xml(xml) {
                anyhow::bail!("'{}' is not a valid XML file.", xml.display());
            }
            self.compile(xml, &exports.join(sng_name(xml)), platform)?;
        }

        info!("Regenerated {} chart file(s) in {}", files.len(), song_dir.display());
        Ok(files.len())
    }

    fn compile(&self, xml: &Path, sng: &Path, platform: Platform) -> Result<()> {
        if let Some(parent) = sng.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let arrangement = ArrangementType::from_chart_name(xml);
        debug!("Compiling {} ({}) -> {}", xml.display(), arrangement, sng.display());
        self.compiler
            .compile(xml, sng, arrangement, platform)
            .with_context(|| format!("Failed to compile chart {}", xml.display()))
    }
}

fn sng_name(xml: &Path) -> String {
    let stem = xml.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    format!("{}.sng", stem)
}
