//! Console package header text file
//!
//! The header is a fixed-layout `Key: value` listing produced by console
//! packaging tools. Line 0 names the package signature; lines 2..=50 hold up
//! to 16 license triples (id, bit, flag); line 74 holds `<title> by <artist>`.

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use console_pkg::{License, SignatureType};
use crate::error::PackError;
use crate::walker::files_in;

/// Minimum number of lines in a well-formed header.
pub const HEADER_MIN_LINES: usize = 74;
const LICENSE_FIRST_LINE: usize = 2;
const LICENSE_LAST_LINE: usize = 48;
const SONG_INFO_LINE: usize = 74;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongInfo {
    pub display_name: String,
    pub title: String,
    pub artist: String,
}

impl SongInfo {
    /// Split `<title> by <artist>` on the first ` by `. Without it, both
    /// title and artist take the whole text.
    pub fn from_display_name(text: &str) -> Self {
        let (title, artist) = match text.find(" by ") {
            Some(index) if index > 0 => (&text[..index], &text[index + 4..]),
            _ => (text, text),
        };
        Self {
            display_name: text.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleHeader {
    pub signature: SignatureType,
    pub licenses: Vec<License>,
    pub song_info: Option<SongInfo>,
    pub title_id: Option<String>,
}

/// The single `*.txt` header next to the console root folder.
pub fn find_header_file(dir: &Path) -> Result<PathBuf> {
    let mut headers: Vec<PathBuf> = files_in(dir)?
        .into_iter()
        .filter(|f| {
            f.extension()
                .map(|e| e.to_string_lossy().eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
        })
        .collect();

    match headers.len() {
        1 => Ok(headers.remove(0)),
        0 => Err(PackError::MalformedHeader(format!("no .txt header file in {}", dir.display())).into()),
        n => Err(PackError::MalformedHeader(format!(
            "{} .txt files in {}, expected exactly one header",
            n,
            dir.display()
        ))
        .into()),
    }
}

pub fn read_header_file(path: &Path) -> Result<ConsoleHeader> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read console header {}", path.display()))?;
    parse_header(&String::from_utf8_lossy(&bytes))
        .with_context(|| format!("Failed to parse console header {}", path.display()))
}

pub fn parse_header(text: &str) -> Result<ConsoleHeader> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < HEADER_MIN_LINES {
        return Err(PackError::MalformedHeader(format!(
            "{} lines, expected at least {}",
            lines.len(),
            HEADER_MIN_LINES
        ))
        .into());
    }

    let mut header = ConsoleHeader {
        title_id: lines
            .iter()
            .find_map(|line| line.trim().strip_prefix("Title ID:"))
            .map(|id| id.trim().to_string()),
        ..ConsoleHeader::default()
    };

    if lines[0].contains("LIVE") {
        header.signature = SignatureType::Live;
        for i in (LICENSE_FIRST_LINE..=LICENSE_LAST_LINE).step_by(3) {
            let id = parse_license_id(lines[i], i)?;
            let bit = parse_decimal(lines[i + 1], i + 1)?;
            let flag = parse_decimal(lines[i + 2], i + 2)?;
            if id != 0 {
                header.licenses.push(License { id, bit, flag });
            }
        }
    }

    header.song_info = lines
        .get(SONG_INFO_LINE)
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(SongInfo::from_display_name);

    Ok(header)
}

fn value_of(line: &str, index: usize) -> Result<&str> {
    line.split_once(':')
        .map(|(_, value)| value.trim())
        .ok_or_else(|| PackError::MalformedHeader(format!("line {} has no value: '{}'", index, line)).into())
}

fn parse_license_id(line: &str, index: usize) -> Result<u64> {
    let value = value_of(line, index)?;
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|_| PackError::MalformedHeader(format!("line {}: '{}' is not a hex license id", index, value)).into())
}

fn parse_decimal(line: &str, index: usize) -> Result<i32> {
    let value = value_of(line, index)?;
    value
        .parse()
        .map_err(|_| PackError::MalformedHeader(format!("line {}: '{}' is not a number", index, value)).into())
}
