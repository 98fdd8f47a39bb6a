//! PSARC v1.4 container
//!
//! Layout: 32-byte header, table of contents (one 30-byte record per entry,
//! entry 0 being the `\n`-joined name manifest), block-size table, then the
//! zlib or raw data blocks.

pub mod constants;
pub mod reader;
pub mod toc;
pub mod writer;
mod utils;

use std::io::{Read, Seek, SeekFrom, Write};
use anyhow::Result;
use crate::core::archive::{ArchiveError, Entry, ReadSeek};

/// An ordered set of uniquely named entries.
///
/// Insertion order is the on-disk order.
#[derive(Debug, Default)]
pub struct Psarc {
    entries: Vec<Entry>,
}

/// Canonical entry name: forward slashes, no leading separator.
pub fn normalize_entry_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

impl Psarc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream under `name`. The length is measured by seeking to the end.
    pub fn add_entry<S: ReadSeek + 'static>(&mut self, name: &str, mut data: S) -> Result<()> {
        let length = data.seek(SeekFrom::End(0))?;
        data.seek(SeekFrom::Start(0))?;
        self.add_entry_with_length(name, Box::new(data), length)
    }

    pub fn add_entry_with_length(&mut self, name: &str, data: Box<dyn ReadSeek>, length: u64) -> Result<()> {
        let name = normalize_entry_name(name);
        if self.contains(&name) {
            return Err(ArchiveError::DuplicateEntry(name).into());
        }
        self.entries.push(Entry::new(name, data, length));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the archive. `compress` applies to every block.
    pub fn write<W: Write>(&mut self, output: W, compress: bool) -> Result<()> {
        writer::write_archive(&mut self.entries, output, compress)
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&mut self, compress: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out, compress)?;
        Ok(out)
    }

    pub fn read<R: Read + Seek>(input: R) -> Result<Self> {
        Ok(Self {
            entries: reader::read_archive(input)?,
        })
    }
}
