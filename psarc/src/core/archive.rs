use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use anyhow::Result;
use thiserror::Error;

/// Archive codec errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Not a PSARC archive (magic {0:02x?})")]
    InvalidMagic([u8; 4]),

    #[error("Unsupported PSARC compression: {0}")]
    UnsupportedCompression(String),

    #[error("Unsupported PSARC layout: {0}")]
    UnsupportedLayout(String),

    #[error("Duplicate archive entry: {0}")]
    DuplicateEntry(String),

    #[error("Archive truncated: {0}")]
    Truncated(String),

    #[error("Corrupt data block {block} in entry '{entry}'")]
    CorruptBlock { entry: String, block: usize },

    #[error("Entry '{0}' has already been released")]
    Released(String),
}

/// Readable, seekable byte stream backing an archive entry.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// One named byte stream in an archive.
///
/// The entry owns its stream until it is written or released. Every copy out
/// of the stream leaves it rewound to the start.
pub struct Entry {
    pub name: String,
    pub length: u64,
    data: Option<Box<dyn ReadSeek>>,
}

impl Entry {
    pub fn new(name: impl Into<String>, data: Box<dyn ReadSeek>, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
            data: Some(data),
        }
    }

    pub fn data(&mut self) -> Result<&mut (dyn ReadSeek + 'static)> {
        match self.data.as_deref_mut() {
            Some(data) => Ok(data),
            None => Err(ArchiveError::Released(self.name.clone()).into()),
        }
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.data()?.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Copy the whole stream into `writer`, rewinding before and after.
    pub fn copy_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        let data = self.data()?;
        data.seek(SeekFrom::Start(0))?;
        let copied = io::copy(data, writer)?;
        data.seek(SeekFrom::Start(0))?;
        Ok(copied)
    }

    /// Read the whole stream into memory.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.length as usize);
        self.copy_to(&mut buf)?;
        Ok(buf)
    }

    /// Drop the backing stream. Temp files behind it are closed immediately.
    pub fn release(&mut self) {
        self.data = None;
    }

    pub fn is_released(&self) -> bool {
        self.data.is_none()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("released", &self.is_released())
            .finish()
    }
}
