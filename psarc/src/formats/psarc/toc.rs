use std::io::{Read, Write};
use anyhow::Result;
use crate::core::archive::ArchiveError;
use crate::formats::psarc::constants::*;
use crate::formats::psarc::utils::*;

/// Fixed 32-byte archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version_major: u16,
    pub version_minor: u16,
    pub compression: [u8; 4],
    /// Size of header, TOC and block-size table together (= first data offset).
    pub toc_length: u32,
    pub toc_entry_size: u32,
    pub toc_entries: u32,
    pub block_size: u32,
    pub archive_flags: u32,
}

impl Header {
    pub fn new(toc_entries: u32, block_table_len: usize) -> Self {
        let width = block_size_width(BLOCK_SIZE);
        let toc_length = HEADER_SIZE
            + toc_entries * TOC_ENTRY_SIZE
            + (block_table_len * width) as u32;
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            compression: COMPRESSION_ZLIB,
            toc_length,
            toc_entry_size: TOC_ENTRY_SIZE,
            toc_entries,
            block_size: BLOCK_SIZE,
            archive_flags: ARCHIVE_FLAGS_RELATIVE,
        }
    }

    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != PSARC_MAGIC {
            return Err(ArchiveError::InvalidMagic(magic).into());
        }

        let version_major = read_u16_be(reader)?;
        let version_minor = read_u16_be(reader)?;
        let mut compression = [0u8; 4];
        reader.read_exact(&mut compression)?;
        let header = Self {
            version_major,
            version_minor,
            compression,
            toc_length: read_u32_be(reader)?,
            toc_entry_size: read_u32_be(reader)?,
            toc_entries: read_u32_be(reader)?,
            block_size: read_u32_be(reader)?,
            archive_flags: read_u32_be(reader)?,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.compression != COMPRESSION_ZLIB {
            let name = String::from_utf8_lossy(&self.compression).into_owned();
            return Err(ArchiveError::UnsupportedCompression(name).into());
        }
        if self.toc_entry_size != TOC_ENTRY_SIZE {
            return Err(ArchiveError::UnsupportedLayout(format!(
                "TOC entry size {}",
                self.toc_entry_size
            ))
            .into());
        }
        if self.block_size == 0 {
            return Err(ArchiveError::UnsupportedLayout("block size 0".to_string()).into());
        }
        if self.toc_entries == 0 {
            return Err(ArchiveError::Truncated("archive has no manifest entry".to_string()).into());
        }
        let fixed = u64::from(HEADER_SIZE) + u64::from(self.toc_entries) * u64::from(TOC_ENTRY_SIZE);
        if u64::from(self.toc_length) < fixed {
            return Err(ArchiveError::Truncated(format!(
                "TOC length {} shorter than {} entries",
                self.toc_length, self.toc_entries
            ))
            .into());
        }
        Ok(())
    }

    /// Number of elements in the block-size table.
    pub fn block_table_len(&self) -> usize {
        let fixed = HEADER_SIZE + self.toc_entries * TOC_ENTRY_SIZE;
        (self.toc_length - fixed) as usize / block_size_width(self.block_size)
    }

    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&PSARC_MAGIC)?;
        writer.write_all(&self.version_major.to_be_bytes())?;
        writer.write_all(&self.version_minor.to_be_bytes())?;
        writer.write_all(&self.compression)?;
        for field in [
            self.toc_length,
            self.toc_entry_size,
            self.toc_entries,
            self.block_size,
            self.archive_flags,
        ] {
            writer.write_all(&field.to_be_bytes())?;
        }
        Ok(())
    }
}

/// One 30-byte table-of-contents record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TocEntry {
    pub name_hash: [u8; 16],
    /// Index of the entry's first element in the block-size table.
    pub first_block: u32,
    /// Uncompressed length.
    pub length: u64,
    /// Absolute offset of the first block.
    pub offset: u64,
}

impl TocEntry {
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut name_hash = [0u8; 16];
        reader.read_exact(&mut name_hash)?;
        Ok(Self {
            name_hash,
            first_block: read_u32_be(reader)?,
            length: read_u40_be(reader)?,
            offset: read_u40_be(reader)?,
        })
    }

    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.name_hash)?;
        writer.write_all(&self.first_block.to_be_bytes())?;
        write_u40_be(writer, self.length)?;
        write_u40_be(writer, self.offset)?;
        Ok(())
    }
}

/// MD5 of the entry name; the manifest entry keeps an all-zero hash.
pub fn name_hash(name: &str) -> [u8; 16] {
    md5::compute(name.as_bytes()).0
}
