use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use anyhow::{Context, Result};
use flate2::read::ZlibDecoder;
use crate::core::archive::{ArchiveError, Entry, ReadSeek};
use crate::formats::psarc::constants::*;
use crate::formats::psarc::toc::{Header, TocEntry};
use crate::formats::psarc::utils::read_uint_be;

struct ArchiveIndex {
    header: Header,
    toc: Vec<TocEntry>,
    block_sizes: Vec<u32>,
}

impl ArchiveIndex {
    fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let archive_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let header = Header::read(reader)?;
        // Counts in the header size the tables below; they must fit the file.
        if u64::from(header.toc_length) > archive_len {
            return Err(ArchiveError::Truncated(format!(
                "TOC of {} bytes ({} entries) in a {} byte archive",
                header.toc_length, header.toc_entries, archive_len
            ))
            .into());
        }

        let mut toc = Vec::with_capacity(header.toc_entries as usize);
        for _ in 0..header.toc_entries {
            toc.push(TocEntry::read(reader).context("Failed to read TOC entry")?);
        }

        let width = block_size_width(header.block_size);
        let table_len = header.block_table_len();
        let mut block_sizes = Vec::with_capacity(table_len);
        for _ in 0..table_len {
            block_sizes.push(read_uint_be(reader, width).context("Failed to read block-size table")?);
        }

        Ok(Self {
            header,
            toc,
            block_sizes,
        })
    }

    /// Decode one entry's blocks into `sink`.
    fn decode<R: Read + Seek, W: Write + ?Sized>(
        &self,
        reader: &mut R,
        name: &str,
        record: &TocEntry,
        sink: &mut W,
    ) -> Result<()> {
        let block_size = u64::from(self.header.block_size);
        reader.seek(SeekFrom::Start(record.offset))?;

        let mut remaining = record.length;
        let mut index = record.first_block as usize;
        let mut stored_buf = Vec::new();
        let mut plain_buf = Vec::new();

        while remaining > 0 {
            let plain_len = remaining.min(block_size);
            let stored = match self.block_sizes.get(index) {
                Some(0) => block_size,
                Some(size) => u64::from(*size),
                None => {
                    return Err(ArchiveError::Truncated(format!(
                        "entry '{}' references block {} of {}",
                        name,
                        index,
                        self.block_sizes.len()
                    ))
                    .into())
                }
            };

            stored_buf.clear();
            (&mut *reader).take(stored).read_to_end(&mut stored_buf)?;
            if stored_buf.len() as u64 != stored {
                return Err(ArchiveError::Truncated(format!("entry '{}' block {} is short", name, index)).into());
            }

            if stored == plain_len {
                sink.write_all(&stored_buf)?;
            } else {
                plain_buf.clear();
                let corrupt = || ArchiveError::CorruptBlock {
                    entry: name.to_string(),
                    block: index,
                };
                ZlibDecoder::new(stored_buf.as_slice())
                    .take(plain_len + 1)
                    .read_to_end(&mut plain_buf)
                    .map_err(|_| corrupt())?;
                if plain_buf.len() as u64 != plain_len {
                    return Err(corrupt().into());
                }
                sink.write_all(&plain_buf)?;
            }

            remaining -= plain_len;
            index += 1;
        }
        Ok(())
    }
}

/// Read every entry of the archive in on-disk order.
///
/// Small entries are held in memory; larger ones spill to an anonymous temp
/// file that disappears when the entry is released.
pub fn read_archive<R: Read + Seek>(mut reader: R) -> Result<Vec<Entry>> {
    let index = ArchiveIndex::read(&mut reader)?;

    let mut manifest = Vec::new();
    index.decode(&mut reader, "<manifest>", &index.toc[0], &mut manifest)?;
    let manifest = String::from_utf8(manifest).context("Archive manifest is not UTF-8")?;
    let names: Vec<&str> = if manifest.is_empty() {
        Vec::new()
    } else {
        manifest.split('\n').collect()
    };

    let records = &index.toc[1..];
    if names.len() != records.len() {
        return Err(ArchiveError::UnsupportedLayout(format!(
            "manifest lists {} names for {} entries",
            names.len(),
            records.len()
        ))
        .into());
    }

    let mut entries = Vec::with_capacity(records.len());
    for (name, record) in names.iter().zip(records) {
        let data: Box<dyn ReadSeek> = if record.length > MEMORY_SPILL_THRESHOLD {
            let mut file = tempfile::tempfile().context("Failed to create spill file")?;
            index.decode(&mut reader, name, record, &mut file)?;
            file.seek(SeekFrom::Start(0))?;
            Box::new(file)
        } else {
            let mut buf = Vec::with_capacity(record.length as usize);
            index.decode(&mut reader, name, record, &mut buf)?;
            Box::new(Cursor::new(buf))
        };
        entries.push(Entry::new(*name, data, record.length));
    }

    Ok(entries)
}
