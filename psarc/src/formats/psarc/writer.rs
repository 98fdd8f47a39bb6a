use std::io::{Cursor, Read, Write};
use anyhow::{Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use crate::core::archive::{ArchiveError, Entry};
use crate::formats::psarc::constants::*;
use crate::formats::psarc::toc::{name_hash, Header, TocEntry};
use crate::formats::psarc::utils::write_uint_be;

/// Encoded block data and the block-size table, accumulated across entries.
struct BlockStream {
    body: Vec<u8>,
    block_sizes: Vec<u32>,
    compress: bool,
}

impl BlockStream {
    fn new(compress: bool) -> Self {
        Self {
            body: Vec::new(),
            block_sizes: Vec::new(),
            compress,
        }
    }

    /// Split `length` bytes from `reader` into blocks and append them.
    /// The returned TOC entry has its offset relative to the body start.
    fn encode<R: Read + ?Sized>(&mut self, name: &str, reader: &mut R, length: u64) -> Result<TocEntry> {
        let first_block = self.block_sizes.len() as u32;
        let offset = self.body.len() as u64;

        let mut remaining = length;
        let mut chunk = Vec::with_capacity(BLOCK_SIZE as usize);
        while remaining > 0 {
            let want = remaining.min(u64::from(BLOCK_SIZE));
            chunk.clear();
            (&mut *reader).take(want).read_to_end(&mut chunk)?;
            if (chunk.len() as u64) < want {
                return Err(ArchiveError::Truncated(format!(
                    "entry '{}' ended {} bytes early",
                    name,
                    remaining - chunk.len() as u64
                ))
                .into());
            }
            self.push_block(&chunk)?;
            remaining -= want;
        }

        Ok(TocEntry {
            name_hash: [0u8; 16],
            first_block,
            length,
            offset,
        })
    }

    fn push_block(&mut self, plain: &[u8]) -> Result<()> {
        if self.compress {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(plain.len()), Compression::best());
            encoder.write_all(plain)?;
            let packed = encoder.finish()?;
            // Only keep compressed data that is strictly smaller; equal sizes mean raw.
            if packed.len() < plain.len() {
                self.block_sizes.push(packed.len() as u32);
                self.body.extend_from_slice(&packed);
                return Ok(());
            }
        }

        let stored = if plain.len() == BLOCK_SIZE as usize {
            0
        } else {
            plain.len() as u32
        };
        self.block_sizes.push(stored);
        self.body.extend_from_slice(plain);
        Ok(())
    }
}

/// Serialize `entries` (in order) preceded by the name manifest.
///
/// Every entry stream is rewound to its start once copied.
pub fn write_archive<W: Write>(entries: &mut [Entry], mut output: W, compress: bool) -> Result<()> {
    let manifest = entries
        .iter()
        .map(|e| e.name.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes();

    let mut blocks = BlockStream::new(compress);
    let mut toc = Vec::with_capacity(entries.len() + 1);

    let manifest_len = manifest.len() as u64;
    toc.push(blocks.encode("<manifest>", &mut Cursor::new(manifest), manifest_len)?);

    for entry in entries.iter_mut() {
        entry.rewind()?;
        let length = entry.length;
        let name = entry.name.clone();
        let mut record = blocks
            .encode(&name, entry.data()?, length)
            .with_context(|| format!("Failed to encode archive entry: {}", name))?;
        entry.rewind()?;
        record.name_hash = name_hash(&name);
        toc.push(record);
    }

    let header = Header::new(toc.len() as u32, blocks.block_sizes.len());
    let data_start = u64::from(header.toc_length);

    header.write(&mut output)?;
    for record in &mut toc {
        record.offset += data_start;
        record.write(&mut output)?;
    }
    let width = block_size_width(header.block_size);
    for size in &blocks.block_sizes {
        write_uint_be(&mut output, *size, width)?;
    }
    output.write_all(&blocks.body)?;
    output.flush()?;
    Ok(())
}
