use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Settings for the payload zstd stream.
#[derive(Clone, Debug)]
pub struct ZstdOptions {
    /// Compression level. Use 0 to mean "zstd default".
    pub level: i32,

    /// Include a content checksum in the frame.
    pub include_checksum: bool,

    /// Buffer size used for file/stream IO wrappers.
    pub buffer_size: usize,
}

impl Default for ZstdOptions {
    fn default() -> Self {
        Self {
            level: 3,
            include_checksum: true,
            buffer_size: 1024 * 1024, // 1 MiB
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ZstdCodec {
    opts: ZstdOptions,
}

impl ZstdCodec {
    pub fn new(opts: ZstdOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ZstdOptions {
        &self.opts
    }

    /// Stream decompression: reads zstd from `reader`, writes uncompressed bytes into `writer`.
    /// Returns number of uncompressed bytes written to `writer`.
    pub fn decompress_reader_to_writer<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        let reader = BufReader::with_capacity(self.opts.buffer_size, reader);
        let mut decoder = self.make_decoder(reader).context("Failed to create zstd decoder")?;

        let mut writer = BufWriter::with_capacity(self.opts.buffer_size, writer);
        let bytes_out = io::copy(&mut decoder, &mut writer).context("Failed while streaming from zstd decoder")?;
        writer.flush().context("Failed to flush output")?;

        Ok(bytes_out)
    }

    pub fn make_encoder<W: Write>(&self, writer: W) -> Result<zstd::stream::write::Encoder<'static, BufWriter<W>>> {
        let writer = BufWriter::with_capacity(self.opts.buffer_size, writer);
        let mut enc = zstd::stream::write::Encoder::new(writer, self.opts.level).context("Failed to create zstd encoder")?;
        enc.include_checksum(self.opts.include_checksum)
            .context("Failed to set zstd include_checksum")?;
        Ok(enc)
    }

    fn make_decoder<R: io::BufRead>(&self, reader: R) -> Result<zstd::stream::read::Decoder<'static, R>> {
        zstd::stream::read::Decoder::with_buffer(reader).context("Failed to create zstd decoder")
    }
}

/// Write `dst` through a named temp file beside it. The temp file is
/// persisted over `dst` only when `f` succeeds and is removed otherwise.
pub(crate) fn atomic_write<F>(dst: &Path, f: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".console-pkg-")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    f(tmp.as_file_mut())?;

    tmp.persist(dst)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move temp file to {}", dst.display()))?;
    Ok(())
}
