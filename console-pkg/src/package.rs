use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::codec::{atomic_write, ZstdCodec};

/// Folder every payload file lives under.
pub const PAYLOAD_ROOT: &str = "Root";

/// First tar member: the serialized [`PackageHeader`].
pub const HEADER_MEMBER: &str = "package.json";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Invalid console package: {reason}")]
    Parse { reason: String, log: Vec<String> },

    #[error("Console package has no files under {PAYLOAD_ROOT}/")]
    MissingRoot,
}

/// Package signature kind, stored as the 4-byte file magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureType {
    #[default]
    Con,
    Live,
}

impl SignatureType {
    pub fn magic(self) -> [u8; 4] {
        match self {
            SignatureType::Con => *b"CON ",
            SignatureType::Live => *b"LIVE",
        }
    }

    pub fn from_magic(magic: &[u8; 4]) -> Option<Self> {
        match magic {
            b"CON " => Some(SignatureType::Con),
            b"LIVE" => Some(SignatureType::Live),
            _ => None,
        }
    }
}

/// Console entitlement triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: u64,
    pub bit: i32,
    pub flag: i32,
}

/// Audio levels the package was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub volume: i16,
    pub preview_volume: i16,
    pub quality: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHeader {
    pub display_name: String,
    pub title: String,
    pub artist: String,
    pub signature: SignatureType,
    #[serde(default)]
    pub licenses: Vec<License>,
    /// Hex title identifier of the game the package targets, when known.
    #[serde(default)]
    pub title_id: Option<String>,
    #[serde(default)]
    pub content_version: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub audio: Option<AudioInfo>,
}

/// Collects payload files and writes a package in one pass.
pub struct PackageBuilder {
    header: PackageHeader,
    files: Vec<(String, PathBuf)>,
    codec: ZstdCodec,
}

impl PackageBuilder {
    pub fn new(header: PackageHeader) -> Self {
        Self {
            header,
            files: Vec::new(),
            codec: ZstdCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: ZstdCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Queue `path` to be stored as `name` (forward-slash relative path).
    pub fn add_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        self.files.push((name.into(), path.into()));
        self
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn build(&self, output: &Path) -> Result<()> {
        let root_prefix = format!("{}/", PAYLOAD_ROOT);
        if !self.files.iter().any(|(name, _)| name.starts_with(&root_prefix)) {
            return Err(PackageError::MissingRoot.into());
        }
        let header_json = serde_json::to_vec_pretty(&self.header).context("Failed to serialize package header")?;

        atomic_write(output, |file| {
            file.write_all(&self.header.signature.magic())?;

            let encoder = self.codec.make_encoder(file)?;
            let mut builder = tar::Builder::new(encoder);

            let mut member = tar::Header::new_gnu();
            member.set_size(header_json.len() as u64);
            member.set_mode(0o644);
            builder
                .append_data(&mut member, HEADER_MEMBER, header_json.as_slice())
                .context("Failed to append package header")?;

            for (name, path) in &self.files {
                builder
                    .append_path_with_name(path, name)
                    .with_context(|| format!("Failed to add {} to package", path.display()))?;
            }

            // Finish TAR, then finish zstd.
            let encoder = builder.into_inner().context("Failed to finalize tar builder")?;
            let mut out = encoder.finish().context("Failed to finish zstd stream")?;
            out.flush().context("Failed to flush package output")?;
            Ok(())
        })
        .with_context(|| format!("Failed to build console package {}", output.display()))
    }
}

/// An opened package. The decompressed payload lives in an anonymous temp
/// file until the package is closed.
#[derive(Debug)]
pub struct Package {
    header: PackageHeader,
    payload: File,
    log: Vec<String>,
}

impl Package {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_codec(path, &ZstdCodec::default())
    }

    pub fn open_with_codec(path: &Path, codec: &ZstdCodec) -> Result<Self> {
        let mut log = vec![format!("Opening {}", path.display())];
        let fail = |reason: String, log: &mut Vec<String>| {
            log.push(reason.clone());
            PackageError::Parse {
                reason,
                log: std::mem::take(log),
            }
        };

        let mut file = File::open(path).map_err(|e| fail(format!("cannot open file: {}", e), &mut log))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| fail("file is shorter than the signature".to_string(), &mut log))?;
        let signature = SignatureType::from_magic(&magic)
            .ok_or_else(|| fail(format!("unknown signature {:02x?}", magic), &mut log))?;
        log.push(format!("Signature: {:?}", signature));

        let mut payload = tempfile::tempfile().context("Failed to create payload scratch file")?;
        let size = codec
            .decompress_reader_to_writer(&mut file, &mut payload)
            .map_err(|e| fail(format!("payload stream is corrupt: {:#}", e), &mut log))?;
        log.push(format!("Payload: {} bytes", size));

        payload.seek(SeekFrom::Start(0))?;
        let header = read_header(&mut payload).map_err(|e| fail(format!("{:#}", e), &mut log))?;
        if header.signature != signature {
            return Err(fail(
                format!("header signature {:?} does not match magic {:?}", header.signature, signature),
                &mut log,
            )
            .into());
        }
        log.push(format!("Header: '{}' with {} license(s)", header.display_name, header.licenses.len()));

        Ok(Self {
            header,
            payload,
            log,
        })
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// Parse log collected while opening.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Unpack every payload member under `dest`. Returns the written paths.
    pub fn extract_payload(&mut self, dest: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
        self.payload.seek(SeekFrom::Start(0))?;

        let mut archive = tar::Archive::new(&mut self.payload);
        let mut written = Vec::new();
        for entry in archive.entries().context("Failed to read package payload")? {
            let mut entry = entry.context("Failed to read package member")?;
            let name = entry.path()?.into_owned();
            if name == Path::new(HEADER_MEMBER) {
                continue;
            }
            if entry
                .unpack_in(dest)
                .with_context(|| format!("Failed to unpack {}", name.display()))?
            {
                written.push(dest.join(&name));
            }
        }
        Ok(written)
    }

    /// Release the payload scratch file.
    pub fn close(self) {}
}

fn read_header<R: Read>(reader: R) -> Result<PackageHeader> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = archive.entries().context("payload is not a tar stream")?;
    let mut first = entries
        .next()
        .ok_or_else(|| anyhow::anyhow!("payload is empty"))?
        .context("payload is not a tar stream")?;
    if first.path()?.as_ref() != Path::new(HEADER_MEMBER) {
        anyhow::bail!("first member is not {}", HEADER_MEMBER);
    }
    let mut json = String::new();
    first.read_to_string(&mut json)?;
    serde_json::from_str(&json).context("package header is not valid JSON")
}
