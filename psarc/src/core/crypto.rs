//! AES stream wrapper for legacy desktop packages
//!
//! Legacy desktop packages are a plain archive wrapped whole in AES-CTR with a
//! fixed application key. The key and IV are supplied by the caller.

use std::io::{Read, Write};
use aes::{Aes128, Aes192, Aes256};
use anyhow::Result;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128LE;
use thiserror::Error;

/// Encryption errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid AES key length: {0} bytes (expected 16, 24, or 32)")]
    InvalidKeyLength(usize),

    #[error("AES IV must be 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),
}

const IV_LEN: usize = 16;
const STREAM_CHUNK: usize = 64 * 1024;

/// Keystream state for one pass over a stream.
enum CtrState {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

impl CtrState {
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            CtrState::Aes128(c) => c.apply_keystream(buf),
            CtrState::Aes192(c) => c.apply_keystream(buf),
            CtrState::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// AES cipher using CTR mode with a full 128-bit little-endian counter.
#[derive(Clone)]
pub struct AesCipher {
    key: Vec<u8>,
    iv: [u8; IV_LEN],
}

impl AesCipher {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        match key.len() {
            16 | 24 | 32 => {}
            len => return Err(CryptoError::InvalidKeyLength(len).into()),
        }
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;
        Ok(Self {
            key: key.to_vec(),
            iv,
        })
    }

    fn state(&self) -> Result<CtrState> {
        let invalid = |_| CryptoError::InvalidKeyLength(self.key.len());
        Ok(match self.key.len() {
            16 => CtrState::Aes128(Ctr128LE::new_from_slices(&self.key, &self.iv).map_err(invalid)?),
            24 => CtrState::Aes192(Ctr128LE::new_from_slices(&self.key, &self.iv).map_err(invalid)?),
            32 => CtrState::Aes256(Ctr128LE::new_from_slices(&self.key, &self.iv).map_err(invalid)?),
            len => return Err(CryptoError::InvalidKeyLength(len).into()),
        })
    }

    /// Apply the keystream to everything read from `reader`, in chunks.
    /// Returns the number of bytes processed.
    pub fn apply_stream<R: Read + ?Sized, W: Write + ?Sized>(&self, reader: &mut R, writer: &mut W) -> Result<u64> {
        let mut state = self.state()?;
        let mut buf = vec![0u8; STREAM_CHUNK];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            state.apply(&mut buf[..n]);
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }
        writer.flush()?;
        Ok(total)
    }
}

/// Whole-file wrapper for legacy desktop packages.
#[derive(Clone)]
pub struct LegacyCipher {
    cipher: AesCipher,
}

impl LegacyCipher {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        Ok(Self {
            cipher: AesCipher::new(key, iv)?,
        })
    }

    /// Build from hex strings. A missing IV means all zeroes.
    pub fn from_hex(key: &str, iv: Option<&str>) -> Result<Self> {
        let key = decode_hex(key)?;
        let iv = match iv {
            Some(iv) => decode_hex(iv)?,
            None => vec![0u8; IV_LEN],
        };
        Self::new(&key, &iv)
    }

    pub fn encrypt_stream<R: Read + ?Sized, W: Write + ?Sized>(&self, input: &mut R, output: &mut W) -> Result<u64> {
        self.cipher.apply_stream(input, output)
    }

    pub fn decrypt_stream<R: Read + ?Sized, W: Write + ?Sized>(&self, input: &mut R, output: &mut W) -> Result<u64> {
        self.cipher.apply_stream(input, output)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(trimmed).map_err(|_| CryptoError::InvalidHex(s.to_string()).into())
}
