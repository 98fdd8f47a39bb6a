use std::io::{Read, Write};
use anyhow::Result;

pub fn read_u16_be<R: Read + ?Sized>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub fn read_u32_be<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// 40-bit big-endian unsigned integer (TOC lengths and offsets).
pub fn read_u40_be<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf[3..])?;
    Ok(u64::from_be_bytes(buf))
}

pub fn write_u40_be<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<()> {
    if value >> 40 != 0 {
        anyhow::bail!("Value {} does not fit in 40 bits", value);
    }
    writer.write_all(&value.to_be_bytes()[3..])?;
    Ok(())
}

/// Read a big-endian unsigned integer of `width` bytes (1..=4).
pub fn read_uint_be<R: Read + ?Sized>(reader: &mut R, width: usize) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf[4 - width..])?;
    Ok(u32::from_be_bytes(buf))
}

pub fn write_uint_be<W: Write + ?Sized>(writer: &mut W, value: u32, width: usize) -> Result<()> {
    writer.write_all(&value.to_be_bytes()[4 - width..])?;
    Ok(())
}
