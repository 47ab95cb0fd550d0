//! Byte-level helpers shared by the identifier, group and user-file encodings.
//!
//! Flags byte of a leaf or branch record:
//!
//! | bit | meaning                                         |
//! |-----|-------------------------------------------------|
//! | 0   | core domain                                     |
//! | 1   | framework domain                                |
//! | 2   | superuser (branches only)                       |
//! | 3   | subtractive mode (branches only)                |
//! | 5   | module prefix uses the long length prefix       |
//! | 6   | path uses the long length prefix                |
//! | 7   | no module reference                             |
//!
//! Short length prefixes are one byte, long ones are two bytes little-endian.

use std::io::{self, Read, Write};

use crate::error::DecodeError;

pub(crate) const FLAG_CORE: u8 = 1;
pub(crate) const FLAG_FRAMEWORK: u8 = 1 << 1;
pub(crate) const FLAG_SUPERUSER: u8 = 1 << 2;
pub(crate) const FLAG_SUBTRACTIVE: u8 = 1 << 3;
pub(crate) const FLAG_LONG_PREFIX: u8 = 1 << 5;
pub(crate) const FLAG_LONG_PATH: u8 = 1 << 6;
pub(crate) const FLAG_NO_MODULE: u8 = 1 << 7;

pub(crate) fn needs_long_length(value: &str) -> bool {
    value.len() > u8::MAX as usize
}

pub(crate) fn write_prefixed<W: Write>(writer: &mut W, value: &str, long: bool) -> io::Result<()> {
    let bytes = value.as_bytes();
    if long {
        let len = u16::try_from(bytes.len()).map_err(|_| too_long(bytes.len()))?;
        writer.write_all(&len.to_le_bytes())?;
    } else {
        let len = u8::try_from(bytes.len()).map_err(|_| too_long(bytes.len()))?;
        writer.write_all(&[len])?;
    }
    writer.write_all(bytes)
}

pub(crate) fn read_prefixed<R: Read>(reader: &mut R, long: bool) -> Result<String, DecodeError> {
    let len = if long {
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf)?;
        u16::from_le_bytes(buf) as usize
    } else {
        read_u8(reader)? as usize
    };
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| DecodeError::InvalidUtf8)
}

/// Writes a string with a two-byte length prefix.
pub(crate) fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    write_prefixed(writer, value, true)
}

pub(crate) fn read_string<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    read_prefixed(reader, true)
}

pub(crate) fn read_u8<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn write_i32<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

pub(crate) fn read_i32<R: Read>(reader: &mut R) -> Result<i32, DecodeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Reads an element count, rejecting negative values.
pub(crate) fn read_count<R: Read>(reader: &mut R) -> Result<usize, DecodeError> {
    let count = read_i32(reader)?;
    usize::try_from(count).map_err(|_| DecodeError::NegativeCount(count))
}

pub(crate) fn write_count<W: Write>(writer: &mut W, count: usize) -> io::Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many elements"))?;
    write_i32(writer, count)
}

fn too_long(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("string of {len} bytes does not fit its length prefix"),
    )
}
