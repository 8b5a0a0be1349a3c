//! Binary index codec.
//!
//! The index is a run of records followed by payload:
//!
//! ```text
//! record     := marker (entry | terminator)
//! entry      := 0xFF  key_len(1)  key(2 * (key_len + 1))  position(8 LE)  length(8 LE)
//! terminator := 0x00
//! ```
//!
//! `key_len` stores the key length in UTF-16 code units minus one, so a key
//! holds 1..=256 units.  Each unit is two little-endian bytes; surrogate
//! pairs are two consecutive units.  `position` and `length` are signed
//! 64-bit little-endian integers and must never be negative.
//!
//! Everything after the terminator up to the end of the container is
//! payload, concatenated in record order.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{PackageError, Result};
use crate::index::{StreamBlock, StreamIndex};
use crate::path::MAX_PATH_UNITS;

pub const MARKER_ENTRY:      u8 = 0xFF;
pub const MARKER_TERMINATOR: u8 = 0x00;

/// Fixed bytes in every entry record: marker, key length, position, length.
pub const ENTRY_OVERHEAD:  u64 = 1 + 1 + 8 + 8;
pub const TERMINATOR_SIZE: u64 = 1;

/// One decoded index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Entry(StreamIndex),
    Terminator,
}

// ── Layout math ───────────────────────────────────────────────────────────────

/// Encoded size of one entry record for a key of `units` UTF-16 code units.
#[inline]
pub fn entry_size(units: usize) -> u64 {
    ENTRY_OVERHEAD + 2 * units as u64
}

/// Exact byte size of an index holding `paths`, terminator included.
pub fn index_size<'a, I>(paths: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    paths
        .into_iter()
        .map(|p| entry_size(p.encode_utf16().count()))
        .sum::<u64>()
        + TERMINATOR_SIZE
}

// ── Key codec ────────────────────────────────────────────────────────────────

/// Encode `key` as little-endian UTF-16 code units.
pub fn encode_key(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for unit in key.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode little-endian UTF-16 code units back into a string.
pub fn decode_key(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(PackageError::InvalidFormat("key has an odd byte length".into()));
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|e| PackageError::InvalidFormat(format!("key is not valid UTF-16: {e}")))
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Write one entry record.
pub fn write_entry<W: Write>(mut writer: W, path: &str, block: StreamBlock) -> Result<()> {
    let units = path.encode_utf16().count();
    if units == 0 || units > MAX_PATH_UNITS {
        return Err(PackageError::InvalidFormat(format!(
            "key '{path}' is {units} UTF-16 units, the index holds 1..={MAX_PATH_UNITS}"
        )));
    }
    let position = to_wire(block.position, "position")?;
    let length   = to_wire(block.length, "length")?;

    writer.write_u8(MARKER_ENTRY)?;
    writer.write_u8((units - 1) as u8)?;
    for unit in path.encode_utf16() {
        writer.write_u16::<LittleEndian>(unit)?;
    }
    writer.write_i64::<LittleEndian>(position)?;
    writer.write_i64::<LittleEndian>(length)?;
    Ok(())
}

pub fn write_terminator<W: Write>(mut writer: W) -> io::Result<()> {
    writer.write_u8(MARKER_TERMINATOR)
}

fn to_wire(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| PackageError::InvalidFormat(format!("{field} {value} does not fit in a signed 64-bit field")))
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Read the next record.  Any marker other than `0x00`/`0xFF`, or a field
/// cut short by end of stream, is `InvalidFormat`.
pub fn read_record<R: Read>(mut reader: R) -> Result<Record> {
    let marker = reader.read_u8().map_err(truncated("marker"))?;
    match marker {
        MARKER_TERMINATOR => Ok(Record::Terminator),
        MARKER_ENTRY => {
            let units = reader.read_u8().map_err(truncated("key length"))? as usize + 1;
            let mut key = vec![0u8; units * 2];
            reader.read_exact(&mut key).map_err(truncated("key"))?;
            let path = decode_key(&key)?;

            let position = reader.read_i64::<LittleEndian>().map_err(truncated("position"))?;
            let length   = reader.read_i64::<LittleEndian>().map_err(truncated("length"))?;
            if position < 0 || length < 0 {
                return Err(PackageError::InvalidFormat(format!(
                    "entry '{path}' has a negative range ({position}, {length})"
                )));
            }

            Ok(Record::Entry(StreamIndex::new(
                path,
                StreamBlock::new(position as u64, length as u64),
            )))
        }
        other => Err(PackageError::InvalidFormat(format!("unknown record marker 0x{other:02X}"))),
    }
}

fn truncated(field: &'static str) -> impl Fn(io::Error) -> PackageError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PackageError::InvalidFormat(format!("index truncated while reading {field}"))
        } else {
            PackageError::Io(e)
        }
    }
}
