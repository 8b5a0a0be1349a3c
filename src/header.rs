//! Optional fixed magic that may precede the index.
//!
//! The header is opt-in on both sides: a writer configured with
//! `write_header` emits [`MAGIC`] before the first record, and a reader
//! configured with `verify_header` checks it before parsing.

use std::io::{self, Read, Write};

/// 9-byte ASCII magic.
pub const MAGIC: [u8; 9] = *b"RESPACKV1";

pub const HEADER_LEN: u64 = MAGIC.len() as u64;

/// Read [`MAGIC`]'s length worth of bytes at the current position and compare.
///
/// A stream too short to hold the magic is a mismatch, not an error.  On
/// mismatch the stream is left wherever the read stopped; re-seek before
/// parsing it some other way.
pub fn has_valid_header<R: Read>(mut reader: R) -> io::Result<bool> {
    let mut magic = [0u8; MAGIC.len()];
    let mut filled = 0;
    while filled < magic.len() {
        match reader.read(&mut magic[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(magic == MAGIC)
}

pub fn write_header<W: Write>(mut writer: W) -> io::Result<()> {
    writer.write_all(&MAGIC)
}
