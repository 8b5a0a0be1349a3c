//! Streaming package engine: reader, writer, and the bounded views the
//! reader hands out.
//!
//! # Writer
//! [`PackageWriter`] collects pending `(source, path)` pairs.  Packing is a
//! two-pass layout: the exact index size is computed first, then every
//! entry's absolute payload offset, so the index is written once, in order,
//! and never revisited.  The work is driven through a [`PackJob`], an
//! explicit state machine advanced one unit at a time.
//!
//! # Reader
//! [`PackageReader`] parses the whole index when it is opened and keeps it
//! in memory.  Entries are looked up by path or ordinal and served as
//! bounded sub-streams (see [`view`]).  Entry ranges are checked against
//! the container length each time they are accessed, not at open time.
//!
//! # Endianness
//! All integers in the index are little-endian; see `record.rs`.

pub mod reader;
pub mod view;
pub mod writer;

pub use reader::{DirectoryListing, EntryTarget, PackageReader, ReaderOptions};
pub use view::{BoundedView, FileViews, ReadSeek, SharedStream, SharedViews, SubStream, ViewStrategy};
pub use writer::{PackJob, PackStep, PackSummary, PackUnit, PackageWriter, WriterOptions};

use std::io::{self, Read, Write};

/// Default copy buffer: 80 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 80 * 1024;

/// Copy exactly `len` bytes from `reader` to `writer` through `buf`.
///
/// Fails with `UnexpectedEof` if `reader` runs dry first.
pub fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64, buf: &mut [u8]) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended {remaining} bytes early"),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(len)
}
