use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, trace, warn};

use crate::error::{PackageError, Result};
use crate::header::{has_valid_header, HEADER_LEN};
use crate::index::{EntryTable, StreamIndex};
use crate::path::is_direct_child;
use crate::record::{self, Record};

use super::view::{empty_view, FileViews, SharedStream, SharedViews, SubStream, ViewStrategy};
use super::{copy_exact, DEFAULT_BUFFER_SIZE};

// ── ReaderOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`PackageReader::open_with`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Require the magic header before the index.
    pub verify_header: bool,
    /// Size of the buffer `copy_to` reuses across calls.
    pub buffer_size:   usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            verify_header: false,
            buffer_size:   DEFAULT_BUFFER_SIZE,
        }
    }
}

// ── EntryTarget ───────────────────────────────────────────────────────────────

/// Names an entry by logical path or by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTarget<'a> {
    Path(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for EntryTarget<'a> {
    fn from(path: &'a str) -> Self { EntryTarget::Path(path) }
}

impl<'a> From<&'a String> for EntryTarget<'a> {
    fn from(path: &'a String) -> Self { EntryTarget::Path(path) }
}

impl<'a> From<&'a StreamIndex> for EntryTarget<'a> {
    fn from(entry: &'a StreamIndex) -> Self { EntryTarget::Path(&entry.path) }
}

impl From<usize> for EntryTarget<'_> {
    fn from(index: usize) -> Self { EntryTarget::Index(index) }
}

// ── PackageReader ─────────────────────────────────────────────────────────────

/// An opened package.
///
/// The index is parsed once, in [`open_with`](Self::open_with), and never
/// changes afterwards.  The container itself must not be rewritten while
/// the reader is alive.
pub struct PackageReader<R> {
    base:        SharedStream<R>,
    strategy:    Box<dyn ViewStrategy<R>>,
    table:       EntryTable,
    index_start: u64,
    index_size:  u64,
    copy_buf:    Mutex<Vec<u8>>,
}

impl PackageReader<File> {
    /// Open a package file whose views each get their own file handle.
    pub fn open_file<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::open_with(file, options, FileViews::new(path))
    }
}

impl<R: Read + Seek + Send + 'static> PackageReader<R> {
    /// Open with default options and shared views.
    pub fn open(stream: R) -> Result<Self> {
        Self::open_with(stream, ReaderOptions::default(), SharedViews)
    }

    /// Parse the index starting at the stream's current position.
    ///
    /// Entry positions are absolute offsets in `stream`.
    pub fn open_with<S>(mut stream: R, options: ReaderOptions, strategy: S) -> Result<Self>
    where
        S: ViewStrategy<R> + 'static,
    {
        let start = stream.stream_position().map_err(|e| match e.kind() {
            io::ErrorKind::Unsupported => {
                PackageError::Unsupported("package stream must support seeking".into())
            }
            _ => PackageError::Io(e),
        })?;

        let mut index_start = start;
        if options.verify_header {
            if !has_valid_header(&mut stream)? {
                return Err(PackageError::InvalidFormat("missing package header".into()));
            }
            index_start += HEADER_LEN;
        }

        let (table, index_size) = parse_index(&mut stream)?;
        debug!(
            entries     = table.len(),
            index_start,
            index_size,
            independent = strategy.is_independent(),
            "opened package"
        );

        Ok(Self {
            base:     SharedStream::new(stream),
            strategy: Box::new(strategy),
            table,
            index_start,
            index_size,
            copy_buf: Mutex::new(vec![0u8; options.buffer_size.max(1)]),
        })
    }
}

impl<R: Read + Seek> PackageReader<R> {
    // ── Lookups ──────────────────────────────────────────────────────────────

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All entries in container order, duplicates included.
    pub fn entries(&self) -> &[StreamIndex] {
        self.table.as_slice()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamIndex> {
        self.table.iter()
    }

    pub fn entry_at(&self, index: usize) -> Result<&StreamIndex> {
        self.table.get(index).ok_or(PackageError::IndexOutOfRange {
            index,
            count: self.table.len(),
        })
    }

    pub fn try_entry_at(&self, index: usize) -> Option<&StreamIndex> {
        self.table.get(index)
    }

    pub fn entry_by_path(&self, path: &str) -> Result<&StreamIndex> {
        self.table
            .by_path(path)
            .ok_or_else(|| PackageError::NotFound(path.to_owned()))
    }

    pub fn try_entry_by_path(&self, path: &str) -> Option<&StreamIndex> {
        self.table.by_path(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.table.position_of(path).is_some()
    }

    pub fn resolve<'a, T: Into<EntryTarget<'a>>>(&self, target: T) -> Result<&StreamIndex> {
        match target.into() {
            EntryTarget::Path(p)  => self.entry_by_path(p),
            EntryTarget::Index(i) => self.entry_at(i),
        }
    }

    /// Direct children of `dir`, in container order.  Not recursive: an entry
    /// with another separator after `dir/` is skipped.  An empty `dir` lists
    /// root-level entries.
    pub fn list_by_directory<'a>(&'a self, dir: &'a str) -> DirectoryListing<'a> {
        DirectoryListing { entries: self.table.as_slice(), dir, pos: 0 }
    }

    /// Whether streams from [`open_stream`](Self::open_stream) may be read
    /// concurrently without coordinating.
    pub fn views_are_independent(&self) -> bool {
        self.strategy.is_independent()
    }

    /// Offset of the first index record.
    pub fn index_start(&self) -> u64 {
        self.index_start
    }

    /// Index bytes, terminator included.
    pub fn index_size(&self) -> u64 {
        self.index_size
    }

    /// Length of the container right now.
    pub fn container_len(&self) -> Result<u64> {
        Ok(self.base.stream_len()?)
    }

    // ── Access ───────────────────────────────────────────────────────────────

    /// Check the entry still fits in the container.
    fn check_bounds(&self, entry: &StreamIndex) -> Result<()> {
        let container = self.container_len()?;
        match entry.block.end() {
            Some(end) if end <= container => Ok(()),
            end => Err(PackageError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry '{}' ends at {} but the container is {} bytes",
                    entry.path,
                    end.map_or_else(|| "overflow".to_owned(), |e| e.to_string()),
                    container
                ),
            ))),
        }
    }

    /// Open a bounded stream over one entry.
    pub fn open_stream<'a, T: Into<EntryTarget<'a>>>(&self, target: T) -> Result<SubStream> {
        let entry = self.resolve(target)?;
        self.check_bounds(entry)?;
        if entry.block.is_empty() {
            return Ok(empty_view());
        }
        trace!(path = %entry.path, position = entry.block.position, length = entry.block.length, "open view");
        Ok(self.strategy.open_view(&self.base, entry.block.position, entry.block.length)?)
    }

    /// Copy one entry's bytes to `dest`.  Returns the number of bytes copied.
    pub fn copy_to<'a, T, W>(&self, target: T, dest: &mut W) -> Result<u64>
    where
        T: Into<EntryTarget<'a>>,
        W: Write + ?Sized,
    {
        let entry = self.resolve(target)?;
        self.copy_entry(entry, dest)
    }

    fn copy_entry<W: Write + ?Sized>(&self, entry: &StreamIndex, dest: &mut W) -> Result<u64> {
        self.check_bounds(entry)?;
        if entry.block.is_empty() {
            return Ok(0);
        }

        let mut buf = self
            .copy_buf
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let mut base = self.base.lock()?;
        base.seek(SeekFrom::Start(entry.block.position))?;
        Ok(copy_exact(&mut *base, dest, entry.block.length, &mut buf[..])?)
    }

    /// Read one entry fully into memory.
    pub fn read_all_bytes<'a, T: Into<EntryTarget<'a>>>(&self, target: T) -> Result<Vec<u8>> {
        let entry = self.resolve(target)?;
        // The range must fit the container before its length sizes anything.
        self.check_bounds(entry)?;
        let mut out = Vec::new();
        if let Ok(n) = usize::try_from(entry.block.length) {
            // Fall back to a growing buffer when the allocator says no.
            let _ = out.try_reserve_exact(n);
        }
        self.copy_entry(entry, &mut out)?;
        Ok(out)
    }
}

fn parse_index<R: Read>(stream: &mut R) -> Result<(EntryTable, u64)> {
    let mut input = BufReader::new(stream);
    let mut table = EntryTable::new();
    let mut size  = record::TERMINATOR_SIZE;

    loop {
        match record::read_record(&mut input)? {
            Record::Terminator => break,
            Record::Entry(entry) => {
                trace!(path = %entry.path, position = entry.block.position, length = entry.block.length, "index record");
                size += record::entry_size(entry.path.encode_utf16().count());
                let path = entry.path.clone();
                if table.push(entry).is_some() {
                    warn!(%path, "duplicate path in package index; lookups resolve to the last one");
                }
            }
        }
    }
    Ok((table, size))
}

// ── DirectoryListing ──────────────────────────────────────────────────────────

/// Lazy one-level directory listing.  Clone it to restart from the top.
#[derive(Debug, Clone)]
pub struct DirectoryListing<'a> {
    entries: &'a [StreamIndex],
    dir:     &'a str,
    pos:     usize,
}

impl<'a> DirectoryListing<'a> {
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl<'a> Iterator for DirectoryListing<'a> {
    type Item = &'a StreamIndex;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.entries.get(self.pos) {
            self.pos += 1;
            if is_direct_child(self.dir, &entry.path) {
                return Some(entry);
            }
        }
        None
    }
}
