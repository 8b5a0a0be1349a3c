use std::collections::HashSet;
use std::io::{self, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, trace};
use walkdir::WalkDir;

use crate::error::{PackageError, Result};
use crate::header::{write_header, HEADER_LEN};
use crate::index::{FileInfoIndex, StreamBlock};
use crate::path;
use crate::record;
use crate::source::{FileSource, MemorySource, Source};

use super::DEFAULT_BUFFER_SIZE;

// ── WriterOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`PackageWriter`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Emit the magic header before the index.
    pub write_header: bool,
    /// Payload copy buffer; also the largest [`PackUnit::PayloadChunk`].
    pub buffer_size:  usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            write_header: false,
            buffer_size:  DEFAULT_BUFFER_SIZE,
        }
    }
}

// ── PackageWriter ─────────────────────────────────────────────────────────────

/// Collects pending entries and packs them.
///
/// The pending list belongs to the caller: entries can be added, removed or
/// cleared freely between packs.  Each [`pack`](Self::pack) works on a
/// snapshot of the list taken when it is called.
#[derive(Debug, Default)]
pub struct PackageWriter {
    entries:     Vec<FileInfoIndex>,
    pub options: WriterOptions,
}

impl PackageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: WriterOptions) -> Self {
        Self { entries: Vec::new(), options }
    }

    // ── Pending list ─────────────────────────────────────────────────────────

    pub fn add(&mut self, source: Arc<dyn Source>, data_path: &str) {
        self.entries.push(FileInfoIndex::new(source, data_path));
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P, data_path: &str) {
        self.add(Arc::new(FileSource::new(file)), data_path);
    }

    pub fn add_bytes(&mut self, data: impl Into<Arc<[u8]>>, data_path: &str) {
        self.add(Arc::new(MemorySource::new(data)), data_path);
    }

    /// Add every regular file under `dir`, sorted by file name.
    ///
    /// Each entry is stored under its path relative to `base`, or relative to
    /// `dir` itself when `base` is `None`.  `base` must be a lexical prefix of
    /// `dir`.  Returns how many files were added.  On error nothing is added.
    pub fn add_directory<P: AsRef<Path>>(&mut self, dir: P, base: Option<&Path>, recursive: bool) -> Result<usize> {
        let dir  = dir.as_ref();
        let base = base.unwrap_or(dir);

        let mut walker = WalkDir::new(dir).follow_links(false).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut found = Vec::new();
        for ent in walker {
            let ent = ent.map_err(|e| {
                let msg = e.to_string();
                PackageError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, msg)),
                )
            })?;
            if !ent.file_type().is_file() {
                continue;
            }
            let data_path = path::relative_to(base, ent.path())?;
            trace!(file = %ent.path().display(), %data_path, "queued");
            found.push(FileInfoIndex::new(Arc::new(FileSource::new(ent.path())), &data_path));
        }

        let added = found.len();
        self.entries.extend(found);
        debug!(dir = %dir.display(), added, "added directory");
        Ok(added)
    }

    pub fn entries(&self) -> &[FileInfoIndex] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<FileInfoIndex> {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending entry stored under `data_path`.
    pub fn remove(&mut self, data_path: &str) -> bool {
        let data_path = path::normalize(data_path);
        let before = self.entries.len();
        self.entries.retain(|e| e.data_path != data_path);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // ── Layout ───────────────────────────────────────────────────────────────

    /// Check every pending entry without writing anything.
    pub fn validate(&self) -> Result<()> {
        validate_entries(&self.entries)
    }

    /// Exact size of the index for the pending entries, terminator included.
    pub fn index_size(&self) -> u64 {
        record::index_size(self.entries.iter().map(|e| e.data_path.as_str()))
    }

    // ── Packing ──────────────────────────────────────────────────────────────

    /// Start packing into `dest`.
    ///
    /// `start_position` is where `dest` currently is in the container; entry
    /// offsets are absolute, so it must match what a reader will see.
    pub fn pack<W: Write>(&self, dest: W, start_position: u64) -> PackJob<W> {
        PackJob::new(dest, self.entries.clone(), self.options.clone(), start_position)
    }

    /// Like [`pack`](Self::pack), taking the start position from `dest`.
    pub fn pack_seekable<W: Write + Seek>(&self, mut dest: W) -> Result<PackJob<W>> {
        let start = dest.stream_position()?;
        Ok(self.pack(dest, start))
    }

    /// Pack to completion, returning the first error hit.
    pub fn pack_all<W: Write>(&self, dest: W, start_position: u64) -> Result<PackSummary> {
        self.pack(dest, start_position).finish()
    }
}

fn validate_entries(entries: &[FileInfoIndex]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for e in entries {
        if !e.source.exists() {
            return Err(PackageError::MissingSource(e.data_path.clone()));
        }
        path::validate(&e.data_path)?;
        if !seen.insert(e.data_path.as_str()) {
            return Err(PackageError::DuplicatePath(e.data_path.clone()));
        }
    }
    Ok(())
}

// ── PackJob ───────────────────────────────────────────────────────────────────

/// One unit of work finished by [`PackJob::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackUnit {
    /// Every pending entry passed validation.
    Validated { entries: usize },
    /// Offsets computed; payload begins at `payload_start`.
    LaidOut { index_size: u64, payload_start: u64 },
    /// Magic header written.
    Header,
    IndexRecord { ordinal: usize, path: String },
    /// Terminator written; the whole index is on disk.
    IndexTerminated { index_size: u64 },
    PayloadChunk { ordinal: usize, bytes: usize },
    FileComplete { ordinal: usize, path: String },
}

/// Result of one [`PackJob::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackStep {
    Progress(PackUnit),
    Done,
    /// The job stopped on an error; see [`PackJob::last_error`].
    Failed,
}

/// Totals for a finished pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackSummary {
    pub entries:       usize,
    pub index_size:    u64,
    pub payload_bytes: u64,
    pub bytes_written: u64,
}

enum JobState {
    Validate,
    Layout,
    Header,
    Index { next: usize },
    Terminator,
    Payload { next: usize, open: Option<OpenSource> },
    Flush,
    Done,
    Failed,
}

struct OpenSource {
    reader:    Box<dyn Read + Send>,
    remaining: u64,
}

/// A pack in progress.
///
/// Each [`step`](Self::step) performs one unit of work: validation, layout,
/// one index record, the terminator, one payload chunk, or closing out one
/// file.  Stop calling it to cancel; the destination is then left truncated.
/// The first error is kept in [`last_error`](Self::last_error) and ends the
/// job.  Nothing already written is rolled back.
pub struct PackJob<W> {
    dest:          W,
    entries:       Vec<FileInfoIndex>,
    options:       WriterOptions,
    start:         u64,
    state:         JobState,
    layout:        Vec<StreamBlock>,
    index_size:    u64,
    buf:           Vec<u8>,
    bytes_written: u64,
    last_error:    Option<PackageError>,
}

impl<W: Write> PackJob<W> {
    fn new(dest: W, entries: Vec<FileInfoIndex>, options: WriterOptions, start: u64) -> Self {
        Self {
            dest,
            entries,
            start,
            state:         JobState::Validate,
            layout:        Vec::new(),
            index_size:    0,
            buf:           vec![0u8; options.buffer_size.max(1)],
            bytes_written: 0,
            last_error:    None,
            options,
        }
    }

    /// Advance by one unit of work.
    pub fn step(&mut self) -> PackStep {
        match self.state {
            JobState::Done   => return PackStep::Done,
            JobState::Failed => return PackStep::Failed,
            _ => {}
        }
        match self.advance() {
            Ok(Some(unit)) => PackStep::Progress(unit),
            Ok(None) => {
                self.state = JobState::Done;
                debug!(entries = self.entries.len(), bytes = self.bytes_written, "pack complete");
                PackStep::Done
            }
            Err(e) => {
                error!(error = %e, bytes = self.bytes_written, "pack failed");
                self.state = JobState::Failed;
                self.last_error = Some(e);
                PackStep::Failed
            }
        }
    }

    /// Run the state machine one transition.  The state is `Failed` while a
    /// transition runs, so an early `?` leaves the job failed.
    fn advance(&mut self) -> Result<Option<PackUnit>> {
        let state = std::mem::replace(&mut self.state, JobState::Failed);
        let (next, unit) = match state {
            JobState::Validate => {
                validate_entries(&self.entries)?;
                (JobState::Layout, PackUnit::Validated { entries: self.entries.len() })
            }
            JobState::Layout => {
                let payload_start = self.lay_out()?;
                let next = if self.options.write_header {
                    JobState::Header
                } else {
                    self.first_index_state()
                };
                (next, PackUnit::LaidOut { index_size: self.index_size, payload_start })
            }
            JobState::Header => {
                write_header(&mut self.dest)?;
                self.bytes_written += HEADER_LEN;
                (self.first_index_state(), PackUnit::Header)
            }
            JobState::Index { next: ordinal } => {
                let entry = &self.entries[ordinal];
                let block = self.layout[ordinal];
                record::write_entry(&mut self.dest, &entry.data_path, block)?;
                self.bytes_written += record::entry_size(path::utf16_len(&entry.data_path));
                trace!(ordinal, path = %entry.data_path, position = block.position, length = block.length, "index record");

                let path = entry.data_path.clone();
                let next = if ordinal + 1 < self.entries.len() {
                    JobState::Index { next: ordinal + 1 }
                } else {
                    JobState::Terminator
                };
                (next, PackUnit::IndexRecord { ordinal, path })
            }
            JobState::Terminator => {
                record::write_terminator(&mut self.dest)?;
                self.bytes_written += record::TERMINATOR_SIZE;
                debug_assert_eq!(self.bytes_written, self.header_len() + self.index_size);

                let next = if self.entries.is_empty() {
                    JobState::Flush
                } else {
                    JobState::Payload { next: 0, open: None }
                };
                (next, PackUnit::IndexTerminated { index_size: self.index_size })
            }
            JobState::Payload { next: ordinal, open } => self.payload_step(ordinal, open)?,
            JobState::Flush => {
                self.dest.flush()?;
                self.state = JobState::Done;
                return Ok(None);
            }
            JobState::Done | JobState::Failed => unreachable!("terminal states are handled in step()"),
        };
        self.state = next;
        Ok(Some(unit))
    }

    fn header_len(&self) -> u64 {
        if self.options.write_header { HEADER_LEN } else { 0 }
    }

    fn first_index_state(&self) -> JobState {
        if self.entries.is_empty() {
            JobState::Terminator
        } else {
            JobState::Index { next: 0 }
        }
    }

    /// Compute the index size and every entry's absolute payload range.
    /// Returns where the payload starts.
    fn lay_out(&mut self) -> Result<u64> {
        self.index_size = record::index_size(self.entries.iter().map(|e| e.data_path.as_str()));
        let payload_start = self
            .start
            .checked_add(self.header_len() + self.index_size)
            .ok_or_else(|| PackageError::InvalidFormat("payload offset overflows".into()))?;

        let mut offset = payload_start;
        let mut layout = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            let length = e.source.length()?;
            layout.push(StreamBlock::new(offset, length));
            offset = offset.checked_add(length).ok_or_else(|| {
                PackageError::InvalidFormat(format!("payload offset overflows at '{}'", e.data_path))
            })?;
        }
        debug!(
            entries       = self.entries.len(),
            index_size    = self.index_size,
            payload_start,
            payload_end   = offset,
            "laid out package"
        );
        self.layout = layout;
        Ok(payload_start)
    }

    fn payload_step(&mut self, ordinal: usize, open: Option<OpenSource>) -> Result<(JobState, PackUnit)> {
        let length = self.layout[ordinal].length;

        let mut open = match open {
            Some(open) => open,
            None if length == 0 => return Ok(self.complete_file(ordinal)),
            None => OpenSource {
                reader:    self.entries[ordinal].source.open_read()?,
                remaining: length,
            },
        };
        if open.remaining == 0 {
            return Ok(self.complete_file(ordinal));
        }

        let want = open.remaining.min(self.buf.len() as u64) as usize;
        let n = loop {
            match open.reader.read(&mut self.buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            return Err(PackageError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source for '{}' ended {} bytes short of its declared length",
                    self.entries[ordinal].data_path, open.remaining
                ),
            )));
        }
        self.dest.write_all(&self.buf[..n])?;
        self.bytes_written += n as u64;
        open.remaining -= n as u64;

        Ok((
            JobState::Payload { next: ordinal, open: Some(open) },
            PackUnit::PayloadChunk { ordinal, bytes: n },
        ))
    }

    fn complete_file(&self, ordinal: usize) -> (JobState, PackUnit) {
        let next = if ordinal + 1 < self.entries.len() {
            JobState::Payload { next: ordinal + 1, open: None }
        } else {
            JobState::Flush
        };
        let path = self.entries[ordinal].data_path.clone();
        (next, PackUnit::FileComplete { ordinal, path })
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// True until the job is done or has failed.
    pub fn is_packing(&self) -> bool {
        !matches!(self.state, JobState::Done | JobState::Failed)
    }

    pub fn last_error(&self) -> Option<&PackageError> {
        self.last_error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<PackageError> {
        self.last_error.take()
    }

    /// Index size, known once the job is past layout.
    pub fn index_size(&self) -> u64 {
        self.index_size
    }

    /// Absolute entry ranges, known once the job is past layout.
    pub fn layout(&self) -> &[StreamBlock] {
        &self.layout
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Drive the job to the end.
    pub fn finish(mut self) -> Result<PackSummary> {
        while let PackStep::Progress(_) = self.step() {}
        if let Some(e) = self.last_error.take() {
            return Err(e);
        }
        Ok(PackSummary {
            entries:       self.entries.len(),
            index_size:    self.index_size,
            payload_bytes: self.layout.iter().map(|b| b.length).sum(),
            bytes_written: self.bytes_written,
        })
    }

    /// Give back the destination stream.
    pub fn into_inner(self) -> W {
        self.dest
    }
}

impl<W: Write> Iterator for PackJob<W> {
    type Item = PackUnit;

    /// Yields units until the job ends; check
    /// [`last_error`](PackJob::last_error) afterwards.
    fn next(&mut self) -> Option<PackUnit> {
        match self.step() {
            PackStep::Progress(unit) => Some(unit),
            PackStep::Done | PackStep::Failed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Debug)]
    struct ShortSource;

    impl Source for ShortSource {
        fn exists(&self) -> bool { true }
        fn length(&self) -> io::Result<u64> { Ok(10) }
        fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(b"abc".to_vec())))
        }
    }

    #[derive(Debug)]
    struct Missing;

    impl Source for Missing {
        fn exists(&self) -> bool { false }
        fn length(&self) -> io::Result<u64> { Ok(0) }
        fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"))
        }
    }

    #[test]
    fn step_sequence_is_ordered() {
        let mut w = PackageWriter::with_options(WriterOptions { write_header: false, buffer_size: 2 });
        w.add_bytes(b"abc".to_vec(), "x");
        w.add_bytes(Vec::<u8>::new(), "e");

        let mut out = Vec::new();
        let units: Vec<PackUnit> = w.pack(&mut out, 0).collect();
        let idx = record::index_size(["x", "e"]);
        assert_eq!(
            units,
            vec![
                PackUnit::Validated { entries: 2 },
                PackUnit::LaidOut { index_size: idx, payload_start: idx },
                PackUnit::IndexRecord { ordinal: 0, path: "x".into() },
                PackUnit::IndexRecord { ordinal: 1, path: "e".into() },
                PackUnit::IndexTerminated { index_size: idx },
                PackUnit::PayloadChunk { ordinal: 0, bytes: 2 },
                PackUnit::PayloadChunk { ordinal: 0, bytes: 1 },
                PackUnit::FileComplete { ordinal: 0, path: "x".into() },
                PackUnit::FileComplete { ordinal: 1, path: "e".into() },
            ]
        );
        assert_eq!(out.len() as u64, idx + 3);
    }

    #[test]
    fn invalid_paths_write_nothing() {
        for bad in ["..\\x", "\\x", "a\\\\b"] {
            let mut w = PackageWriter::new();
            w.add_bytes(b"data".to_vec(), bad);
            let mut out = Vec::new();
            let err = w.pack_all(&mut out, 0).unwrap_err();
            assert!(matches!(err, PackageError::InvalidPath { .. }), "{bad}: {err:?}");
            assert!(out.is_empty(), "{bad} wrote {} bytes", out.len());
        }
    }

    #[test]
    fn duplicate_and_missing_sources_are_rejected() {
        let mut w = PackageWriter::new();
        w.add_bytes(b"1".to_vec(), "a/b");
        w.add_bytes(b"2".to_vec(), "a\\b");
        assert!(matches!(w.validate(), Err(PackageError::DuplicatePath(p)) if p == "a/b"));

        let mut w = PackageWriter::new();
        w.add(Arc::new(Missing), "gone");
        assert!(matches!(w.validate(), Err(PackageError::MissingSource(_))));
    }

    #[test]
    fn short_source_fails_and_sticks() {
        let mut w = PackageWriter::new();
        w.add(Arc::new(ShortSource), "short");
        let mut job = w.pack(Vec::new(), 0);
        let units: Vec<_> = job.by_ref().collect();
        assert!(matches!(units.last(), Some(PackUnit::PayloadChunk { bytes: 3, .. })));
        assert!(!job.is_packing());
        assert!(matches!(
            job.last_error(),
            Some(PackageError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
        assert_eq!(job.step(), PackStep::Failed);
    }

    #[test]
    fn header_shifts_offsets() {
        let mut w = PackageWriter::with_options(WriterOptions { write_header: true, ..Default::default() });
        w.add_bytes(b"z".to_vec(), "z");
        let mut job = w.pack(Vec::new(), 100);
        while let PackStep::Progress(_) = job.step() {}
        let expected = 100 + HEADER_LEN + record::index_size(["z"]);
        assert_eq!(job.layout()[0], StreamBlock::new(expected, 1));
        let out = job.into_inner();
        assert_eq!(&out[..HEADER_LEN as usize], &crate::header::MAGIC);
    }

    #[test]
    fn failed_directory_walk_queues_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        let elsewhere = tempfile::tempdir().unwrap();

        let mut w = PackageWriter::new();
        w.add_bytes(b"kept".to_vec(), "kept");
        let err = w.add_directory(dir.path(), Some(elsewhere.path()), true).unwrap_err();
        assert!(matches!(err, PackageError::InvalidPath { .. }));
        assert_eq!(w.len(), 1);

        assert_eq!(w.add_directory(dir.path(), None, true).unwrap(), 2);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn remove_and_clear() {
        let mut w = PackageWriter::new();
        w.add_bytes(b"1".to_vec(), "a\\b");
        w.add_bytes(b"2".to_vec(), "c");
        assert!(w.remove("a/b"));
        assert!(!w.remove("a/b"));
        assert_eq!(w.len(), 1);
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.index_size(), 1);
    }
}
