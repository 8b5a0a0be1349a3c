//! Bounded sub-streams over a container.
//!
//! A [`BoundedView`] presents `[position, position + length)` of a base
//! stream as a stream of its own, starting at offset 0.  Views never copy
//! the payload; each read goes straight to the base at the view's own
//! cursor.
//!
//! How the base is reached is a [`ViewStrategy`] chosen when the reader is
//! built:
//!
//! | Strategy | Base | Independent |
//! |----------|------|-------------|
//! | [`SharedViews`] | the reader's own stream, behind a mutex | no |
//! | [`FileViews`] | a fresh OS handle per view | yes |
//!
//! Views from [`SharedViews`] serialize on one lock and share one file
//! position, so concurrent users must coordinate among themselves.  Views
//! from [`FileViews`] can be read from different threads freely.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Object-safe `Read + Seek`.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// A stream handed out by the reader for one entry.
pub type SubStream = Box<dyn ReadSeek + Send>;

/// Stream returned for zero-length entries; never touches the container.
pub fn empty_view() -> SubStream {
    Box::new(Cursor::new(Vec::<u8>::new()))
}

// ── SharedStream ──────────────────────────────────────────────────────────────

/// A base stream behind `Arc<Mutex<_>>`.  Cloning shares the stream.
pub struct SharedStream<R> {
    inner: Arc<Mutex<R>>,
}

impl<R> Clone for SharedStream<R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<R> fmt::Debug for SharedStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStream").finish_non_exhaustive()
    }
}

impl<R> SharedStream<R> {
    pub fn new(stream: R) -> Self {
        Self { inner: Arc::new(Mutex::new(stream)) }
    }

    pub fn lock(&self) -> io::Result<MutexGuard<'_, R>> {
        self.inner
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl<R: Read + Seek> SharedStream<R> {
    /// Seek and read under one lock so no other view can move the base in
    /// between.
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.lock()?;
        stream.seek(SeekFrom::Start(position))?;
        stream.read(buf)
    }

    /// Current length of the base stream.
    pub fn stream_len(&self) -> io::Result<u64> {
        let mut stream = self.lock()?;
        let here = stream.stream_position()?;
        let end  = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(here))?;
        Ok(end)
    }
}

// ── BoundedView ───────────────────────────────────────────────────────────────

/// `[start, start + length)` of a shared base, seekable on its own.
///
/// Seeking before the view start is an error.  Seeking past the end is
/// allowed; reads there return 0 bytes.
pub struct BoundedView<R> {
    base:   SharedStream<R>,
    start:  u64,
    length: u64,
    cur:    u64,
}

impl<R> BoundedView<R> {
    pub fn new(base: SharedStream<R>, start: u64, length: u64) -> Self {
        Self { base, start, length, cur: 0 }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl<R: Read + Seek> Read for BoundedView<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cur >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let remain = self.length - self.cur;
        let cap = remain.min(buf.len() as u64) as usize;
        let n = self.base.read_at(self.start + self.cur, &mut buf[..cap])?;
        self.cur += n as u64;
        Ok(n)
    }
}

impl<R> Seek for BoundedView<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p)   => Some(p),
            SeekFrom::End(o)     => self.length.checked_add_signed(o),
            SeekFrom::Current(o) => self.cur.checked_add_signed(o),
        };
        match target {
            Some(p) => {
                self.cur = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the entry",
            )),
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.cur)
    }
}

// ── Strategies ────────────────────────────────────────────────────────────────

/// How a reader turns an entry range into a stream.
pub trait ViewStrategy<R>: Send + Sync {
    /// Open a view over `[position, position + length)`.  Callers have
    /// already checked the range against the container length and handled
    /// `length == 0`.
    fn open_view(&self, base: &SharedStream<R>, position: u64, length: u64) -> io::Result<SubStream>;

    /// Whether views may be read concurrently without interfering.
    fn is_independent(&self) -> bool;
}

/// Views over the reader's own stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedViews;

impl<R: Read + Seek + Send + 'static> ViewStrategy<R> for SharedViews {
    fn open_view(&self, base: &SharedStream<R>, position: u64, length: u64) -> io::Result<SubStream> {
        Ok(Box::new(BoundedView::new(base.clone(), position, length)))
    }

    fn is_independent(&self) -> bool {
        false
    }
}

/// Views over a freshly opened handle to the container file.
#[derive(Debug, Clone)]
pub struct FileViews {
    path: PathBuf,
}

impl FileViews {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_owned() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R> ViewStrategy<R> for FileViews {
    fn open_view(&self, _base: &SharedStream<R>, position: u64, length: u64) -> io::Result<SubStream> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BoundedView::new(SharedStream::new(file), position, length)))
    }

    fn is_independent(&self) -> bool {
        true
    }
}
