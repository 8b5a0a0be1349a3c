//! Byte sources the writer packs from.
//!
//! The writer never touches a filesystem directly: anything that can report
//! whether it exists, how long it is, and open a fresh read stream can be
//! packed.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait Source: Send + Sync + fmt::Debug {
    fn exists(&self) -> bool;

    /// Byte length.  Must not change between layout and payload emission.
    fn length(&self) -> io::Result<u64>;

    /// Open a new stream positioned at the first byte.
    fn open_read(&self) -> io::Result<Box<dyn Read + Send>>;
}

// ── FileSource ────────────────────────────────────────────────────────────────

/// A regular file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_owned() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn length(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

// ── MemorySource ──────────────────────────────────────────────────────────────

/// Bytes already in memory.  Cloning shares the buffer.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemorySource({} bytes)", self.data.len())
    }
}

impl Source for MemorySource {
    fn exists(&self) -> bool {
        true
    }

    fn length(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(SharedBytes(self.data.clone()))))
    }
}

struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
