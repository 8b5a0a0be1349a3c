//! High-level [`Package`] API over a file on disk.
//!
//! ```no_run
//! use respack::package::Package;
//! use respack::io_stream::WriterOptions;
//!
//! // Write
//! let mut pkg = Package::create("assets.pak", WriterOptions::default())?;
//! pkg.add_bytes("readme.txt", b"Hello, world!")?;
//! pkg.finalize()?;
//!
//! // Read
//! let pkg = Package::open("assets.pak")?;
//! assert_eq!(pkg.read_file("readme.txt")?, b"Hello, world!");
//! # Ok::<(), respack::PackageError>(())
//! ```
//!
//! A package being created is staged in a temporary file next to the
//! destination and renamed into place by [`Package::finalize`], so readers
//! never see a half-written container.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::mem;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{PackageError, Result};
use crate::extract;
use crate::index::StreamIndex;
use crate::io_stream::{
    DirectoryListing, EntryTarget, PackSummary, PackageReader, PackageWriter, ReaderOptions, SubStream, WriterOptions,
};

// ── PackageMode ───────────────────────────────────────────────────────────────

enum PackageMode {
    Read(PackageReader<File>),
    Write { writer: PackageWriter, staging: NamedTempFile },
    /// A finalize failed part-way; the staging file is gone.
    Closed,
}

// ── Package ───────────────────────────────────────────────────────────────────

pub struct Package {
    path: PathBuf,
    mode: PackageMode,
}

impl Package {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let reader = PackageReader::open_file(&path, options)?;
        Ok(Self { path, mode: PackageMode::Read(reader) })
    }

    pub fn create<P: AsRef<Path>>(path: P, options: WriterOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
            _ => PathBuf::from("."),
        };
        let staging = NamedTempFile::new_in(dir)?;
        let writer = PackageWriter::with_options(options);
        Ok(Self { path, mode: PackageMode::Write { writer, staging } })
    }

    // ── Write ─────────────────────────────────────────────────────────────────

    /// Queue a file from disk under `data_path`.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P, data_path: &str) -> Result<()> {
        self.writer()?.add_file(file, data_path);
        Ok(())
    }

    pub fn add_bytes(&mut self, data_path: &str, data: &[u8]) -> Result<()> {
        self.writer()?.add_bytes(data.to_vec(), data_path);
        Ok(())
    }

    /// Queue every file under `dir`; see [`PackageWriter::add_directory`].
    pub fn add_directory<P: AsRef<Path>>(&mut self, dir: P, base: Option<&Path>, recursive: bool) -> Result<usize> {
        self.writer()?.add_directory(dir, base, recursive)
    }

    /// Pack the queued entries and move the container into place.
    ///
    /// On success the package switches to read mode over the new file.  On
    /// failure nothing is left at the destination and the package is closed.
    pub fn finalize(&mut self) -> Result<PackSummary> {
        let (writer, mut staging) = match mem::replace(&mut self.mode, PackageMode::Closed) {
            PackageMode::Write { writer, staging } => (writer, staging),
            other => {
                self.mode = other;
                return Err(read_only());
            }
        };

        let summary = writer.pack_all(BufWriter::new(staging.as_file_mut()), 0)?;
        publish_permissions(staging.as_file(), &self.path)?;
        staging.persist(&self.path).map_err(|e| PackageError::Io(e.error))?;
        info!(path = %self.path.display(), entries = summary.entries, bytes = summary.bytes_written, "package written");

        let options = ReaderOptions {
            verify_header: writer.options.write_header,
            ..Default::default()
        };
        self.mode = PackageMode::Read(PackageReader::open_file(&self.path, options)?);
        Ok(summary)
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    pub fn list(&self) -> Result<&[StreamIndex]> {
        Ok(self.reader()?.entries())
    }

    pub fn list_directory<'a>(&'a self, dir: &'a str) -> Result<DirectoryListing<'a>> {
        Ok(self.reader()?.list_by_directory(dir))
    }

    pub fn stat(&self, data_path: &str) -> Option<&StreamIndex> {
        match &self.mode {
            PackageMode::Read(r) => r.try_entry_by_path(data_path),
            _ => None,
        }
    }

    pub fn read_file(&self, data_path: &str) -> Result<Vec<u8>> {
        self.reader()?.read_all_bytes(data_path)
    }

    pub fn open_stream<'a, T: Into<EntryTarget<'a>>>(&self, target: T) -> Result<SubStream> {
        self.reader()?.open_stream(target)
    }

    /// Read `buf.len()` bytes or fewer from `data_path` starting at `offset`.
    pub fn read_at(&self, data_path: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        use std::io::{Seek, SeekFrom};

        let mut stream = self.open_stream(data_path)?;
        stream.seek(SeekFrom::Start(offset))?;
        Ok(stream.read(buf)?)
    }

    /// Extract all entries into `dest`, creating it if necessary.
    pub fn extract_all<P: AsRef<Path>>(&self, dest: P) -> Result<usize> {
        extract::extract_all(self.reader()?, dest.as_ref(), &[])
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reader(&self) -> Result<&PackageReader<File>> {
        match &self.mode {
            PackageMode::Read(r)      => Ok(r),
            PackageMode::Write { .. } => Err(write_only()),
            PackageMode::Closed       => Err(closed()),
        }
    }

    fn writer(&mut self) -> Result<&mut PackageWriter> {
        match &mut self.mode {
            PackageMode::Write { writer, .. } => Ok(writer),
            PackageMode::Read(_)              => Err(read_only()),
            PackageMode::Closed               => Err(closed()),
        }
    }
}

/// Staging files are created owner-only.  Give the package the mode of the
/// file it replaces, or `0o644` when there is none.
fn publish_permissions(staging: &File, dest: &Path) -> io::Result<()> {
    match fs::metadata(dest) {
        Ok(meta) => staging.set_permissions(meta.permissions()),
        Err(_)   => set_default_permissions(staging),
    }
}

#[cfg(unix)]
fn set_default_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}

fn read_only()  -> PackageError { PackageError::Unsupported("package is read-only".into()) }
fn write_only() -> PackageError { PackageError::Unsupported("package is write-only".into()) }
fn closed()     -> PackageError { PackageError::Unsupported("package is closed".into()) }
