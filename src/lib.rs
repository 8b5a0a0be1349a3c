//! Read-only resource packages: a flat index of `(path, position, length)`
//! records followed by raw payload bytes.
//!
//! [`PackageWriter`] lays out and writes a container from pending sources;
//! [`PackageReader`] parses the index once and serves entries as bounded
//! sub-streams.  [`Package`] wraps both around a file on disk.

pub mod error;
pub mod path;
pub mod header;
pub mod record;
pub mod index;
pub mod source;
pub mod io_stream;
pub mod package;
pub mod extract;

pub use error::{PackageError, Result};
pub use index::{FileInfoIndex, StreamBlock, StreamIndex};
pub use source::{FileSource, MemorySource, Source};
pub use io_stream::{
    FileViews, PackJob, PackStep, PackSummary, PackUnit, PackageReader, PackageWriter, ReaderOptions, SharedViews,
    WriterOptions,
};
pub use package::Package;
