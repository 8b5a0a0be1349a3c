use std::io;
use thiserror::Error;

/// Every failure the package reader and writer can report.
///
/// Format and bounds errors are fatal for the operation in progress; nothing
/// here is retried or partially recovered.
#[derive(Error, Debug)]
pub enum PackageError {
    /// Underlying stream failure, or an entry whose declared range no longer
    /// fits inside the container (`ErrorKind::UnexpectedEof`).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid package format: {0}")]
    InvalidFormat(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry index {index} out of range (package has {count} entries)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Duplicate path in package: {0}")]
    DuplicatePath(String),

    #[error("Source for '{0}' does not exist")]
    MissingSource(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl PackageError {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        PackageError::InvalidPath { path: path.to_owned(), reason }
    }

    /// True for the lookup failures (`NotFound` and `IndexOutOfRange`).
    pub fn is_not_found(&self) -> bool {
        matches!(self, PackageError::NotFound(_) | PackageError::IndexOutOfRange { .. })
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, PackageError>;
