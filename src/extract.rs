//! Whole-package operations: extracting to a directory and hashing entries.
//!
//! With the `parallel` feature enabled and a reader whose views are
//! independent (see [`PackageReader::views_are_independent`]), both fan out
//! across entries with Rayon.  Otherwise they walk the entries in order.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::index::StreamIndex;
use crate::io_stream::PackageReader;
use crate::path;

// ── Selection ─────────────────────────────────────────────────────────────────

/// Entries whose path contains any of `filters` (all entries when empty),
/// paired with their ordinal so duplicate paths stay distinct.
fn select<'a, R>(reader: &'a PackageReader<R>, filters: &[String]) -> Vec<(usize, &'a StreamIndex)>
where
    R: Read + Seek,
{
    reader
        .iter()
        .enumerate()
        .filter(|(_, e)| filters.is_empty() || filters.iter().any(|f| e.path.contains(f.as_str())))
        .collect()
}

/// Where `entry` lands under `dest`.  Paths are re-validated here because
/// they come from an untrusted container.
fn output_path(dest: &Path, entry: &StreamIndex) -> Result<PathBuf> {
    path::validate(&entry.path)?;
    let mut out = dest.to_path_buf();
    for segment in entry.path.split(path::is_separator) {
        out.push(segment);
    }
    Ok(out)
}

// ── Extraction ────────────────────────────────────────────────────────────────

/// Write every selected entry under `dest`, creating directories as needed.
/// Returns the number of files written.
pub fn extract_all<R>(reader: &PackageReader<R>, dest: &Path, filters: &[String]) -> Result<usize>
where
    R: Read + Seek + Send,
{
    fs::create_dir_all(dest)?;
    let selected = select(reader, filters);

    #[cfg(feature = "parallel")]
    if reader.views_are_independent() {
        use rayon::prelude::*;

        selected
            .par_iter()
            .try_for_each(|(ordinal, entry)| extract_one_streamed(reader, dest, *ordinal, entry))?;
        info!(files = selected.len(), dest = %dest.display(), "extracted (parallel)");
        return Ok(selected.len());
    }

    for (ordinal, entry) in &selected {
        let out_path = output_path(dest, entry)?;
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&out_path)?);
        reader.copy_to(*ordinal, &mut out)?;
        out.flush()?;
        debug!(path = %entry.path, bytes = entry.block.length, "extracted");
    }

    info!(files = selected.len(), dest = %dest.display(), "extracted");
    Ok(selected.len())
}

#[cfg(feature = "parallel")]
fn extract_one_streamed<R>(reader: &PackageReader<R>, dest: &Path, ordinal: usize, entry: &StreamIndex) -> Result<()>
where
    R: Read + Seek,
{
    let out_path = output_path(dest, entry)?;
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut src = reader.open_stream(ordinal)?;
    let mut out = BufWriter::new(File::create(&out_path)?);
    io::copy(&mut src, &mut out)?;
    out.flush()?;
    Ok(())
}

// ── Hashing ───────────────────────────────────────────────────────────────────

/// BLAKE3 of one entry's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDigest {
    pub path:   String,
    pub length: u64,
    pub hash:   [u8; 32],
}

impl EntryDigest {
    pub fn hex(&self) -> String {
        hex::encode(self.hash)
    }
}

fn digest_one<R>(reader: &PackageReader<R>, ordinal: usize, entry: &StreamIndex) -> Result<EntryDigest>
where
    R: Read + Seek,
{
    let mut src = reader.open_stream(ordinal)?;
    let mut hasher = blake3::Hasher::new();
    let length = io::copy(&mut src, &mut hasher)?;
    Ok(EntryDigest {
        path: entry.path.clone(),
        length,
        hash: hasher.finalize().into(),
    })
}

/// Hash every entry, in container order.
pub fn digest_all<R>(reader: &PackageReader<R>) -> Result<Vec<EntryDigest>>
where
    R: Read + Seek + Send,
{
    let selected = select(reader, &[]);

    #[cfg(feature = "parallel")]
    if reader.views_are_independent() {
        use rayon::prelude::*;

        return selected
            .par_iter()
            .map(|(ordinal, entry)| digest_one(reader, *ordinal, entry))
            .collect();
    }

    selected
        .iter()
        .map(|(ordinal, entry)| digest_one(reader, *ordinal, entry))
        .collect()
}
