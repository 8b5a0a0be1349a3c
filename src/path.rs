//! Logical path rules shared by the writer (which enforces them) and the
//! reader (which assumes them).
//!
//! A logical path is one or more non-empty segments joined by `/`.  A `\` on
//! input is accepted as an alternate separator and normalized to `/`.

use std::path::{Component, Path};

use crate::error::{PackageError, Result};

/// Canonical separator stored in the index.
pub const SEPARATOR: char = '/';

/// Longest key the index format can encode, in UTF-16 code units.
pub const MAX_PATH_UNITS: usize = 256;

const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[inline]
pub fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Number of UTF-16 code units `path` occupies in the index.
#[inline]
pub fn utf16_len(path: &str) -> usize {
    path.encode_utf16().count()
}

/// Rewrite every `\` separator as `/`.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Check `path` against the package path invariants.
///
/// Paths longer than [`MAX_PATH_UNITS`] are a format limitation and report
/// `InvalidFormat`; every other violation is `InvalidPath`.
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(PackageError::invalid_path(path, "path is empty"));
    }
    if path.starts_with(is_separator) {
        return Err(PackageError::invalid_path(path, "path starts with a separator"));
    }
    if path.ends_with(is_separator) {
        return Err(PackageError::invalid_path(path, "path ends with a separator"));
    }

    for segment in path.split(is_separator) {
        if segment.is_empty() {
            return Err(PackageError::invalid_path(path, "path contains an empty segment"));
        }
        if segment == ".." {
            return Err(PackageError::invalid_path(path, "path contains a '..' segment"));
        }
        if segment.chars().any(|c| RESERVED.contains(&c) || (c as u32) < 0x20) {
            return Err(PackageError::invalid_path(path, "path contains a reserved character"));
        }
    }

    let units = utf16_len(path);
    if units > MAX_PATH_UNITS {
        return Err(PackageError::InvalidFormat(format!(
            "path '{path}' is {units} UTF-16 units long, the index holds at most {MAX_PATH_UNITS}"
        )));
    }
    Ok(())
}

/// Derive the logical path of `file` relative to `base`.
pub fn relative_to(base: &Path, file: &Path) -> Result<String> {
    let display = file.to_string_lossy();
    let rel = file
        .strip_prefix(base)
        .map_err(|_| PackageError::invalid_path(&display, "file is outside the base directory"))?;

    let mut out = String::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(part) => {
                if !out.is_empty() {
                    out.push(SEPARATOR);
                }
                let part = part
                    .to_str()
                    .ok_or_else(|| PackageError::invalid_path(&display, "file name is not valid UTF-8"))?;
                out.push_str(part);
            }
            Component::CurDir => {}
            _ => return Err(PackageError::invalid_path(&display, "file is outside the base directory")),
        }
    }

    if out.is_empty() {
        return Err(PackageError::invalid_path(&display, "empty relative path"));
    }
    Ok(normalize(&out))
}

/// True when `path` is a direct child of `dir` (one level, not recursive).
/// An empty `dir` matches root-level paths; a trailing separator on `dir` is
/// ignored.
pub fn is_direct_child(dir: &str, path: &str) -> bool {
    let dir = dir.trim_end_matches(is_separator);
    if dir.is_empty() {
        return !path.contains(is_separator);
    }
    match path.strip_prefix(dir) {
        Some(rest) => {
            let mut chars = rest.chars();
            match chars.next() {
                Some(c) if is_separator(c) => {
                    let name = chars.as_str();
                    !name.is_empty() && !name.contains(is_separator)
                }
                _ => false,
            }
        }
        None => false,
    }
}
