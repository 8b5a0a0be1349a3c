//! Index entry types.
//!
//! Reader side: [`StreamIndex`] pairs a logical path with the [`StreamBlock`]
//! it occupies in the container, and [`EntryTable`] holds them in on-disk
//! order with a path lookup on top.  Writer side: [`FileInfoIndex`] pairs a
//! pending [`Source`] with the path it will be stored under.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::path::normalize;
use crate::source::Source;

// ── StreamBlock ───────────────────────────────────────────────────────────────

/// Byte range `[position, position + length)` inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamBlock {
    pub position: u64,
    pub length:   u64,
}

impl StreamBlock {
    pub fn new(position: u64, length: u64) -> Self {
        Self { position, length }
    }

    /// One past the last byte, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.position.checked_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

// ── StreamIndex ───────────────────────────────────────────────────────────────

/// A resolved entry.  Equality and hashing look at `path` only.
#[derive(Debug, Clone, Serialize)]
pub struct StreamIndex {
    pub path:  String,
    #[serde(flatten)]
    pub block: StreamBlock,
}

impl StreamIndex {
    pub fn new(path: impl Into<String>, block: StreamBlock) -> Self {
        Self { path: path.into(), block }
    }

    pub fn position(&self) -> u64 { self.block.position }
    pub fn length(&self)   -> u64 { self.block.length }
}

impl PartialEq for StreamIndex {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for StreamIndex {}

impl Hash for StreamIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

// ── FileInfoIndex ─────────────────────────────────────────────────────────────

/// A pending writer entry: where the bytes come from and where they go.
#[derive(Clone)]
pub struct FileInfoIndex {
    pub source:    Arc<dyn Source>,
    pub data_path: String,
}

impl FileInfoIndex {
    /// `data_path` separators are normalized to `/`; validation happens when
    /// the package is written.
    pub fn new(source: Arc<dyn Source>, data_path: &str) -> Self {
        Self { source, data_path: normalize(data_path) }
    }
}

impl fmt::Debug for FileInfoIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileInfoIndex")
            .field("source", &self.source)
            .field("data_path", &self.data_path)
            .finish()
    }
}

// ── EntryTable ────────────────────────────────────────────────────────────────

/// Entries in container order plus a path → position map into the same
/// vector.
///
/// If a container repeats a path, every occurrence stays in the vector but
/// the map points at the last one.
#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    entries: Vec<StreamIndex>,
    by_path: HashMap<String, usize>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`; returns the slot it replaced in the path map, if any.
    pub fn push(&mut self, entry: StreamIndex) -> Option<usize> {
        let slot = self.entries.len();
        let replaced = self.by_path.insert(entry.path.clone(), slot);
        self.entries.push(entry);
        replaced
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StreamIndex> {
        self.entries.get(index)
    }

    pub fn position_of(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    pub fn by_path(&self, path: &str) -> Option<&StreamIndex> {
        self.position_of(path).map(|i| &self.entries[i])
    }

    pub fn as_slice(&self) -> &[StreamIndex] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamIndex> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a EntryTable {
    type Item = &'a StreamIndex;
    type IntoIter = std::slice::Iter<'a, StreamIndex>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
