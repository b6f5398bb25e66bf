//! Fragment store: split files into fixed-size fragments, collect them out of order, reassemble.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FragmentError;
use crate::identity::ContentId;

/// Default fragment payload size in bytes; small enough for one UDP datagram with headers.
pub const DEFAULT_CHUNK_SIZE: usize = 3000;

/// Byte range of a file. Every fragment repeats the total size and file name, so a receiver
/// can judge completion from fragments alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub offset: u64,
    pub bytes: Vec<u8>,
    pub total_size: u64,
    pub name: String,
}

impl Fragment {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// One past the last byte. Saturates for ranges no store would accept.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.len())
    }

    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.len())
    }
}

/// Split a file into fragments of `chunk_size` bytes (the last one may be shorter).
/// A chunk size of 0 uses the default; an empty file yields one empty fragment.
pub fn split(bytes: &[u8], name: &str, chunk_size: usize) -> Vec<Fragment> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let total_size = bytes.len() as u64;
    if bytes.is_empty() {
        return vec![Fragment {
            offset: 0,
            bytes: Vec::new(),
            total_size,
            name: name.to_string(),
        }];
    }
    bytes
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| Fragment {
            offset: (i * size) as u64,
            bytes: chunk.to_vec(),
            total_size,
            name: name.to_string(),
        })
        .collect()
}

/// A fully reassembled file, ready to be written by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub content: ContentId,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Result of `FragmentStore::put_fragment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A fragment at that offset is already held; nothing changed.
    Duplicate,
    /// Stored; the file still has gaps.
    Incomplete,
    /// Stored, and the file is now whole. The in-memory entry has been dropped.
    Completed(AssembledFile),
}

/// Per-content fragment lists, each kept sorted by offset without duplicate offsets.
#[derive(Debug, Default)]
pub struct FragmentStore {
    files: HashMap<ContentId, Vec<Fragment>>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a complete local file for serving. Replaces anything held under `key`.
    pub fn insert_file(&mut self, key: ContentId, mut fragments: Vec<Fragment>) {
        fragments.sort_by_key(|f| f.offset);
        fragments.dedup_by_key(|f| f.offset);
        self.files.insert(key, fragments);
    }

    /// File a received fragment under `key`. Bytes already covered by held neighbours are
    /// clipped off; a fragment with nothing new left is a `Duplicate`.
    pub fn put_fragment(
        &mut self,
        key: &ContentId,
        mut fragment: Fragment,
    ) -> Result<PutOutcome, FragmentError> {
        if fragment
            .checked_end()
            .map_or(true, |end| end > fragment.total_size)
        {
            return Err(FragmentError::OutOfBounds {
                offset: fragment.offset,
                len: fragment.len(),
                total_size: fragment.total_size,
            });
        }
        let list = self.files.entry(key.clone()).or_default();
        if let Some(first) = list.first() {
            if first.total_size != fragment.total_size {
                return Err(FragmentError::SizeMismatch {
                    expected: first.total_size,
                    got: fragment.total_size,
                });
            }
        }
        let pos = match list.binary_search_by_key(&fragment.offset, |f| f.offset) {
            Ok(_) => return Ok(PutOutcome::Duplicate),
            Err(pos) => pos,
        };
        let had_bytes = !fragment.is_empty();
        if let Some(prev) = pos.checked_sub(1).map(|i| &list[i]) {
            let prev_end = prev.end();
            if prev_end > fragment.offset {
                let skip = (prev_end - fragment.offset).min(fragment.len());
                fragment.bytes.drain(..skip as usize);
                fragment.offset += skip;
            }
        }
        if had_bytes && fragment.is_empty() {
            return Ok(PutOutcome::Duplicate);
        }
        if let Some(next) = list.get(pos) {
            if next.offset < fragment.end() {
                fragment.bytes.truncate((next.offset - fragment.offset) as usize);
            }
        }
        if had_bytes && fragment.is_empty() {
            return Ok(PutOutcome::Duplicate);
        }
        list.insert(pos, fragment);

        if !is_complete(list) {
            return Ok(PutOutcome::Incomplete);
        }
        let fragments = self.files.remove(key).unwrap_or_default();
        Ok(PutOutcome::Completed(assemble(key, fragments)))
    }

    /// Held bytes of `key` from `offset` to the end of the fragment covering it. Offsets inside
    /// a fragment are served as a tail slice, so peers split with another chunk size can resume.
    pub fn fragment_at(&self, key: &ContentId, offset: u64) -> Option<Fragment> {
        let list = self.files.get(key)?;
        let covering = match list.binary_search_by_key(&offset, |f| f.offset) {
            Ok(i) => return Some(list[i].clone()),
            Err(0) => return None,
            Err(i) => &list[i - 1],
        };
        if covering.end() <= offset {
            return None;
        }
        let skip = (offset - covering.offset) as usize;
        Some(Fragment {
            offset,
            bytes: covering.bytes[skip..].to_vec(),
            total_size: covering.total_size,
            name: covering.name.clone(),
        })
    }

    /// Offset to request next under sequential pull: 0 if nothing is held, otherwise the end
    /// of the highest fragment.
    pub fn next_missing_offset(&self, key: &ContentId) -> u64 {
        self.files
            .get(key)
            .and_then(|list| list.last())
            .map(Fragment::end)
            .unwrap_or(0)
    }

    /// Start of the first hole in `[0, total_size)`, if any fragment is held and one exists.
    pub fn first_gap_offset(&self, key: &ContentId) -> Option<u64> {
        let list = self.files.get(key)?;
        let total = list.first()?.total_size;
        let mut cursor = 0;
        for f in list {
            if f.offset > cursor {
                return Some(cursor);
            }
            cursor = cursor.max(f.end());
        }
        (cursor < total).then_some(cursor)
    }

    /// Total size announced by the fragments held for `key`.
    pub fn total_size(&self, key: &ContentId) -> Option<u64> {
        self.files.get(key)?.first().map(|f| f.total_size)
    }

    pub fn contains(&self, key: &ContentId) -> bool {
        self.files.contains_key(key)
    }

    pub fn fragment_count(&self, key: &ContentId) -> usize {
        self.files.get(key).map(Vec::len).unwrap_or(0)
    }
}

/// Offsets chain from 0 without gaps and the lengths add up to the total size.
fn is_complete(sorted: &[Fragment]) -> bool {
    let Some(first) = sorted.first() else {
        return false;
    };
    let mut cursor = 0u64;
    for f in sorted {
        if f.offset != cursor {
            return false;
        }
        cursor += f.len();
    }
    cursor == first.total_size
}

fn assemble(key: &ContentId, fragments: Vec<Fragment>) -> AssembledFile {
    let name = fragments
        .first()
        .map(|f| f.name.clone())
        .unwrap_or_default();
    let total = fragments.first().map(|f| f.total_size).unwrap_or(0) as usize;
    let mut bytes = Vec::with_capacity(total);
    for f in fragments {
        bytes.extend_from_slice(&f.bytes);
    }
    AssembledFile {
        content: key.clone(),
        name,
        bytes,
    }
}
