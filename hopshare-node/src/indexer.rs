//! Local content indexer: walk the shared directory, hash every regular file and seed the node
//! with its zero-hop routes and fragments.

use std::path::{Path, PathBuf};

use anyhow::Context;
use hopshare_core::{split, ContentId, NodeState};
use tracing::{debug, info, warn};

/// One shared file, read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub content: ContentId,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Regular files under `dir`, recursively, in path order. Symbolic links below `dir` are not
/// followed. Fails only if `dir` itself cannot be listed; unreadable entries are skipped.
pub fn files_under(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("open shared directory {}", dir.display()))?;
    let mut pending: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    while let Some(path) = pending.pop() {
        let kind = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta.file_type(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping entry");
                continue;
            }
        };
        if kind.is_symlink() {
            debug!(path = %path.display(), "not following symlink");
        } else if kind.is_dir() {
            match std::fs::read_dir(&path) {
                Ok(children) => pending.extend(children.filter_map(|e| e.ok().map(|e| e.path()))),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping directory"),
            }
        } else if kind.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Read and hash every file under `dir`.
pub fn index(dir: &Path) -> anyhow::Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    for path in files_under(dir)? {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => continue,
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                info!(file = %name, size = bytes.len(), "indexing");
                files.push(LocalFile {
                    content: ContentId::of_bytes(&bytes),
                    name,
                    bytes,
                });
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    Ok(files)
}

/// Register indexed files as owned content. Returns how many new entries were added.
pub fn seed(state: &NodeState, files: Vec<LocalFile>, chunk_size: usize) -> usize {
    files
        .into_iter()
        .filter(|f| {
            let fragments = split(&f.bytes, &f.name, chunk_size);
            state.add_owned_content(f.content.clone(), &f.name, fragments)
        })
        .count()
}
