//! In-memory source trees and atomic directory replacement.
//!
//! Patch application never touches a directory in place: the result is
//! written to a `.<name>.weft-new` sibling, the old directory is moved to
//! `.<name>.weft-old`, and the new one is renamed into position. A crash at
//! any point leaves either the old or the new tree reachable, and
//! [`recover_stale`] tidies up on the next run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::warn;
use weft_cache::{TreeHasher, TreeSnapshot};
use weft_common::ContentHash;

use crate::error::PatchError;

const STAGING_SUFFIX: &str = "weft-new";
const RETIRED_SUFFIX: &str = "weft-old";

/// A directory of files held in memory, keyed by `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl SourceTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every file below `dir`. `.git` directories are skipped.
    pub fn read(dir: &Path) -> Result<Self, PatchError> {
        let listed = TreeHasher::list_files(dir)?;
        let files: Result<BTreeMap<String, Vec<u8>>, PatchError> = listed
            .into_par_iter()
            .map(|(rel, abs)| {
                std::fs::read(&abs)
                    .map(|bytes| (rel, bytes))
                    .map_err(|e| PatchError::io(abs, e))
            })
            .collect();
        Ok(Self { files: files? })
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the tree has no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns `true` if `path` is present.
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Raw content of a file.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Content of a file as text. Fails for non-UTF-8 content.
    pub fn get_text(&self, path: &str) -> Result<Option<&str>, PatchError> {
        match self.files.get(path) {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|_| PatchError::BinaryFile {
                    path: path.to_string(),
                }),
        }
    }

    /// Adds or replaces a file.
    pub fn insert(&mut self, path: &str, content: impl Into<Vec<u8>>) -> Result<(), PatchError> {
        check_relative(path)?;
        self.files.insert(path.to_string(), content.into());
        Ok(())
    }

    /// Removes a file, returning its content.
    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    /// Paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// `(path, content)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    /// Per-file content hashes.
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            files: self
                .files
                .par_iter()
                .map(|(p, c)| (p.clone(), ContentHash::from_bytes(c)))
                .collect(),
        }
    }

    /// Content-addressed identity; equals the hash of the same tree on disk.
    pub fn hash(&self) -> ContentHash {
        self.snapshot().tree_hash()
    }

    /// Writes every file below `dir`, creating directories as needed.
    pub fn write_to(&self, dir: &Path) -> Result<(), PatchError> {
        std::fs::create_dir_all(dir).map_err(|e| PatchError::io(dir, e))?;
        for (rel, content) in &self.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
            }
            std::fs::write(&path, content).map_err(|e| PatchError::io(&path, e))?;
        }
        Ok(())
    }
}

impl FromIterator<(String, Vec<u8>)> for SourceTree {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Rejects paths that are absolute, empty, or climb out of the tree.
fn check_relative(path: &str) -> Result<(), PatchError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|c| c.is_empty() || c == "." || c == "..");
    if bad {
        return Err(PatchError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn sibling(dest: &Path, suffix: &str) -> Result<PathBuf, PatchError> {
    let name = dest
        .file_name()
        .ok_or_else(|| PatchError::InvalidPath(dest.display().to_string()))?;
    Ok(dest.with_file_name(format!(".{}.{suffix}", name.to_string_lossy())))
}

/// Where a replacement for `dest` is staged before [`swap_in`].
pub fn staging_dir(dest: &Path) -> Result<PathBuf, PatchError> {
    sibling(dest, STAGING_SUFFIX)
}

/// Replaces `dest` with the staged directory `staged`.
///
/// A `.git` directory inside the old `dest` is carried over. If the swap
/// fails part way, `.git` is moved back next to the old tree before the
/// error is returned.
pub fn swap_in(staged: &Path, dest: &Path) -> Result<(), PatchError> {
    swap_in_with(staged, dest, |from, to| std::fs::rename(from, to))
}

fn swap_in_with<R>(staged: &Path, dest: &Path, mut rename: R) -> Result<(), PatchError>
where
    R: FnMut(&Path, &Path) -> std::io::Result<()>,
{
    let retired = sibling(dest, RETIRED_SUFFIX)?;
    remove_dir_if_exists(&retired)?;

    let had_dest = dest.exists();
    let carried = had_dest && dest.join(".git").exists();
    if had_dest {
        if carried {
            let git = dest.join(".git");
            rename(&git, &staged.join(".git")).map_err(|e| PatchError::io(&git, e))?;
        }
        if let Err(e) = rename(dest, &retired) {
            if carried {
                move_git_back(&mut rename, staged, dest);
            }
            return Err(PatchError::io(dest, e));
        }
    } else if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
    }

    if let Err(e) = rename(staged, dest) {
        if had_dest {
            if carried {
                move_git_back(&mut rename, staged, &retired);
            }
            if let Err(restore) = rename(&retired, dest) {
                warn!(path = %dest.display(), error = %restore, "could not restore previous tree");
            }
        }
        return Err(PatchError::io(staged, e));
    }
    remove_dir_if_exists(&retired)
}

fn move_git_back<R>(rename: &mut R, staged: &Path, owner: &Path)
where
    R: FnMut(&Path, &Path) -> std::io::Result<()>,
{
    let git = staged.join(".git");
    if let Err(e) = rename(&git, &owner.join(".git")) {
        warn!(path = %git.display(), error = %e, "could not move .git back after a failed swap");
    }
}

/// Writes `tree` to a staging directory and swaps it in for `dest`.
pub fn install_tree(tree: &SourceTree, dest: &Path) -> Result<(), PatchError> {
    let staged = staging_dir(dest)?;
    remove_dir_if_exists(&staged)?;
    tree.write_to(&staged)?;
    swap_in(&staged, dest)
}

/// Cleans up after an interrupted swap of `dest`.
///
/// If `dest` is missing but a retired copy exists, the retired copy is put
/// back. Leftover staging directories are removed. Returns `true` if
/// anything was found.
pub fn recover_stale(dest: &Path) -> Result<bool, PatchError> {
    let staged = sibling(dest, STAGING_SUFFIX)?;
    let retired = sibling(dest, RETIRED_SUFFIX)?;
    let mut found = false;

    if retired.exists() {
        found = true;
        if dest.exists() {
            warn!(path = %retired.display(), "removing retired tree left by an interrupted swap");
            remove_dir_if_exists(&retired)?;
        } else {
            warn!(path = %dest.display(), "restoring tree from an interrupted swap");
            std::fs::rename(&retired, dest).map_err(|e| PatchError::io(&retired, e))?;
        }
    }
    if staged.exists() {
        found = true;
        warn!(path = %staged.display(), "removing staging tree left by an interrupted run");
        remove_dir_if_exists(&staged)?;
    }
    Ok(found)
}

pub(crate) fn remove_dir_if_exists(dir: &Path) -> Result<(), PatchError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PatchError::io(dir, e)),
    }
}
