//! Source tree hashing and change detection.
//!
//! Computes per-file content hashes for a directory tree and compares a
//! current snapshot against a recorded one to identify which files are new,
//! modified, deleted, or unchanged. Module outputs are checked this way to
//! detect drift between the last applied tree and what is on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use weft_common::ContentHash;

use crate::error::CacheError;

/// Directory names never considered part of a source tree.
const IGNORED_DIRS: &[&str] = &[".git"];

/// Per-file hashes of a tree, keyed by `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Relative path to content hash, in path order.
    pub files: BTreeMap<String, ContentHash>,
}

impl TreeSnapshot {
    /// The content-addressed identity of the tree.
    pub fn tree_hash(&self) -> ContentHash {
        ContentHash::from_tree(self.files.iter().map(|(p, h)| (p.as_str(), h)))
    }

    /// Number of files in the tree.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the tree has no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Result of comparing a current snapshot against a recorded one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Files that are not present in the recorded snapshot.
    pub new_files: Vec<String>,

    /// Files whose content hash differs from the recorded snapshot.
    pub modified_files: Vec<String>,

    /// Files present in the recorded snapshot but not in the current one.
    pub deleted_files: Vec<String>,

    /// Files whose content hash matches the recorded snapshot.
    pub unchanged_files: Vec<String>,
}

impl ChangeSet {
    /// Returns `true` if there are no changes (no new, modified, or deleted files).
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Returns the total number of changed files.
    pub fn dirty_count(&self) -> usize {
        self.new_files.len() + self.modified_files.len() + self.deleted_files.len()
    }
}

/// Utility for computing content hashes of source trees and detecting changes.
pub struct TreeHasher;

impl TreeHasher {
    /// Computes the content hash of a single file.
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Lists every file below `root` as `(relative path, absolute path)`, sorted.
    ///
    /// Symbolic links are not followed; finding one is an error.
    pub fn list_files(root: &Path) -> Result<Vec<(String, PathBuf)>, CacheError> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.depth() > 0
                    && e.file_type().is_dir()
                    && IGNORED_DIRS.iter().any(|d| e.file_name() == *d))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                CacheError::io(path, e.into())
            })?;
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                return Err(CacheError::Symlink {
                    path: entry.into_path(),
                });
            }
            if !file_type.is_file() {
                continue;
            }
            if let Some(rel) = relative_path(root, entry.path()) {
                files.push((rel, entry.into_path()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// Hashes every file below `root` in parallel.
    pub fn snapshot(root: &Path) -> Result<TreeSnapshot, CacheError> {
        let listed = Self::list_files(root)?;
        let hashed: Result<Vec<(String, ContentHash)>, CacheError> = listed
            .into_par_iter()
            .map(|(rel, abs)| Self::hash_file(&abs).map(|h| (rel, h)))
            .collect();
        Ok(TreeSnapshot {
            files: hashed?.into_iter().collect(),
        })
    }

    /// Compares a current snapshot against a recorded one.
    pub fn detect_changes(current: &TreeSnapshot, recorded: &TreeSnapshot) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (path, hash) in &current.files {
            match recorded.files.get(path) {
                Some(old) if old == hash => changes.unchanged_files.push(path.clone()),
                Some(_) => changes.modified_files.push(path.clone()),
                None => changes.new_files.push(path.clone()),
            }
        }
        changes.deleted_files = recorded
            .files
            .keys()
            .filter(|p| !current.files.contains_key(*p))
            .cloned()
            .collect();

        changes
    }
}

/// Converts a path below `root` to a `/`-separated relative string.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_of(entries: &[(&str, &str)]) -> TreeSnapshot {
        TreeSnapshot {
            files: entries
                .iter()
                .map(|(p, c)| (p.to_string(), ContentHash::from_bytes(c.as_bytes())))
                .collect(),
        }
    }

    #[test]
    fn hash_file_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.txt");
        std::fs::write(&path, "hello").unwrap();
        let h1 = TreeHasher::hash_file(&path).unwrap();
        let h2 = TreeHasher::hash_file(&path).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_file_nonexistent_errors() {
        assert!(TreeHasher::hash_file(Path::new("/nonexistent/file.txt")).is_err());
    }

    #[test]
    fn snapshot_uses_relative_slash_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/main")).unwrap();
        std::fs::write(dir.path().join("src/main/App.java"), "class App {}").unwrap();
        std::fs::write(dir.path().join("README"), "readme").unwrap();

        let snap = TreeHasher::snapshot(dir.path()).unwrap();
        let paths: Vec<_> = snap.files.keys().cloned().collect();
        assert_eq!(paths, vec!["README", "src/main/App.java"]);
    }

    #[test]
    fn snapshot_skips_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("A.txt"), "a").unwrap();
        let snap = TreeHasher::snapshot(dir.path()).unwrap();
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TreeHasher::list_files(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_in_tree_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink("real.txt", dir.path().join("link.txt")).unwrap();

        match TreeHasher::snapshot(dir.path()).unwrap_err() {
            CacheError::Symlink { path } => assert!(path.ends_with("link.txt")),
            other => panic!("expected symlink error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_dir_is_rejected_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/A.txt"), "a").unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("alias")).unwrap();
        assert!(matches!(
            TreeHasher::list_files(dir.path()),
            Err(CacheError::Symlink { .. })
        ));
    }

    #[test]
    fn identical_trees_in_different_dirs_hash_equal() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for dir in [a.path(), b.path()] {
            std::fs::write(dir.join("A.txt"), "hello").unwrap();
        }
        let ha = TreeHasher::snapshot(a.path()).unwrap().tree_hash();
        let hb = TreeHasher::snapshot(b.path()).unwrap().tree_hash();
        assert_eq!(ha, hb);
    }

    #[test]
    fn detect_changes_all_new() {
        let current = snapshot_of(&[("a.txt", "a"), ("b.txt", "b")]);
        let cs = TreeHasher::detect_changes(&current, &TreeSnapshot::default());
        assert_eq!(cs.new_files.len(), 2);
        assert!(cs.modified_files.is_empty());
        assert_eq!(cs.dirty_count(), 2);
    }

    #[test]
    fn detect_changes_unchanged() {
        let current = snapshot_of(&[("a.txt", "a")]);
        let cs = TreeHasher::detect_changes(&current, &current.clone());
        assert!(cs.is_empty());
        assert_eq!(cs.unchanged_files, vec!["a.txt"]);
    }

    #[test]
    fn detect_changes_modified_and_deleted() {
        let recorded = snapshot_of(&[("a.txt", "old"), ("gone.txt", "x")]);
        let current = snapshot_of(&[("a.txt", "new")]);
        let cs = TreeHasher::detect_changes(&current, &recorded);
        assert_eq!(cs.modified_files, vec!["a.txt"]);
        assert_eq!(cs.deleted_files, vec!["gone.txt"]);
        assert!(!cs.is_empty());
    }
}
