//! Ordered patch stacks.
//!
//! A [`PatchStack`] holds a module's patches in the literal order of their
//! file names. Applying it to a base tree yields the module output plus the
//! tree hash at every boundary, which later rebuilds use to check that the
//! stack still describes the output they are regenerating from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use weft_common::{Arena, ContentHash, ContentHasher, PatchId};

use crate::apply::apply_file;
use crate::error::PatchError;
use crate::format::{Patch, PATCH_EXT};
use crate::tree::SourceTree;

/// One patch file of a stack.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    /// File name, e.g. `0003-Fix-thing.patch`.
    pub name: String,
    /// Parsed contents.
    pub patch: Patch,
    /// Bytes as stored on disk.
    pub raw: String,
    /// Hash of `raw`.
    pub file_hash: ContentHash,
}

impl PatchRecord {
    /// Creates a record whose stored form is the rendering of `patch`.
    pub fn from_patch(name: &str, patch: Patch) -> Self {
        let raw = patch.render();
        Self {
            name: name.to_string(),
            file_hash: ContentHash::from_bytes(raw.as_bytes()),
            patch,
            raw,
        }
    }
}

/// Result of applying a whole stack.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The module output tree.
    pub tree: SourceTree,
    /// Tree hash before any patch (index 0) and after each patch.
    pub boundary_hashes: Vec<ContentHash>,
}

impl ApplyOutcome {
    /// Hash of the final tree.
    pub fn output_hash(&self) -> ContentHash {
        self.boundary_hashes
            .last()
            .copied()
            .unwrap_or_else(|| self.tree.hash())
    }
}

/// Per-file contents after each patch that touched the file.
pub(crate) type FileHistory = BTreeMap<String, Vec<(usize, Option<Vec<u8>>)>>;

/// A module's ordered patches, with the directory they were loaded from.
#[derive(Debug, Clone, Default)]
pub struct PatchStack {
    dir: PathBuf,
    records: Arena<PatchId, PatchRecord>,
}

impl PatchStack {
    /// Creates an empty stack for `dir`.
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            records: Arena::new(),
        }
    }

    /// Loads every `*.patch` file in `dir`, ordered by file name.
    ///
    /// A missing directory is an empty stack.
    pub fn load(dir: &Path) -> Result<Self, PatchError> {
        let mut stack = Self::empty(dir);
        if !dir.exists() {
            return Ok(stack);
        }

        let mut names = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|e| PatchError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PatchError::io(dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(PATCH_EXT) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        for name in names {
            let path = dir.join(&name);
            let raw = std::fs::read_to_string(&path).map_err(|e| PatchError::io(&path, e))?;
            let patch = Patch::parse(&name, &raw)?;
            stack.records.alloc(PatchRecord {
                file_hash: ContentHash::from_bytes(raw.as_bytes()),
                name,
                patch,
                raw,
            });
        }
        debug!(dir = %dir.display(), patches = stack.len(), "loaded patch stack");
        Ok(stack)
    }

    /// Directory the stack belongs to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of patches.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no patches.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record.
    pub fn push(&mut self, record: PatchRecord) -> PatchId {
        self.records.alloc(record)
    }

    /// The record at `id`.
    pub fn get(&self, id: PatchId) -> &PatchRecord {
        &self.records[id]
    }

    /// Records in stack order.
    pub fn iter(&self) -> impl Iterator<Item = (PatchId, &PatchRecord)> {
        self.records.iter()
    }

    /// Cache key for applying this stack to a base with the given hash.
    pub fn input_key(&self, base: &ContentHash, max_offset: usize) -> ContentHash {
        let mut hasher = ContentHasher::new("apply");
        hasher
            .update_hash(base)
            .update(&(max_offset as u64).to_le_bytes());
        for (_, record) in self.iter() {
            hasher.update(record.name.as_bytes()).update_hash(&record.file_hash);
        }
        hasher.finish()
    }

    /// Applies every patch, in order, to a copy of `base`.
    ///
    /// Stops at the first patch that does not apply cleanly; no later patch
    /// is attempted.
    pub fn apply(&self, base: &SourceTree, max_offset: usize) -> Result<ApplyOutcome, PatchError> {
        let (outcome, _) = self.replay(base, max_offset, false)?;
        Ok(outcome)
    }

    /// Re-applies the stack in memory and checks the result against the last
    /// known-good hash. Returns the hash on success.
    pub fn validate(
        &self,
        base: &SourceTree,
        expected: &ContentHash,
        max_offset: usize,
    ) -> Result<ContentHash, PatchError> {
        let actual = self.apply(base, max_offset)?.output_hash();
        if actual != *expected {
            return Err(PatchError::ValidationMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(actual)
    }

    /// Writes every patch's stored bytes into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<(), PatchError> {
        std::fs::create_dir_all(dir).map_err(|e| PatchError::io(dir, e))?;
        for (_, record) in self.iter() {
            let path = dir.join(&record.name);
            std::fs::write(&path, &record.raw).map_err(|e| PatchError::io(&path, e))?;
        }
        Ok(())
    }

    /// Applies the stack, optionally keeping every touched file's content
    /// after each patch that touched it.
    pub(crate) fn replay(
        &self,
        base: &SourceTree,
        max_offset: usize,
        keep_history: bool,
    ) -> Result<(ApplyOutcome, FileHistory), PatchError> {
        let mut tree = base.clone();
        let mut hashes = tree.snapshot();
        let mut boundary_hashes = Vec::with_capacity(self.len() + 1);
        boundary_hashes.push(hashes.tree_hash());
        let mut history = FileHistory::new();

        for (id, record) in self.iter() {
            apply_patch(&mut tree, &record.patch, id.ordinal(), &record.name, max_offset)?;
            for path in record.patch.touched_paths() {
                match tree.get(path) {
                    Some(content) => {
                        hashes
                            .files
                            .insert(path.to_string(), ContentHash::from_bytes(content));
                    }
                    None => {
                        hashes.files.remove(path);
                    }
                }
                if keep_history {
                    history
                        .entry(path.to_string())
                        .or_default()
                        .push((id.ordinal(), tree.get(path).map(<[u8]>::to_vec)));
                }
            }
            boundary_hashes.push(hashes.tree_hash());
        }

        Ok((
            ApplyOutcome {
                tree,
                boundary_hashes,
            },
            history,
        ))
    }
}

/// Applies one patch to `tree` in place.
///
/// `index` is the patch's 1-based position, used in conflict reports.
pub fn apply_patch(
    tree: &mut SourceTree,
    patch: &Patch,
    index: usize,
    name: &str,
    max_offset: usize,
) -> Result<(), PatchError> {
    for file in &patch.files {
        let current = tree.get_text(&file.path)?;
        let result = apply_file(current, file, max_offset)
            .map_err(|report| PatchError::Conflict(Box::new(report.in_patch(index, name))))?;
        match result {
            Some(text) => tree.insert(&file.path, text)?,
            None => {
                tree.remove(&file.path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::make_hunks;
    use crate::format::{patch_file_name, FileChange, FilePatch, DEFAULT_AUTHOR};

    fn edit(subject: &str, path: &str, old: &str, new: &str) -> Patch {
        let mut patch = Patch::new(DEFAULT_AUTHOR, subject);
        patch.files.push(FilePatch {
            path: path.to_string(),
            change: FileChange::Modify,
            hunks: make_hunks(old, new, 3).unwrap(),
        });
        patch
    }

    fn stack(patches: Vec<Patch>) -> PatchStack {
        let mut s = PatchStack::empty(Path::new("patches"));
        for (i, p) in patches.into_iter().enumerate() {
            let name = patch_file_name(i + 1, &p.subject);
            s.push(PatchRecord::from_patch(&name, p));
        }
        s
    }

    fn base() -> SourceTree {
        let mut t = SourceTree::new();
        t.insert("A.txt", "hello\n").unwrap();
        t
    }

    #[test]
    fn applies_in_order_and_records_boundaries() {
        let s = stack(vec![
            edit("World", "A.txt", "hello\n", "hello world\n"),
            edit("Bang", "A.txt", "hello world\n", "hello world!!\n"),
        ]);
        let out = s.apply(&base(), 0).unwrap();
        assert_eq!(out.tree.get("A.txt"), Some(&b"hello world!!\n"[..]));
        assert_eq!(out.boundary_hashes.len(), 3);
        assert_eq!(out.boundary_hashes[0], base().hash());
        assert_eq!(out.output_hash(), out.tree.hash());
    }

    #[test]
    fn conflict_names_failing_patch_and_stops() {
        let s = stack(vec![
            edit("World", "A.txt", "hello\n", "hello world\n"),
            edit("Wrong", "A.txt", "goodbye\n", "farewell\n"),
            edit("Never", "A.txt", "hello world\n", "x\n"),
        ]);
        let err = s.apply(&base(), 0).unwrap_err();
        let report = err.as_conflict().unwrap();
        assert_eq!(report.patch_index, 2);
        assert_eq!(report.patch_name, "0002-Wrong.patch");
        assert_eq!(report.path, "A.txt");
    }

    #[test]
    fn validate_detects_mismatch() {
        let s = stack(vec![edit("World", "A.txt", "hello\n", "hello world\n")]);
        let good = s.apply(&base(), 0).unwrap().output_hash();
        assert_eq!(s.validate(&base(), &good, 0).unwrap(), good);
        let err = s.validate(&base(), &base().hash(), 0).unwrap_err();
        assert!(matches!(err, PatchError::ValidationMismatch { .. }));
    }

    #[test]
    fn input_key_tracks_patches_and_tolerance() {
        let s1 = stack(vec![edit("World", "A.txt", "hello\n", "hello world\n")]);
        let s2 = stack(vec![edit("World", "A.txt", "hello\n", "hello there\n")]);
        let b = base().hash();
        assert_eq!(s1.input_key(&b, 0), s1.input_key(&b, 0));
        assert_ne!(s1.input_key(&b, 0), s2.input_key(&b, 0));
        assert_ne!(s1.input_key(&b, 0), s1.input_key(&b, 1));
    }

    #[test]
    fn load_orders_by_file_name_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let s = stack(vec![
            edit("World", "A.txt", "hello\n", "hello world\n"),
            edit("Bang", "A.txt", "hello world\n", "hello world!!\n"),
        ]);
        s.write_to(dir.path()).unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let loaded = PatchStack::load(dir.path()).unwrap();
        let names: Vec<_> = loaded.iter().map(|(_, r)| r.name.clone()).collect();
        assert_eq!(names, vec!["0001-World.patch", "0002-Bang.patch"]);
        assert_eq!(
            loaded.input_key(&base().hash(), 0),
            s.input_key(&base().hash(), 0)
        );
    }

    #[test]
    fn missing_dir_is_empty_stack() {
        let dir = tempfile::tempdir().unwrap();
        let s = PatchStack::load(&dir.path().join("nope")).unwrap();
        assert!(s.is_empty());
        let out = s.apply(&base(), 0).unwrap();
        assert_eq!(out.tree, base());
    }

    #[test]
    fn history_tracks_touching_patches() {
        let s = stack(vec![
            edit("World", "A.txt", "hello\n", "hello world\n"),
            edit("Bang", "A.txt", "hello world\n", "hello world!!\n"),
        ]);
        let (_, history) = s.replay(&base(), 0, true).unwrap();
        let a = &history["A.txt"];
        assert_eq!(a.len(), 2);
        assert_eq!(a[1], (2, Some(b"hello world!!\n".to_vec())));
    }
}
