//! Regenerating a patch stack from a hand-edited output tree.
//!
//! Every file that differs between the applied stack and the working tree is
//! attributed to the last patch that touched it (files no patch touched go to
//! the last patch). Only those patches are regenerated; the rest keep their
//! stored bytes, so patch boundaries survive a rebuild.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info};
use weft_common::ContentHash;

use crate::diff::{make_hunks, CONTEXT_LINES};
use crate::error::PatchError;
use crate::format::{patch_file_name, FileChange, FilePatch, Patch, PATCH_EXT};
use crate::stack::{PatchRecord, PatchStack};
use crate::tree::{remove_dir_if_exists, staging_dir, swap_in, SourceTree};

/// Subject of the patch created when rebuilding a module with no patches.
pub const INITIAL_SUBJECT: &str = "Initial changes";

/// Knobs for [`rebuild`].
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    /// Drop whitespace-only noise and keep stored bytes for equivalent patches.
    pub filter: bool,
    /// Hunk offset tolerance used when replaying the stack.
    pub max_offset: usize,
    /// Author of a newly created patch.
    pub author: String,
}

/// A regenerated stack that has been validated but not yet written.
#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    /// The new stack.
    pub stack: PatchStack,
    /// Names of patches whose content changed or that were created.
    pub changed: Vec<String>,
    /// Files whose whitespace-only edits were discarded.
    pub reverted: Vec<String>,
    /// The tree the new stack reproduces.
    pub tree: SourceTree,
    /// Boundary hashes of the new stack.
    pub boundary_hashes: Vec<ContentHash>,
}

impl RebuildOutcome {
    /// Returns `true` if no patch file needs rewriting.
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }

    /// Hash of the reproduced tree.
    pub fn output_hash(&self) -> ContentHash {
        self.boundary_hashes
            .last()
            .copied()
            .unwrap_or_else(|| self.tree.hash())
    }

    /// Writes the new stack to a staging directory and swaps it in for
    /// `patch_dir`. Files in `patch_dir` that are not patches are kept.
    pub fn commit(&self, patch_dir: &Path) -> Result<(), PatchError> {
        if self.is_unchanged() {
            return Ok(());
        }
        let staged = staging_dir(patch_dir)?;
        remove_dir_if_exists(&staged)?;
        self.stack.write_to(&staged)?;

        if patch_dir.exists() {
            let entries = std::fs::read_dir(patch_dir).map_err(|e| PatchError::io(patch_dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| PatchError::io(patch_dir, e))?;
                let path = entry.path();
                let is_patch = path.extension().and_then(|e| e.to_str()) == Some(PATCH_EXT);
                if path.is_file() && !is_patch {
                    let target = staged.join(entry.file_name());
                    std::fs::copy(&path, &target).map_err(|e| PatchError::io(&path, e))?;
                }
            }
        }
        swap_in(&staged, patch_dir)?;
        info!(dir = %patch_dir.display(), patches = self.changed.len(), "rewrote patches");
        Ok(())
    }
}

/// Regenerates `stack` so that applying it to `base` yields `working`.
///
/// `recorded` holds the boundary hashes from the last apply; when non-empty
/// the replayed stack must reproduce them exactly or the rebuild is refused
/// as stale. The result is validated by re-applying it in memory.
pub fn rebuild(
    stack: &PatchStack,
    base: &SourceTree,
    working: &SourceTree,
    recorded: &[ContentHash],
    options: &RebuildOptions,
) -> Result<RebuildOutcome, PatchError> {
    let (applied, history) = stack.replay(base, options.max_offset, true)?;
    check_boundaries(recorded, &applied.boundary_hashes)?;

    let mut working = working.clone();
    let all_paths: BTreeSet<String> = applied
        .tree
        .paths()
        .chain(working.paths())
        .map(str::to_string)
        .collect();
    let mut changed: Vec<String> = all_paths
        .into_iter()
        .filter(|p| applied.tree.get(p) != working.get(p))
        .collect();

    let mut reverted = Vec::new();
    if options.filter {
        for path in &changed {
            if let (Some(ours), Some(theirs)) = (applied.tree.get(path), working.get(path)) {
                if is_whitespace_noise(ours, theirs) {
                    reverted.push(path.clone());
                }
            }
        }
        for path in &reverted {
            if let Some(content) = applied.tree.get(path) {
                working.insert(path, content.to_vec())?;
            }
        }
        changed.retain(|p| !reverted.contains(p));
    }

    if changed.is_empty() {
        debug!("working tree matches the patch stack");
        return Ok(RebuildOutcome {
            stack: stack.clone(),
            changed: Vec::new(),
            reverted,
            tree: applied.tree,
            boundary_hashes: applied.boundary_hashes,
        });
    }

    let mut records: Vec<PatchRecord> = stack.iter().map(|(_, r)| r.clone()).collect();
    let mut created = false;
    if records.is_empty() {
        let name = patch_file_name(1, INITIAL_SUBJECT);
        records.push(PatchRecord::from_patch(
            &name,
            Patch::new(&options.author, INITIAL_SUBJECT),
        ));
        created = true;
    }
    let last = records.len();

    let mut by_owner: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for path in &changed {
        let owner = history
            .get(path)
            .and_then(|touches| touches.last())
            .map(|(index, _)| *index)
            .unwrap_or(last);
        by_owner.entry(owner).or_default().push(path.as_str());
    }

    let mut changed_names = Vec::new();
    for (owner, paths) in by_owner {
        let name = records[owner - 1].name.clone();
        let mut patch = records[owner - 1].patch.clone();
        for path in paths {
            let before = content_before(&history, base, path, owner);
            let section = diff_section(path, before.as_deref(), working.get(path))?;
            let existing = patch.files.iter().position(|f| f.path == path);
            match (existing, section) {
                (Some(i), Some(section)) => patch.files[i] = section,
                (Some(i), None) => {
                    patch.files.remove(i);
                }
                (None, Some(section)) => patch.files.push(section),
                (None, None) => {}
            }
        }

        let stored = &records[owner - 1].patch;
        let keep_stored = options.filter && equivalent(stored, &patch);
        if created || (patch != *stored && !keep_stored) {
            debug!(patch = %name, "regenerated");
            records[owner - 1] = PatchRecord::from_patch(&name, patch);
            changed_names.push(name);
        }
    }

    let mut new_stack = PatchStack::empty(stack.dir());
    for record in records {
        new_stack.push(record);
    }

    let validated = new_stack.apply(base, options.max_offset)?;
    let expected = working.hash();
    if validated.output_hash() != expected {
        return Err(PatchError::ValidationMismatch {
            expected,
            actual: validated.output_hash(),
        });
    }

    Ok(RebuildOutcome {
        stack: new_stack,
        changed: changed_names,
        reverted,
        tree: validated.tree,
        boundary_hashes: validated.boundary_hashes,
    })
}

fn check_boundaries(recorded: &[ContentHash], replayed: &[ContentHash]) -> Result<(), PatchError> {
    if recorded.is_empty() {
        return Ok(());
    }
    let len = recorded.len().max(replayed.len());
    for boundary in 0..len {
        match (recorded.get(boundary), replayed.get(boundary)) {
            (Some(r), Some(p)) if r == p => continue,
            (r, p) => {
                let missing = ContentHash::from_bytes(b"");
                return Err(PatchError::StaleRebuild {
                    boundary,
                    recorded: r.copied().unwrap_or(missing),
                    recomputed: p.copied().unwrap_or(missing),
                });
            }
        }
    }
    Ok(())
}

/// Content of `path` in the tree just before patch `owner` (1-based).
fn content_before(
    history: &crate::stack::FileHistory,
    base: &SourceTree,
    path: &str,
    owner: usize,
) -> Option<Vec<u8>> {
    let earlier = history
        .get(path)
        .and_then(|touches| touches.iter().rev().find(|(index, _)| *index < owner));
    match earlier {
        Some((_, content)) => content.clone(),
        None => base.get(path).map(<[u8]>::to_vec),
    }
}

/// Builds the file section turning `before` into `after`, or `None` if equal.
pub fn diff_section(
    path: &str,
    before: Option<&[u8]>,
    after: Option<&[u8]>,
) -> Result<Option<FilePatch>, PatchError> {
    let change = match (before, after) {
        (None, None) => return Ok(None),
        (Some(a), Some(b)) if a == b => return Ok(None),
        (None, Some(_)) => FileChange::Create,
        (Some(_), None) => FileChange::Delete,
        (Some(_), Some(_)) => FileChange::Modify,
    };
    let old = as_text(path, before)?;
    let new = as_text(path, after)?;
    let hunks = make_hunks(old, new, CONTEXT_LINES).map_err(|source| PatchError::Diff {
        path: path.to_string(),
        source,
    })?;
    Ok(Some(FilePatch {
        path: path.to_string(),
        change,
        hunks,
    }))
}

fn as_text<'a>(path: &str, bytes: Option<&'a [u8]>) -> Result<&'a str, PatchError> {
    std::str::from_utf8(bytes.unwrap_or_default()).map_err(|_| PatchError::BinaryFile {
        path: path.to_string(),
    })
}

/// Returns `true` if two versions differ only in line endings or trailing
/// whitespace.
fn is_whitespace_noise(a: &[u8], b: &[u8]) -> bool {
    match (std::str::from_utf8(a), std::str::from_utf8(b)) {
        (Ok(a), Ok(b)) => normalize(a) == normalize(b),
        _ => false,
    }
}

fn normalize(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Returns `true` if both patches make the same changes up to line numbers.
fn equivalent(stored: &Patch, regenerated: &Patch) -> bool {
    stored.files.len() == regenerated.files.len()
        && stored.files.iter().all(|f| {
            regenerated
                .file(&f.path)
                .is_some_and(|g| f.same_change(g))
        })
}
