//! Applying file sections to text, and conflict reporting.
//!
//! Each hunk must match its preimage lines exactly. The position may drift by
//! up to `max_offset` lines from where the header says, and the drift found
//! for one hunk carries over to the next. Context is never fuzzed.

use std::fmt;

use weft_cache::ConflictSummary;

use crate::diff::{split_lines, unified_diff, Hunk};
use crate::format::{FileChange, FilePatch};

/// Why a file section did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// No position within tolerance had the expected lines.
    ContextMismatch,
    /// The hunk starts inside the region of the previous hunk.
    Overlap,
    /// A modification or deletion targets a file that does not exist.
    MissingFile,
    /// A creation targets a file that already exists.
    FileExists,
    /// A deletion left lines behind.
    NotEmptied,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictReason::ContextMismatch => "context does not match",
            ConflictReason::Overlap => "overlaps the previous hunk",
            ConflictReason::MissingFile => "file does not exist",
            ConflictReason::FileExists => "file already exists",
            ConflictReason::NotEmptied => "file is not empty after deletion",
        })
    }
}

/// Everything known about a failed patch application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    /// 1-based position of the failing patch in its stack.
    pub patch_index: usize,
    /// File name of the failing patch.
    pub patch_name: String,
    /// Tree-relative path of the file that failed.
    pub path: String,
    /// 1-based hunk number, or 0 when the whole file section failed.
    pub hunk: usize,
    /// What went wrong.
    pub reason: ConflictReason,
    /// The failing hunk in unified format.
    pub hunk_text: String,
    /// Unified diff from the lines the hunk expected to the lines found.
    pub diff: String,
}

impl ConflictReport {
    fn file_level(file: &FilePatch, reason: ConflictReason) -> Self {
        Self {
            patch_index: 0,
            patch_name: String::new(),
            path: file.path.clone(),
            hunk: 0,
            reason,
            hunk_text: String::new(),
            diff: String::new(),
        }
    }

    /// Sets the patch this report belongs to.
    pub fn in_patch(mut self, index: usize, name: &str) -> Self {
        self.patch_index = index;
        self.patch_name = name.to_string();
        self
    }

    /// The persistent summary stored in the module record.
    pub fn summary(&self) -> ConflictSummary {
        ConflictSummary {
            patch_index: self.patch_index,
            patch_name: self.patch_name.clone(),
            path: self.path.clone(),
            hunk: self.hunk,
        }
    }

    /// The failing hunk and the expected/found diff, for terminal output.
    pub fn details(&self) -> String {
        let mut out = String::new();
        if !self.hunk_text.is_empty() {
            out.push_str(&self.hunk_text);
        }
        if !self.diff.is_empty() {
            out.push_str(&self.diff);
        }
        out
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patch {} ({}) does not apply to {}",
            self.patch_index, self.patch_name, self.path
        )?;
        if self.hunk > 0 {
            write!(f, ": hunk {} {}", self.hunk, self.reason)
        } else {
            write!(f, ": {}", self.reason)
        }
    }
}

/// Applies one file section to the current content of its file.
///
/// `current` is `None` when the file does not exist. Returns the new content,
/// or `None` when the section deletes the file. The returned report has no
/// patch index or name; callers add them with [`ConflictReport::in_patch`].
pub fn apply_file(
    current: Option<&str>,
    file: &FilePatch,
    max_offset: usize,
) -> Result<Option<String>, ConflictReport> {
    match (file.change, current) {
        (FileChange::Create, Some(_)) => {
            return Err(ConflictReport::file_level(file, ConflictReason::FileExists))
        }
        (FileChange::Modify | FileChange::Delete, None) => {
            return Err(ConflictReport::file_level(file, ConflictReason::MissingFile))
        }
        _ => {}
    }

    let source = current.unwrap_or_default();
    let lines = split_lines(source);
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    let mut drift = 0isize;

    for (i, hunk) in file.hunks.iter().enumerate() {
        if i > 0 {
            let prev = &file.hunks[i - 1];
            if hunk.old_start < prev.old_start + prev.old_len() {
                return Err(hunk_conflict(file, i, hunk, &lines, ConflictReason::Overlap, 0));
            }
        }

        let expected = hunk.old_lines();
        let anchor = hunk.old_start as isize + drift;
        let Some(pos) = locate(&lines, &expected, anchor, cursor, max_offset) else {
            return Err(hunk_conflict(
                file,
                i,
                hunk,
                &lines,
                ConflictReason::ContextMismatch,
                drift,
            ));
        };

        for line in &lines[cursor..pos] {
            out.push_str(line);
        }
        for line in hunk.new_lines() {
            out.push_str(line);
        }
        cursor = pos + expected.len();
        drift = pos as isize - hunk.old_start as isize;
    }
    for line in &lines[cursor..] {
        out.push_str(line);
    }

    if file.change == FileChange::Delete {
        if !out.is_empty() {
            return Err(ConflictReport::file_level(file, ConflictReason::NotEmptied));
        }
        return Ok(None);
    }
    Ok(Some(out))
}

/// Finds where `expected` occurs, trying `anchor` first and then alternating
/// outwards up to `max_offset` lines. Positions before `cursor` are taken.
fn locate(
    lines: &[&str],
    expected: &[&str],
    anchor: isize,
    cursor: usize,
    max_offset: usize,
) -> Option<usize> {
    for delta in 0..=max_offset as isize {
        for candidate in [anchor - delta, anchor + delta] {
            if candidate < cursor as isize {
                continue;
            }
            let pos = candidate as usize;
            if pos + expected.len() <= lines.len() && lines[pos..pos + expected.len()] == *expected {
                return Some(pos);
            }
            if delta == 0 {
                break;
            }
        }
    }
    None
}

fn hunk_conflict(
    file: &FilePatch,
    index: usize,
    hunk: &Hunk,
    lines: &[&str],
    reason: ConflictReason,
    drift: isize,
) -> ConflictReport {
    let expected = hunk.old_lines().concat();
    let start = (hunk.old_start as isize + drift).clamp(0, lines.len() as isize) as usize;
    let end = (start + hunk.old_len()).min(lines.len());
    let found = lines[start..end].concat();

    ConflictReport {
        patch_index: 0,
        patch_name: String::new(),
        path: file.path.clone(),
        hunk: index + 1,
        reason,
        hunk_text: hunk.render(),
        diff: unified_diff("expected", "found", &expected, &found).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::make_hunks;

    fn modify(path: &str, old: &str, new: &str, context: usize) -> FilePatch {
        FilePatch {
            path: path.to_string(),
            change: FileChange::Modify,
            hunks: make_hunks(old, new, context).unwrap(),
        }
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn applies_at_recorded_position() {
        let fp = modify("A.txt", "hello\n", "hello world\n", 3);
        let out = apply_file(Some("hello\n"), &fp, 0).unwrap();
        assert_eq!(out.as_deref(), Some("hello world\n"));
    }

    #[test]
    fn applies_multiple_hunks() {
        let old = numbered(30);
        let new = old
            .replace("line 2\n", "two\n")
            .replace("line 28\n", "twenty-eight\n");
        let fp = modify("f", &old, &new, 3);
        assert_eq!(fp.hunks.len(), 2);
        assert_eq!(apply_file(Some(&old), &fp, 0).unwrap().unwrap(), new);
    }

    #[test]
    fn shifted_content_needs_offset_tolerance() {
        let old = numbered(10);
        let new = old.replace("line 5\n", "five\n");
        let fp = modify("f", &old, &new, 1);
        let shifted = format!("extra\nextra\n{old}");

        let err = apply_file(Some(&shifted), &fp, 0).unwrap_err();
        assert_eq!(err.reason, ConflictReason::ContextMismatch);
        assert_eq!(err.hunk, 1);

        let out = apply_file(Some(&shifted), &fp, 2).unwrap().unwrap();
        assert_eq!(out, format!("extra\nextra\n{new}"));
    }

    #[test]
    fn mismatch_report_carries_hunk_and_diff() {
        let fp = modify("A.txt", "hello\n", "hello world\n", 3);
        let err = apply_file(Some("goodbye\n"), &fp, 0)
            .unwrap_err()
            .in_patch(2, "0002-Greet.patch");
        assert_eq!(err.patch_index, 2);
        assert!(err.hunk_text.contains("-hello\n+hello world\n"));
        assert!(err.diff.contains("-hello\n+goodbye\n"));
        assert_eq!(
            err.to_string(),
            "patch 2 (0002-Greet.patch) does not apply to A.txt: hunk 1 context does not match"
        );
        assert_eq!(err.summary().patch_name, "0002-Greet.patch");
    }

    #[test]
    fn overlapping_hunks_conflict() {
        let old = numbered(10);
        let mut fp = modify("f", &old, &old.replace("line 3\n", "three\n"), 1);
        let mut second = fp.hunks[0].clone();
        second.old_start += 1;
        second.new_start += 1;
        fp.hunks.push(second);
        let err = apply_file(Some(&old), &fp, 5).unwrap_err();
        assert_eq!(err.reason, ConflictReason::Overlap);
        assert_eq!(err.hunk, 2);
    }

    #[test]
    fn create_requires_absent_file() {
        let fp = FilePatch {
            path: "B.txt".to_string(),
            change: FileChange::Create,
            hunks: make_hunks("", "b\n", 3).unwrap(),
        };
        assert_eq!(apply_file(None, &fp, 0).unwrap().as_deref(), Some("b\n"));
        let err = apply_file(Some(""), &fp, 0).unwrap_err();
        assert_eq!(err.reason, ConflictReason::FileExists);
        assert_eq!(err.hunk, 0);
    }

    #[test]
    fn delete_requires_full_match() {
        let fp = FilePatch {
            path: "C.txt".to_string(),
            change: FileChange::Delete,
            hunks: make_hunks("c\n", "", 3).unwrap(),
        };
        assert_eq!(apply_file(Some("c\n"), &fp, 0).unwrap(), None);
        assert_eq!(
            apply_file(None, &fp, 0).unwrap_err().reason,
            ConflictReason::MissingFile
        );
    }

    #[test]
    fn missing_newline_is_significant() {
        let fp = modify("f", "a\nb", "a\nc", 3);
        assert_eq!(apply_file(Some("a\nb"), &fp, 0).unwrap().unwrap(), "a\nc");
        assert!(apply_file(Some("a\nb\n"), &fp, 0).is_err());
    }
}
