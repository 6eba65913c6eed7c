//! Patch file format.
//!
//! A patch file is a mail-style header (`From:`, `Subject: [PATCH] ...`), an
//! optional description, a `---` separator, and one `diff --git` section per
//! file. Files are named `NNNN-<slug>.patch` and ordered by name. Headers
//! written by `git format-patch` (`From <sha>`, `Date:`, diffstat, signature)
//! are accepted on read. The `diff --git` sections are parsed by libgit2.

use git2::{Delta, Diff, Patch as GitPatch};

use crate::diff::{hunks_of, Hunk};
use crate::error::PatchError;

/// Author recorded on patches weft creates itself.
pub const DEFAULT_AUTHOR: &str = "weft <weft@localhost>";

/// Extension of patch files.
pub const PATCH_EXT: &str = "patch";

const DEV_NULL: &str = "/dev/null";
const MAX_SLUG_LEN: usize = 52;

/// How a file section changes its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// The file exists before and after.
    Modify,
    /// The file does not exist before.
    Create,
    /// The file does not exist after.
    Delete,
}

/// All hunks a patch makes to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Tree-relative path with `/` separators.
    pub path: String,
    /// Whether the file is modified, created, or deleted.
    pub change: FileChange,
    /// Ordered, non-overlapping hunks.
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// Returns `true` if both sections make the same changes, ignoring line numbers.
    pub fn same_change(&self, other: &FilePatch) -> bool {
        self.path == other.path
            && self.change == other.change
            && self.hunks.len() == other.hunks.len()
            && self
                .hunks
                .iter()
                .zip(&other.hunks)
                .all(|(a, b)| a.same_change(b))
    }
}

/// One parsed patch: metadata plus file sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// `Name <email>` of the author.
    pub author: String,
    /// One-line subject.
    pub subject: String,
    /// Free-form description between the headers and the `---` separator.
    pub description: String,
    /// File sections in stored order.
    pub files: Vec<FilePatch>,
}

impl Patch {
    /// Creates a patch with no file sections.
    pub fn new(author: &str, subject: &str) -> Self {
        Self {
            author: author.to_string(),
            subject: subject.to_string(),
            description: String::new(),
            files: Vec::new(),
        }
    }

    /// Paths of every file this patch touches.
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    /// Returns the section for `path`, if any.
    pub fn file(&self, path: &str) -> Option<&FilePatch> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Renders the patch in its on-disk format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("From: ");
        out.push_str(&self.author);
        out.push('\n');
        out.push_str("Subject: [PATCH] ");
        out.push_str(&self.subject);
        out.push_str("\n\n");
        if !self.description.is_empty() {
            out.push_str(self.description.trim_end_matches('\n'));
            out.push('\n');
        }
        out.push_str("---\n");
        for file in &self.files {
            let path = &file.path;
            out.push_str(&format!("diff --git a/{path} b/{path}\n"));
            match file.change {
                FileChange::Create => {
                    out.push_str("new file mode 100644\n");
                    out.push_str(&format!("--- {DEV_NULL}\n+++ b/{path}\n"));
                }
                FileChange::Delete => {
                    out.push_str("deleted file mode 100644\n");
                    out.push_str(&format!("--- a/{path}\n+++ {DEV_NULL}\n"));
                }
                FileChange::Modify => {
                    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
                }
            }
            for hunk in &file.hunks {
                hunk.render_into(&mut out);
            }
        }
        out
    }

    /// Parses a patch file. `name` is used in error messages only.
    pub fn parse(name: &str, text: &str) -> Result<Self, PatchError> {
        let envelope = Envelope::parse(text);
        let files = parse_sections(name, envelope.body)?;
        Ok(Patch {
            author: envelope.author,
            subject: envelope.subject,
            description: envelope.description,
            files,
        })
    }
}

/// Builds the file name for the patch at 1-based `position`.
pub fn patch_file_name(position: usize, subject: &str) -> String {
    let slug = slugify(subject);
    if slug.is_empty() {
        format!("{position:04}.{PATCH_EXT}")
    } else {
        format!("{position:04}-{slug}.{PATCH_EXT}")
    }
}

/// Turns a subject line into a file-name slug the way `git format-patch` does.
pub fn slugify(subject: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in subject.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.trim_matches(|c| c == '.' || c == '-').to_string()
}

/// Splits a patch file into its mail header, description, and diff body.
struct Envelope<'a> {
    author: String,
    subject: String,
    description: String,
    /// Everything from the first `diff --git` line on.
    body: &'a str,
}

impl<'a> Envelope<'a> {
    fn parse(text: &'a str) -> Self {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let mut pos = 0;
        let mut author = String::new();
        let mut subject = String::new();

        // Mail headers, up to the first blank line.
        let mut in_subject = false;
        while let Some(line) = lines.get(pos) {
            let trimmed = trim_eol(line);
            if trimmed.is_empty() || trimmed == "---" || trimmed.starts_with("diff --git ") {
                break;
            }
            pos += 1;
            if in_subject && (line.starts_with(' ') || line.starts_with('\t')) {
                subject.push(' ');
                subject.push_str(trimmed.trim());
                continue;
            }
            in_subject = false;
            if let Some(value) = trimmed.strip_prefix("From: ") {
                author = value.trim().to_string();
            } else if let Some(value) = trimmed.strip_prefix("Subject: ") {
                subject = strip_patch_tag(value.trim()).to_string();
                in_subject = true;
            }
        }
        if lines.get(pos).map(|l| trim_eol(l)) == Some("") {
            pos += 1;
        }

        // Description, up to the `---` separator.
        let mut description = String::new();
        while let Some(line) = lines.get(pos) {
            let trimmed = trim_eol(line);
            if trimmed.starts_with("diff --git ") {
                break;
            }
            pos += 1;
            if trimmed == "---" {
                break;
            }
            description.push_str(trimmed);
            description.push('\n');
        }

        // Diffstat or other notes before the first section.
        while lines.get(pos).is_some_and(|l| !l.starts_with("diff --git ")) {
            pos += 1;
        }
        let offset: usize = lines[..pos].iter().map(|l| l.len()).sum();

        Self {
            author,
            subject,
            description: description.trim_end_matches('\n').to_string(),
            body: &text[offset..],
        }
    }
}

fn parse_sections(name: &str, body: &str) -> Result<Vec<FilePatch>, PatchError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let malformed = |reason: String| PatchError::Parse {
        name: name.to_string(),
        reason,
    };
    let diff = Diff::from_buffer(body.as_bytes()).map_err(|e| malformed(e.message().to_string()))?;

    let mut files = Vec::with_capacity(diff.deltas().len());
    for (idx, delta) in diff.deltas().enumerate() {
        let old_path = delta.old_file().path().map(slash_path);
        let new_path = delta.new_file().path().map(slash_path);
        let change = match delta.status() {
            Delta::Added => FileChange::Create,
            Delta::Deleted => FileChange::Delete,
            Delta::Modified => FileChange::Modify,
            other => return Err(malformed(format!("unsupported change {other:?}"))),
        };
        let path = match (change, old_path, new_path) {
            (FileChange::Modify, Some(old), Some(new)) if old != new => {
                return Err(malformed(format!("renames are not supported ({old} -> {new})")))
            }
            (FileChange::Delete, Some(old), _) => old,
            (_, _, Some(new)) => new,
            _ => return Err(malformed("file section without a path".to_string())),
        };
        if delta.flags().is_binary() {
            return Err(malformed(format!("binary patch for {path} is not supported")));
        }
        let hunks = match GitPatch::from_diff(&diff, idx) {
            Ok(Some(patch)) => hunks_of(&patch),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
        .map_err(|e| malformed(format!("{path}: {}", e.message())))?;
        files.push(FilePatch {
            path,
            change,
            hunks,
        });
    }
    Ok(files)
}

fn slash_path(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn trim_eol(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

fn strip_patch_tag(subject: &str) -> &str {
    if subject.starts_with("[PATCH") {
        if let Some(end) = subject.find(']') {
            return subject[end + 1..].trim_start();
        }
    }
    subject
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::make_hunks;

    const SAMPLE: &str = "\
From: Jane Doe <jane@example.com>
Subject: [PATCH] Add greeting

Makes the greeting friendlier.
---
diff --git a/A.txt b/A.txt
--- a/A.txt
+++ b/A.txt
@@ -1 +1 @@
-hello
+hello world
";

    #[test]
    fn parses_metadata_and_hunks() {
        let patch = Patch::parse("0001-Add-greeting.patch", SAMPLE).unwrap();
        assert_eq!(patch.author, "Jane Doe <jane@example.com>");
        assert_eq!(patch.subject, "Add greeting");
        assert_eq!(patch.description, "Makes the greeting friendlier.");
        assert_eq!(patch.files.len(), 1);
        let file = &patch.files[0];
        assert_eq!(file.path, "A.txt");
        assert_eq!(file.change, FileChange::Modify);
        assert_eq!(file.hunks[0].old_lines(), vec!["hello\n"]);
        assert_eq!(file.hunks[0].new_lines(), vec!["hello world\n"]);
    }

    #[test]
    fn render_is_stable_for_own_format() {
        let patch = Patch::parse("p", SAMPLE).unwrap();
        assert_eq!(patch.render(), SAMPLE);
    }

    #[test]
    fn create_and_delete_sections() {
        let mut patch = Patch::new(DEFAULT_AUTHOR, "Move file");
        patch.files.push(FilePatch {
            path: "new/B.txt".to_string(),
            change: FileChange::Create,
            hunks: make_hunks("", "b\n", 3).unwrap(),
        });
        patch.files.push(FilePatch {
            path: "old.txt".to_string(),
            change: FileChange::Delete,
            hunks: make_hunks("x\ny", "", 3).unwrap(),
        });
        let text = patch.render();
        assert!(text.contains("new file mode 100644\n--- /dev/null\n+++ b/new/B.txt\n"));
        assert!(text.contains("deleted file mode 100644\n--- a/old.txt\n+++ /dev/null\n"));

        let back = Patch::parse("p", &text).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn accepts_git_format_patch_output() {
        let text = "\
From 3f2a9c1d Mon Sep 17 00:00:00 2001
From: Jane Doe <jane@example.com>
Date: Mon, 1 Jan 2024 00:00:00 +0000
Subject: [PATCH 2/5] Fix the long subject that
 wraps onto a second line

---
 A.txt | 2 +-
 1 file changed, 1 insertion(+), 1 deletion(-)

diff --git a/A.txt b/A.txt
index e69de29..4b825dc 100644
--- a/A.txt
+++ b/A.txt
@@ -1 +1 @@
-a
+b
--
2.43.0
";
        let patch = Patch::parse("p", text).unwrap();
        assert_eq!(
            patch.subject,
            "Fix the long subject that wraps onto a second line"
        );
        assert!(patch.description.is_empty());
        assert_eq!(patch.files.len(), 1);
        assert_eq!(patch.files[0].hunks.len(), 1);
    }

    #[test]
    fn no_newline_marker_is_applied_to_previous_line() {
        let text = "\
From: a
Subject: [PATCH] x

---
diff --git a/f b/f
--- a/f
+++ b/f
@@ -1 +1 @@
-a
\\ No newline at end of file
+a
";
        let patch = Patch::parse("p", text).unwrap();
        let hunk = &patch.files[0].hunks[0];
        assert_eq!(hunk.old_lines(), vec!["a"]);
        assert_eq!(hunk.new_lines(), vec!["a\n"]);
    }

    #[test]
    fn empty_patch_roundtrips() {
        let patch = Patch::new("a <a@b>", "Nothing yet");
        let back = Patch::parse("p", &patch.render()).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn short_hunk_is_an_error() {
        let text = "From: a\nSubject: x\n\n---\ndiff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n";
        let err = Patch::parse("0003-Short.patch", text).unwrap_err();
        assert!(matches!(err, PatchError::Parse { .. }));
        assert!(err.to_string().contains("0003-Short.patch"));
    }

    #[test]
    fn rename_is_rejected() {
        let text = "From: a\nSubject: x\n\n---\ndiff --git a/x b/y\n--- a/x\n+++ b/y\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(matches!(
            Patch::parse("p", text),
            Err(PatchError::Parse { .. })
        ));
    }

    #[test]
    fn file_names_are_numbered_slugs() {
        assert_eq!(
            patch_file_name(1, "Add  greeting (v2)!"),
            "0001-Add-greeting-v2.patch"
        );
        assert_eq!(patch_file_name(12, "!!!"), "0012.patch");
        assert!(slugify(&"x".repeat(200)).len() <= MAX_SLUG_LEN);
    }

    #[test]
    fn same_change_ignores_line_numbers() {
        let a = FilePatch {
            path: "f".to_string(),
            change: FileChange::Modify,
            hunks: make_hunks("1\na\n", "1\nb\n", 0).unwrap(),
        };
        let b = FilePatch {
            path: "f".to_string(),
            change: FileChange::Modify,
            hunks: make_hunks("0\n1\na\n", "0\n1\nb\n", 0).unwrap(),
        };
        assert!(a.same_change(&b));
        assert_ne!(a, b);
    }
}
