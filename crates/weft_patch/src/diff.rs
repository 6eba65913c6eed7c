//! Line diffing and unified-diff hunks.
//!
//! Hunks are computed by libgit2 (`git2::Patch::from_buffers`) and lifted into
//! [`Hunk`] values that keep each line's terminator, so a changed line ending
//! or a missing final newline is a real difference and round-trips through
//! the patch format exactly.

use std::path::Path;

use git2::{DiffOptions, Patch as GitPatch};

/// Context lines kept around each change.
pub const CONTEXT_LINES: usize = 3;

/// Marker emitted after a line that has no terminating newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// A line inside a hunk, including its `\n` terminator when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    /// Present on both sides.
    Context(String),
    /// Present only on the old side.
    Remove(String),
    /// Present only on the new side.
    Add(String),
}

impl HunkLine {
    /// The line text including its terminator.
    pub fn text(&self) -> &str {
        match self {
            HunkLine::Context(s) | HunkLine::Remove(s) | HunkLine::Add(s) => s,
        }
    }

    fn text_mut(&mut self) -> &mut String {
        match self {
            HunkLine::Context(s) | HunkLine::Remove(s) | HunkLine::Add(s) => s,
        }
    }

    fn prefix(&self) -> char {
        match self {
            HunkLine::Context(_) => ' ',
            HunkLine::Remove(_) => '-',
            HunkLine::Add(_) => '+',
        }
    }
}

/// A contiguous region of change with surrounding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 0-based index of the first old line the hunk covers.
    pub old_start: usize,
    /// 0-based index of the first new line the hunk covers.
    pub new_start: usize,
    /// Context, removed and added lines in order.
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Number of lines on the old side.
    pub fn old_len(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .count()
    }

    /// Number of lines on the new side.
    pub fn new_len(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Remove(_)))
            .count()
    }

    /// The lines the hunk expects to find.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .map(HunkLine::text)
            .collect()
    }

    /// The lines the hunk leaves behind.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Remove(_)))
            .map(HunkLine::text)
            .collect()
    }

    /// The `@@ -a,b +c,d @@` header line, without a newline.
    pub fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@",
            format_range(self.old_start, self.old_len()),
            format_range(self.new_start, self.new_len())
        )
    }

    /// Appends the hunk in unified format to `out`.
    pub fn render_into(&self, out: &mut String) {
        out.push_str(&self.header());
        out.push('\n');
        for line in &self.lines {
            let text = line.text();
            out.push(line.prefix());
            match text.strip_suffix('\n') {
                Some(body) => {
                    out.push_str(body);
                    out.push('\n');
                }
                None => {
                    out.push_str(text);
                    out.push('\n');
                    out.push_str(NO_NEWLINE_MARKER);
                    out.push('\n');
                }
            }
        }
    }

    /// The hunk rendered on its own.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    /// Returns `true` if both hunks make the same change, ignoring where.
    pub fn same_change(&self, other: &Hunk) -> bool {
        self.lines == other.lines
    }
}

/// Formats one side of a hunk header range.
fn format_range(start: usize, len: usize) -> String {
    let first = if len == 0 { start } else { start + 1 };
    if len == 1 {
        format!("{first}")
    } else {
        format!("{first},{len}")
    }
}

/// Header ranges are 1-based unless the side is empty.
fn zero_based(start: u32, len: u32) -> usize {
    if len == 0 {
        start as usize
    } else {
        start.saturating_sub(1) as usize
    }
}

/// Splits text into lines that keep their `\n` terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn diff_options(context: usize) -> DiffOptions {
    let mut opts = DiffOptions::new();
    opts.context_lines(context as u32)
        .interhunk_lines(0)
        .force_text(true);
    opts
}

/// Computes the hunks turning `old` into `new` with `context` lines around
/// each change. Equal inputs give no hunks.
pub fn make_hunks(old: &str, new: &str, context: usize) -> Result<Vec<Hunk>, git2::Error> {
    let mut opts = diff_options(context);
    let patch = GitPatch::from_buffers(
        old.as_bytes(),
        None,
        new.as_bytes(),
        None,
        Some(&mut opts),
    )?;
    hunks_of(&patch)
}

/// Lifts every hunk of a libgit2 patch into [`Hunk`] values.
///
/// "No newline at end of file" markers are folded into the line before them.
pub fn hunks_of(patch: &GitPatch<'_>) -> Result<Vec<Hunk>, git2::Error> {
    let mut hunks = Vec::with_capacity(patch.num_hunks());
    for h in 0..patch.num_hunks() {
        let (header, count) = patch.hunk(h)?;
        let mut lines: Vec<HunkLine> = Vec::with_capacity(count);
        for l in 0..count {
            let line = patch.line_in_hunk(h, l)?;
            let text = String::from_utf8_lossy(line.content()).into_owned();
            match line.origin() {
                ' ' => lines.push(HunkLine::Context(text)),
                '-' => lines.push(HunkLine::Remove(text)),
                '+' => lines.push(HunkLine::Add(text)),
                // '=', '<', '>': the previous line has no newline.
                _ => {
                    if let Some(last) = lines.last_mut() {
                        let text = last.text_mut();
                        if text.ends_with('\n') {
                            text.pop();
                        }
                    }
                }
            }
        }
        hunks.push(Hunk {
            old_start: zero_based(header.old_start(), header.old_lines()),
            new_start: zero_based(header.new_start(), header.new_lines()),
            lines,
        });
    }
    Ok(hunks)
}

/// Renders a labelled unified diff of two texts, or an empty string if equal.
pub fn unified_diff(
    old_label: &str,
    new_label: &str,
    old: &str,
    new: &str,
) -> Result<String, git2::Error> {
    if old == new {
        return Ok(String::new());
    }
    let mut opts = diff_options(CONTEXT_LINES);
    let mut patch = GitPatch::from_buffers(
        old.as_bytes(),
        Some(Path::new(old_label)),
        new.as_bytes(),
        Some(Path::new(new_label)),
        Some(&mut opts),
    )?;
    let buf = patch.to_buf()?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
