//! Unified-diff parsing, hunk application, and diff generation.
//!
//! The applier is the fallback when no external `patch` utility is usable.
//! Hunks are spliced in order; each splice shifts later hunks by the
//! difference between the lines it inserted and removed.

use regex::Regex;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex is valid")
});

const CONTEXT_LINES: usize = 3;
const MAX_DIFF_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("Diff contains no hunks")]
    NoHunks,

    #[error("Malformed hunk header: {0}")]
    MalformedHeader(String),

    #[error("Hunk {hunk} does not apply at line {line}: expected {expected:?}")]
    Mismatch { hunk: usize, line: usize, expected: String },
}

/// Parse every `@@` hunk out of a unified diff. File headers are ignored.
pub fn parse_unified_diff(diff: &str) -> Result<Vec<Hunk>, PatchError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for (idx, line) in lines.iter().enumerate() {
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            let caps = HUNK_HEADER
                .captures(line)
                .ok_or_else(|| PatchError::MalformedHeader(line.to_string()))?;
            let num = |i: usize, default: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(default)
            };
            current = Some(Hunk {
                old_start: num(1, 0),
                old_count: num(2, 1),
                new_start: num(3, 0),
                new_count: num(4, 1),
                lines: Vec::new(),
            });
            continue;
        }

        let next_is_header = lines.get(idx + 1).is_some_and(|n| n.starts_with("+++ "));
        if line.starts_with("diff ") || (line.starts_with("--- ") && next_is_header) {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(rest.to_string()));
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        }
        // "\ No newline at end of file" and stray text are skipped
    }

    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() {
        return Err(PatchError::NoHunks);
    }
    Ok(hunks)
}

/// Split content into lines, reporting whether it ended with a newline.
fn split_lines(content: &str) -> (Vec<String>, bool) {
    if content.is_empty() {
        return (Vec::new(), true);
    }
    let trailing = content.ends_with('\n');
    let body = if trailing { &content[..content.len() - 1] } else { content };
    (body.split('\n').map(str::to_string).collect(), trailing)
}

fn matches_at(lines: &[String], at: usize, expected: &[&str]) -> bool {
    if at + expected.len() > lines.len() {
        return false;
    }
    lines[at..at + expected.len()]
        .iter()
        .zip(expected)
        .all(|(have, want)| have.trim_end() == want.trim_end())
}

/// Find the match position closest to `nominal`.
fn locate(lines: &[String], nominal: usize, expected: &[&str]) -> Option<usize> {
    if matches_at(lines, nominal, expected) {
        return Some(nominal);
    }
    let limit = lines.len().saturating_sub(expected.len());
    (1..=lines.len()).find_map(|delta| {
        let below = nominal.checked_sub(delta).filter(|&p| matches_at(lines, p, expected));
        let above = Some(nominal + delta)
            .filter(|&p| p <= limit)
            .filter(|&p| matches_at(lines, p, expected));
        below.or(above)
    })
}

/// Apply parsed hunks to `original`, returning the patched content.
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let (mut lines, trailing_newline) = split_lines(original);
    let mut offset: isize = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let old_lines = hunk.old_lines();
        let new_lines = hunk.new_lines();

        // A zero-length old range names the line *after which* to insert.
        let nominal = if old_lines.is_empty() && hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let shifted = (nominal as isize + offset).clamp(0, lines.len() as isize) as usize;

        let at = if old_lines.is_empty() {
            shifted
        } else {
            locate(&lines, shifted, &old_lines).ok_or_else(|| PatchError::Mismatch {
                hunk: index + 1,
                line: shifted + 1,
                expected: old_lines.first().map(|s| s.to_string()).unwrap_or_default(),
            })?
        };

        lines.splice(at..at + old_lines.len(), new_lines.iter().map(|s| s.to_string()));
        offset = at as isize - nominal as isize + new_lines.len() as isize - old_lines.len() as isize;
    }

    let mut out = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// Parse and apply a unified diff in one step.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String, PatchError> {
    let hunks = parse_unified_diff(diff)?;
    apply_hunks(original, &hunks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

fn edit_script(a: &[String], b: &[String]) -> Vec<Op> {
    let (n, m) = (a.len(), b.len());
    if n.saturating_mul(m) > MAX_DIFF_CELLS {
        let mut ops = vec![Op::Delete; n];
        ops.extend(std::iter::repeat_n(Op::Insert, m));
        return ops;
    }

    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    let mut ops = Vec::with_capacity(n + m);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat_n(Op::Delete, n - i));
    ops.extend(std::iter::repeat_n(Op::Insert, m - j));
    ops
}

/// Render a unified diff from `old` to `new`. Empty when they are identical.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    let (a, _) = split_lines(old);
    let (b, _) = split_lines(new);
    let ops = edit_script(&a, &b);

    // Position in (a, b) before each op.
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut i, mut j) = (0usize, 0usize);
    for op in &ops {
        positions.push((i, j));
        match op {
            Op::Equal => {
                i += 1;
                j += 1;
            }
            Op::Delete => i += 1,
            Op::Insert => j += 1,
        }
    }
    positions.push((i, j));

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| **op != Op::Equal)
        .map(|(k, _)| k)
        .collect();

    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &k in &changes {
        match groups.last_mut() {
            Some((_, last)) if k - *last <= 2 * CONTEXT_LINES => *last = k,
            _ => groups.push((k, k)),
        }
    }

    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    for (first, last) in groups {
        let start = first.saturating_sub(CONTEXT_LINES);
        let end = (last + CONTEXT_LINES + 1).min(ops.len());
        let (old_pos, new_pos) = positions[start];
        let old_count = ops[start..end].iter().filter(|op| **op != Op::Insert).count();
        let new_count = ops[start..end].iter().filter(|op| **op != Op::Delete).count();
        let old_start = if old_count == 0 { old_pos } else { old_pos + 1 };
        let new_start = if new_count == 0 { new_pos } else { new_pos + 1 };
        out.push_str(&format!("@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"));

        for (k, op) in ops.iter().enumerate().take(end).skip(start) {
            let (ai, bj) = positions[k];
            match op {
                Op::Equal => out.push_str(&format!(" {}\n", a[ai])),
                Op::Delete => out.push_str(&format!("-{}\n", a[ai])),
                Op::Insert => out.push_str(&format!("+{}\n", b[bj])),
            }
        }
    }
    out
}
