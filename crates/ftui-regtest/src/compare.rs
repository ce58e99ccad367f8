//! Line comparison of current output against the golden copy.
//!
//! Diffs are always oriented current → golden: `-` lines exist only in the
//! current output, `+` lines only in the golden file.

use serde::Serialize;

pub const CURRENT_LABEL: &str = "current";
pub const GOLDEN_LABEL: &str = "golden";

/// Unchanged lines shown around each change.
pub const CONTEXT_LINES: usize = 3;

/// Above this many LCS cells the changed middle is shown as one
/// remove-all/add-all block instead of a minimal diff.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    pub equal: bool,
    /// Unified-diff listing; empty when `equal`.
    pub diff_lines: Vec<String>,
    pub current_lines: Vec<String>,
    pub golden_lines: Vec<String>,
}

/// Compare two texts line by line.
///
/// One trailing newline is stripped from each side first. With
/// `ignore_trailing_whitespace` every line is right-trimmed, which also makes
/// `\r\n` and `\n` endings compare equal.
pub fn compare(current: &str, golden: &str, ignore_trailing_whitespace: bool) -> ComparisonResult {
    let current_lines = split_lines(current, ignore_trailing_whitespace);
    let golden_lines = split_lines(golden, ignore_trailing_whitespace);
    let equal = current_lines == golden_lines;
    let diff_lines = if equal {
        Vec::new()
    } else {
        unified_diff(
            &current_lines,
            &golden_lines,
            CURRENT_LABEL,
            GOLDEN_LABEL,
            CONTEXT_LINES,
        )
    };
    ComparisonResult {
        equal,
        diff_lines,
        current_lines,
        golden_lines,
    }
}

pub fn split_lines(text: &str, ignore_trailing_whitespace: bool) -> Vec<String> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n')
        .map(|line| {
            if ignore_trailing_whitespace {
                line.trim_end().to_string()
            } else {
                line.to_string()
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Keep,
    Remove,
    Add,
}

/// One step of the edit script; `a`/`b` are the line positions on each side.
#[derive(Debug, Clone, Copy)]
struct Edit {
    kind: EditKind,
    a: usize,
    b: usize,
}

/// Render a unified diff from `a` to `b` with `context` lines around changes.
pub fn unified_diff(
    a: &[String],
    b: &[String],
    a_label: &str,
    b_label: &str,
    context: usize,
) -> Vec<String> {
    let edits = edit_script(a, b);
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for (idx, _) in edits
        .iter()
        .enumerate()
        .filter(|(_, edit)| edit.kind != EditKind::Keep)
    {
        let start = idx.saturating_sub(context);
        let end = (idx + context + 1).min(edits.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => hunks.push((start, end)),
        }
    }
    if hunks.is_empty() {
        return Vec::new();
    }

    let mut lines = vec![format!("--- {a_label}"), format!("+++ {b_label}")];
    for (start, end) in hunks {
        let hunk = &edits[start..end];
        let a_count = hunk.iter().filter(|e| e.kind != EditKind::Add).count();
        let b_count = hunk.iter().filter(|e| e.kind != EditKind::Remove).count();
        lines.push(format!(
            "@@ -{} +{} @@",
            format_range(hunk[0].a, a_count),
            format_range(hunk[0].b, b_count)
        ));
        lines.extend(hunk.iter().map(|edit| match edit.kind {
            EditKind::Keep => format!(" {}", a[edit.a]),
            EditKind::Remove => format!("-{}", a[edit.a]),
            EditKind::Add => format!("+{}", b[edit.b]),
        }));
    }
    lines
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{len}", start + 1),
    }
}

fn edit_script(a: &[String], b: &[String]) -> Vec<Edit> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let (a_end, b_end) = (a.len() - suffix, b.len() - suffix);

    let mut edits = Vec::with_capacity(a.len() + b.len());
    edits.extend((0..prefix).map(|k| Edit {
        kind: EditKind::Keep,
        a: k,
        b: k,
    }));
    middle_edits(&a[prefix..a_end], &b[prefix..b_end], prefix, prefix, &mut edits);
    edits.extend((0..suffix).map(|k| Edit {
        kind: EditKind::Keep,
        a: a_end + k,
        b: b_end + k,
    }));
    edits
}

fn middle_edits(a: &[String], b: &[String], a_off: usize, b_off: usize, out: &mut Vec<Edit>) {
    let (n, m) = (a.len(), b.len());
    let remove = |i: usize, j: usize| Edit {
        kind: EditKind::Remove,
        a: a_off + i,
        b: b_off + j,
    };
    let add = |i: usize, j: usize| Edit {
        kind: EditKind::Add,
        a: a_off + i,
        b: b_off + j,
    };

    if n.saturating_mul(m) > MAX_LCS_CELLS {
        out.extend((0..n).map(|i| remove(i, 0)));
        out.extend((0..m).map(|j| add(n, j)));
        return;
    }

    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push(Edit {
                kind: EditKind::Keep,
                a: a_off + i,
                b: b_off + j,
            });
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            out.push(remove(i, j));
            i += 1;
        } else {
            out.push(add(i, j));
            j += 1;
        }
    }
    out.extend((i..n).map(|i| remove(i, j)));
    out.extend((j..m).map(|j| add(n, j)));
}
