//! Line-diff script generation.
//!
//! Commit needs a way to turn two revisions' texts into the stored script
//! form (`aL N` / `dL N`, line numbers addressing the source text).
//! [`DiffTool`] is the seam for plugging in an external differ; [`LcsDiff`]
//! is the built-in implementation, an LCS table + backtrack over lines.

use crate::error::StrataResult;

/// Produces diff scripts for delta storage.
pub trait DiffTool {
    /// The script that transforms `from` into `to`, or `None` when the two
    /// texts are identical (the external tool's exit-status-0 case).
    fn script(&self, from: &str, to: &str) -> StrataResult<Option<String>>;
}

/// Edit operation produced by LCS backtracking.
#[derive(Debug, PartialEq)]
enum EditOp {
    Equal,
    Insert(usize), // index into the new lines
    Delete,
}

/// Longest-common-subsequence table for two line slices.
fn lcs_table(old: &[&str], new: &[&str]) -> Vec<Vec<usize>> {
    let m = old.len();
    let n = new.len();
    let mut table = vec![vec![0usize; n + 1]; m + 1];

    for i in 1..=m {
        for j in 1..=n {
            if old[i - 1] == new[j - 1] {
                table[i][j] = table[i - 1][j - 1] + 1;
            } else {
                table[i][j] = table[i - 1][j].max(table[i][j - 1]);
            }
        }
    }

    table
}

/// Backtrack through the LCS table into a forward-ordered edit sequence.
fn lcs_backtrack(table: &[Vec<usize>], old: &[&str], new: &[&str]) -> Vec<EditOp> {
    let mut ops = Vec::new();
    let mut i = old.len();
    let mut j = new.len();

    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            ops.push(EditOp::Equal);
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            ops.push(EditOp::Insert(j - 1));
            j -= 1;
        } else {
            ops.push(EditOp::Delete);
            i -= 1;
        }
    }

    ops.reverse();
    ops
}

/// The built-in line differ.
pub struct LcsDiff;

impl DiffTool for LcsDiff {
    fn script(&self, from: &str, to: &str) -> StrataResult<Option<String>> {
        if from == to {
            return Ok(None);
        }
        let old: Vec<&str> = from.split_inclusive('\n').collect();
        let new: Vec<&str> = to.split_inclusive('\n').collect();
        let table = lcs_table(&old, &new);
        let ops = lcs_backtrack(&table, &old, &new);

        // Group each run of changes between equal anchors into one
        // delete-then-insert pair. Line numbers address `from` before any
        // of this script's own edits, so they only ever move forward.
        let mut script = String::new();
        let mut old_line = 0usize; // 1-based count of old lines passed
        let mut iter = ops.iter().peekable();
        while let Some(op) = iter.next() {
            match op {
                EditOp::Equal => old_line += 1,
                _ => {
                    let mut ndel = 0usize;
                    let mut inserted: Vec<&str> = Vec::new();
                    let mut cur = Some(op);
                    while let Some(op) = cur {
                        match op {
                            EditOp::Delete => ndel += 1,
                            EditOp::Insert(ni) => inserted.push(new[*ni]),
                            EditOp::Equal => unreachable!("run ends before an anchor"),
                        }
                        cur = match iter.peek() {
                            Some(next) if **next != EditOp::Equal => iter.next(),
                            _ => None,
                        };
                    }
                    if ndel > 0 {
                        script.push_str(&format!("d{} {ndel}\n", old_line + 1));
                    }
                    if !inserted.is_empty() {
                        script.push_str(&format!("a{} {}\n", old_line + ndel, inserted.len()));
                        for line in &inserted {
                            script.push_str(line);
                        }
                        // A payload line may lack its newline only at end
                        // of input; nothing follows it there.
                        if !script.ends_with('\n') {
                            debug_assert!(iter.peek().is_none());
                        }
                    }
                    old_line += ndel;
                }
            }
        }
        Ok(Some(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{parse_script, TextBuffer};

    fn roundtrip(from: &str, to: &str) -> Option<String> {
        let script = LcsDiff.script(from, to).unwrap()?;
        let ops = parse_script(&script).unwrap();
        let mut buf = TextBuffer::from_text(from);
        buf.apply_script(&ops).unwrap();
        assert_eq!(buf.into_text(), to, "script {script:?} must rebuild `to`");
        Some(script)
    }

    #[test]
    fn test_identical_yields_none() {
        assert!(LcsDiff.script("a\nb\n", "a\nb\n").unwrap().is_none());
        assert!(LcsDiff.script("", "").unwrap().is_none());
    }

    #[test]
    fn test_single_append() {
        let script = roundtrip("one\n", "one\ntwo\n").unwrap();
        assert_eq!(script, "a1 1\ntwo\n");
    }

    #[test]
    fn test_single_delete() {
        let script = roundtrip("one\ntwo\n", "one\n").unwrap();
        assert_eq!(script, "d2 1\n");
    }

    #[test]
    fn test_replacement_is_delete_then_insert() {
        let script = roundtrip("one\ntwo\nthree\n", "one\nTWO\nthree\n").unwrap();
        assert_eq!(script, "d2 1\na2 1\nTWO\n");
    }

    #[test]
    fn test_insert_at_top() {
        let script = roundtrip("body\n", "header\nbody\n").unwrap();
        assert_eq!(script, "a0 1\nheader\n");
    }

    #[test]
    fn test_multiple_hunks_stay_monotonic() {
        let from = "a\nb\nc\nd\ne\n";
        let to = "a\nB\nc\nd\nE\nf\n";
        let script = roundtrip(from, to).unwrap();
        let mut last = 0usize;
        for line in script.lines() {
            if let Some(rest) = line.strip_prefix(['a', 'd']) {
                if let Some((l, _)) = rest.split_once(' ') {
                    if let Ok(l) = l.parse::<usize>() {
                        assert!(l >= last, "line refs must not regress in {script:?}");
                        last = l;
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_to_content_and_back() {
        roundtrip("", "a\nb\n");
        roundtrip("a\nb\n", "");
    }

    #[test]
    fn test_unterminated_final_line() {
        roundtrip("one\ntwo\n", "one\ntwo\nthree");
        roundtrip("one\ntail", "one\nother");
    }
}
