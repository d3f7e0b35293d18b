//! Path-finding over the delta tree and revision reconstruction.
//!
//! `locate` turns a target (a revision or branch number, plus optional
//! date/author/state constraints) into the ordered list of deltas from
//! `head` down to the target. `materialize` then seeds a text buffer from
//! the head's literal body and replays each subsequent delta's diff script.
//! The same replay works for trunk and branch paths because the stored
//! direction of each individual diff already matches the walk: trunk
//! deltas hold reverse diffs, branch deltas forward diffs.

use std::cmp::Ordering;

use crate::error::{StrataError, StrataResult};
use crate::ident::normalize_store_date;
use crate::num::RevNum;
use crate::tree::{Delta, DeltaId, DeltaTree};

/// Optional constraints on the selected delta.
///
/// `date` is a cutoff in store-dotted form: the newest delta not younger
/// than it is chosen. `author` and `state` must match exactly.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub date: Option<String>,
    pub author: Option<String>,
    pub state: Option<String>,
}

impl Filter {
    fn date_ok(&self, delta: &Delta) -> bool {
        match &self.date {
            Some(cutoff) => {
                normalize_store_date(&delta.date) <= normalize_store_date(cutoff)
            }
            None => true,
        }
    }

    fn author_ok(&self, delta: &Delta) -> bool {
        self.author.as_deref().is_none_or(|a| delta.author == a)
    }

    fn state_ok(&self, delta: &Delta) -> bool {
        self.state.as_deref().is_none_or(|s| delta.state == s)
    }

    pub fn matches(&self, delta: &Delta) -> bool {
        self.date_ok(delta) && self.author_ok(delta) && self.state_ok(delta)
    }

    /// Name the constraint no candidate could satisfy, for error reporting.
    fn blame(&self, tree: &DeltaTree, candidates: &[DeltaId]) -> String {
        let deltas: Vec<&Delta> = candidates.iter().map(|&id| tree.get(id)).collect();
        if self.date.is_some() && !deltas.iter().any(|d| self.date_ok(d)) {
            return format!("date<={}", self.date.as_deref().unwrap_or(""));
        }
        if self.author.is_some() && !deltas.iter().any(|d| self.author_ok(d)) {
            return format!("author={}", self.author.as_deref().unwrap_or(""));
        }
        if self.state.is_some() && !deltas.iter().any(|d| self.state_ok(d)) {
            return format!("state={}", self.state.as_deref().unwrap_or(""));
        }
        let mut parts = Vec::new();
        if let Some(d) = &self.date {
            parts.push(format!("date<={d}"));
        }
        if let Some(a) = &self.author {
            parts.push(format!("author={a}"));
        }
        if let Some(s) = &self.state {
            parts.push(format!("state={s}"));
        }
        parts.join(", ")
    }
}

fn no_match(filter: &Filter, tree: &DeltaTree, candidates: &[DeltaId], scope: &str) -> StrataError {
    StrataError::Semantic(format!(
        "no revision {scope} satisfies {}",
        filter.blame(tree, candidates)
    ))
}

/// Find the path of deltas from `head` to the selected target, head first.
///
/// `rev` may be a full revision number, a branch number (the newest delta
/// on the branch that passes `filter` is chosen), or absent (newest trunk
/// delta passing `filter`).
pub fn locate(
    tree: &DeltaTree,
    rev: Option<&RevNum>,
    filter: &Filter,
) -> StrataResult<Vec<DeltaId>> {
    if tree.head.is_none() {
        return Err(StrataError::Semantic("store has no revisions".to_string()));
    }

    let mut path = Vec::new();

    let Some(r) = rev else {
        // Newest trunk delta satisfying the filter; trunk is stored
        // newest-first, so the first hit wins.
        for id in tree.trunk() {
            path.push(id);
            if filter.matches(tree.get(id)) {
                return Ok(path);
            }
        }
        return Err(no_match(filter, tree, &tree.trunk(), "on trunk"));
    };

    let fc = r.field_count();

    if fc == 1 {
        // A one-field number names a trunk line: the newest trunk delta
        // with that first field.
        for id in tree.trunk() {
            path.push(id);
            let delta = tree.get(id);
            if delta.rev.cmp_field(r, 0) == Ordering::Equal && filter.matches(delta) {
                return Ok(path);
            }
        }
        return Err(StrataError::Semantic(format!(
            "no revision on trunk line {r}"
        )));
    }

    // Walk the trunk to the two-field prefix.
    let trunk_target = r.prefix(2);
    let mut point = None;
    for id in tree.trunk() {
        path.push(id);
        if tree.get(id).rev == trunk_target {
            point = Some(id);
            break;
        }
    }
    let Some(mut point) = point else {
        return Err(StrataError::Semantic(format!(
            "revision {trunk_target} doesn't exist"
        )));
    };

    let mut consumed = 2;
    loop {
        if consumed == fc {
            // Exact revision target.
            let delta = tree.get(point);
            if !filter.matches(delta) {
                return Err(no_match(filter, tree, &[point], &format!("at {}", delta.rev)));
            }
            return Ok(path);
        }

        // The next field selects a branch rooted at `point`.
        let branch_num = r.prefix(consumed + 1);
        let point_delta = tree.get(point);
        if point_delta.branches.is_empty() {
            return Err(StrataError::Semantic(format!(
                "branch point {branch_num} doesn't exist"
            )));
        }

        let mut oldest = None;
        let mut any_higher = false;
        for &candidate in &point_delta.branches {
            match tree.get(candidate).rev.cmp_field(r, consumed) {
                Ordering::Equal => {
                    oldest = Some(candidate);
                    break;
                }
                Ordering::Greater => {
                    any_higher = true;
                    break;
                }
                Ordering::Less => continue,
            }
        }
        let Some(oldest) = oldest else {
            return Err(StrataError::Semantic(if any_higher {
                format!("branch number {branch_num} too low")
            } else {
                format!("branch number {branch_num} too high")
            }));
        };
        consumed += 1;

        if consumed == fc {
            // Branch selector: newest delta on the branch satisfying the
            // filter. The chain runs oldest→tip, so take the last match.
            let chain = tree.branch_chain(oldest);
            let mut end = None;
            for (i, &id) in chain.iter().enumerate() {
                if filter.matches(tree.get(id)) {
                    end = Some(i);
                }
            }
            let Some(end) = end else {
                return Err(no_match(
                    filter,
                    tree,
                    &chain,
                    &format!("on branch {branch_num}"),
                ));
            };
            path.extend(&chain[..=end]);
            return Ok(path);
        }

        // The next field is a revision counter on that branch.
        let rev_target = r.prefix(consumed + 1);
        let mut found = None;
        for id in tree.branch_chain(oldest) {
            path.push(id);
            if tree.get(id).rev == rev_target {
                found = Some(id);
                break;
            }
        }
        let Some(found) = found else {
            return Err(StrataError::Semantic(format!(
                "revision {rev_target} doesn't exist"
            )));
        };
        consumed += 1;
        point = found;
    }
}

/// A line-addressed text buffer, the replay target for diff scripts.
///
/// Lines keep their trailing newline so reconstruction is byte-exact even
/// when the final line is unterminated.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    lines: Vec<String>,
}

impl TextBuffer {
    pub fn from_text(text: &str) -> TextBuffer {
        TextBuffer {
            lines: text.split_inclusive('\n').map(str::to_string).collect(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Insert `lines` after 1-based line `after` (0 inserts at the top).
    pub fn insert_after(&mut self, after: usize, lines: Vec<String>) -> StrataResult<()> {
        if after > self.lines.len() {
            return Err(StrataError::CorruptDiff(format!(
                "insert after line {after} but buffer has {} lines",
                self.lines.len()
            )));
        }
        self.lines.splice(after..after, lines);
        Ok(())
    }

    /// Delete `count` lines starting at 1-based line `start`.
    pub fn delete_range(&mut self, start: usize, count: usize) -> StrataResult<()> {
        if start == 0 || start + count - 1 > self.lines.len() {
            return Err(StrataError::CorruptDiff(format!(
                "delete lines {start}..{} but buffer has {} lines",
                start + count - 1,
                self.lines.len()
            )));
        }
        self.lines.drain(start - 1..start - 1 + count);
        Ok(())
    }

    /// Apply a whole script; on any error the buffer is left unchanged.
    pub fn apply_script(&mut self, ops: &[ScriptOp]) -> StrataResult<()> {
        let mut work = self.clone();
        let mut offset: isize = 0;
        for op in ops {
            match op {
                ScriptOp::Delete { start, count } => {
                    let at = *start as isize + offset;
                    if at < 1 {
                        return Err(StrataError::CorruptDiff(format!(
                            "delete at line {start} addresses before buffer start"
                        )));
                    }
                    work.delete_range(at as usize, *count)?;
                    offset -= *count as isize;
                }
                ScriptOp::Insert { after, lines } => {
                    let at = *after as isize + offset;
                    if at < 0 {
                        return Err(StrataError::CorruptDiff(format!(
                            "insert after line {after} addresses before buffer start"
                        )));
                    }
                    let added = lines.len() as isize;
                    work.insert_after(at as usize, lines.clone())?;
                    offset += added;
                }
            }
        }
        *self = work;
        Ok(())
    }

    pub fn into_text(self) -> String {
        self.lines.concat()
    }
}

/// One operation of the diff-script mini-language.
///
/// Line numbers refer to the text the script is applied to, before any of
/// the script's own edits; `apply_script` tracks the running offset.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOp {
    /// `aL N`: insert `lines` (N of them) after line L.
    Insert { after: usize, lines: Vec<String> },
    /// `dL N`: delete N lines starting at line L.
    Delete { start: usize, count: usize },
}

/// Parse a diff script, checking syntax and the monotonicity invariant
/// (line references never regress) before anything is applied.
pub fn parse_script(text: &str) -> StrataResult<Vec<ScriptOp>> {
    let mut ops = Vec::new();
    let mut lines = text.split_inclusive('\n');
    let mut last_ref = 0usize;

    while let Some(command) = lines.next() {
        let command = command.strip_suffix('\n').unwrap_or(command);
        if command.is_empty() {
            continue;
        }
        let kind = command.as_bytes()[0];
        if kind != b'a' && kind != b'd' {
            return Err(StrataError::CorruptDiff(format!(
                "bad script command `{command}`"
            )));
        }
        let rest = &command[1..];
        let Some((line_str, count_str)) = rest.split_once(' ') else {
            return Err(StrataError::CorruptDiff(format!(
                "bad script command `{command}`"
            )));
        };
        let (line, count) = match (line_str.parse::<usize>(), count_str.parse::<usize>()) {
            (Ok(l), Ok(c)) if c > 0 => (l, c),
            _ => {
                return Err(StrataError::CorruptDiff(format!(
                    "bad script command `{command}`"
                )))
            }
        };

        if line < last_ref {
            return Err(StrataError::CorruptDiff(format!(
                "line reference {line} regresses behind {last_ref}"
            )));
        }
        last_ref = line;

        if kind == b'd' {
            if line == 0 {
                return Err(StrataError::CorruptDiff(
                    "delete at line 0".to_string(),
                ));
            }
            ops.push(ScriptOp::Delete {
                start: line,
                count,
            });
        } else {
            let mut payload = Vec::with_capacity(count);
            for _ in 0..count {
                let Some(text_line) = lines.next() else {
                    return Err(StrataError::CorruptDiff(format!(
                        "insert short of its {count} lines"
                    )));
                };
                payload.push(text_line.to_string());
            }
            ops.push(ScriptOp::Insert {
                after: line,
                lines: payload,
            });
        }
    }
    Ok(ops)
}

/// Rebuild the target revision's exact text from a head-first path.
///
/// The first delta's body is taken literally (it is always `head`); every
/// later body is parsed as a diff script and replayed in order.
pub fn materialize(tree: &DeltaTree, path: &[DeltaId]) -> StrataResult<String> {
    let Some((&first, rest)) = path.split_first() else {
        return Err(StrataError::Semantic("empty revision path".to_string()));
    };
    let mut buf = TextBuffer::from_text(&tree.get(first).text);
    for &id in rest {
        let ops = parse_script(&tree.get(id).text)?;
        buf.apply_script(&ops)?;
    }
    Ok(buf.into_text())
}
