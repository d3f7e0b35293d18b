//! The in-memory delta tree and admin header.
//!
//! Deltas live in an arena (`Vec<Delta>`) addressed by stable [`DeltaId`]
//! indices, with a side map from revision-number text to id. Links:
//!
//! - Trunk deltas chain through `next` from `head` *backward in time* down
//!   to the root revision, whose `next` is absent.
//! - Each delta may own an ordered list of branches (ascending branch id);
//!   each entry is the *oldest* delta on that branch, and `next` from there
//!   walks *forward in time* to the branch tip.
//!
//! The asymmetry mirrors delta storage direction: trunk deltas hold reverse
//! diffs, branch deltas hold forward diffs, and the reconstruction engine
//! replays either kind the same way because the path already visits bodies
//! in application order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::num::RevNum;
use crate::scan::Interner;

/// Stable index of a delta in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeltaId(pub(crate) usize);

/// One committed revision.
///
/// The body `text` is either the full literal content (only ever true of
/// the current trunk head) or a diff script relative to an adjacent delta;
/// which one is decided by the delta's position in a reconstruction path,
/// not by a stored flag.
#[derive(Debug, Clone)]
pub struct Delta {
    pub rev: RevNum,
    /// Dotted store-form date, `[YY]YY.mm.dd.HH.MM.SS`.
    pub date: String,
    pub author: String,
    pub state: String,
    /// Oldest delta of each branch rooted here, branch id ascending.
    pub branches: Vec<DeltaId>,
    pub next: Option<DeltaId>,
    pub log: String,
    pub text: String,
    /// Unrecognized header clauses, replayed verbatim on write.
    pub phrases: Vec<String>,
    /// Unrecognized clauses between `log` and `text`, ditto.
    pub text_phrases: Vec<String>,
}

/// Alias mapping a name to a revision number, independent of the tree.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub rev: RevNum,
}

/// Exclusive reservation by one user on one revision.
#[derive(Debug, Clone, Serialize)]
pub struct Lock {
    pub user: String,
    pub rev: RevNum,
}

/// The store's metadata block.
#[derive(Debug, Clone, Default)]
pub struct AdminHeader {
    pub default_branch: Option<RevNum>,
    pub access: Vec<String>,
    pub symbols: Vec<Symbol>,
    pub locks: Vec<Lock>,
    pub strict: bool,
    pub comment_leader: Option<String>,
    pub expand_mode: Option<String>,
    /// Free-text store description.
    pub desc: String,
    /// Unrecognized admin clauses, replayed verbatim on write.
    pub phrases: Vec<String>,
}

impl AdminHeader {
    /// The lock on `rev`, if any. At most one exists per revision.
    pub fn find_lock(&self, rev: &RevNum) -> Option<&Lock> {
        self.locks.iter().find(|l| l.rev == *rev)
    }

    /// Remove and return the lock on `rev`.
    pub fn remove_lock(&mut self, rev: &RevNum) -> Option<Lock> {
        let i = self.locks.iter().position(|l| l.rev == *rev)?;
        Some(self.locks.remove(i))
    }

    /// All locks held by one user.
    pub fn locks_by(&self, user: &str) -> Vec<&Lock> {
        self.locks.iter().filter(|l| l.user == user).collect()
    }

    /// Resolve a symbolic name to its revision number.
    pub fn lookup_symbol(&self, name: &str) -> Option<&RevNum> {
        self.symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.rev)
    }
}

/// Arena of deltas plus the head pointer and the name→id map.
#[derive(Debug, Default)]
pub struct DeltaTree {
    deltas: Vec<Delta>,
    index: HashMap<Arc<str>, DeltaId>,
    pub head: Option<DeltaId>,
}

impl DeltaTree {
    pub fn new() -> DeltaTree {
        DeltaTree::default()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Insert a delta, registering its number in the index. The number
    /// must be new to the tree.
    pub fn insert(&mut self, delta: Delta, interner: &mut Interner) -> Option<DeltaId> {
        let key = interner.intern(&delta.rev.to_string());
        if self.index.contains_key(&key) {
            return None;
        }
        let id = DeltaId(self.deltas.len());
        self.index.insert(key, id);
        self.deltas.push(delta);
        Some(id)
    }

    pub fn get(&self, id: DeltaId) -> &Delta {
        &self.deltas[id.0]
    }

    pub fn get_mut(&mut self, id: DeltaId) -> &mut Delta {
        &mut self.deltas[id.0]
    }

    /// Look up a delta by its exact number text.
    pub fn find_text(&self, rev_text: &str) -> Option<DeltaId> {
        self.index.get(rev_text).copied()
    }

    /// Look up a delta by number.
    pub fn find(&self, rev: &RevNum) -> Option<DeltaId> {
        self.find_text(&rev.to_string())
    }

    pub fn head_delta(&self) -> Option<&Delta> {
        self.head.map(|id| self.get(id))
    }

    /// Register `child` as a branch rooted at `point`, keeping the branch
    /// list ordered by branch id ascending.
    pub fn insert_branch(&mut self, point: DeltaId, child: DeltaId) {
        let child_rev = self.get(child).rev.clone();
        let mut at = self.deltas[point.0].branches.len();
        for (i, &existing) in self.deltas[point.0].branches.iter().enumerate() {
            if self.deltas[existing.0].rev > child_rev {
                at = i;
                break;
            }
        }
        self.deltas[point.0].branches.insert(at, child);
    }

    /// Walk the trunk head→root.
    pub fn trunk(&self) -> Vec<DeltaId> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(id) = cur {
            out.push(id);
            cur = self.get(id).next;
        }
        out
    }

    /// Walk a branch from its oldest delta to its tip.
    pub fn branch_chain(&self, oldest: DeltaId) -> Vec<DeltaId> {
        let mut out = Vec::new();
        let mut cur = Some(oldest);
        while let Some(id) = cur {
            out.push(id);
            cur = self.get(id).next;
        }
        out
    }

    /// The newest delta on the branch starting at `oldest`.
    pub fn branch_tip(&self, oldest: DeltaId) -> DeltaId {
        let mut cur = oldest;
        while let Some(next) = self.get(cur).next {
            cur = next;
        }
        cur
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::bare_delta;
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let mut interner = Interner::new();
        let mut tree = DeltaTree::new();
        let id = tree.insert(bare_delta("1.1"), &mut interner).unwrap();
        assert_eq!(tree.find_text("1.1"), Some(id));
        assert_eq!(tree.find(&RevNum::parse("1.1").unwrap()), Some(id));
        assert!(tree.find_text("1.2").is_none());
    }

    #[test]
    fn test_tree_formats_for_debugging() {
        let mut interner = Interner::new();
        let mut tree = DeltaTree::new();
        let id = tree.insert(bare_delta("1.1"), &mut interner).unwrap();
        tree.head = Some(id);
        let rendered = format!("{tree:?}");
        assert!(rendered.contains("head"));
    }

    #[test]
    fn test_duplicate_number_rejected() {
        let mut interner = Interner::new();
        let mut tree = DeltaTree::new();
        tree.insert(bare_delta("1.1"), &mut interner).unwrap();
        assert!(tree.insert(bare_delta("1.1"), &mut interner).is_none());
    }

    #[test]
    fn test_trunk_walk() {
        let mut interner = Interner::new();
        let mut tree = DeltaTree::new();
        let r11 = tree.insert(bare_delta("1.1"), &mut interner).unwrap();
        let r12 = tree.insert(bare_delta("1.2"), &mut interner).unwrap();
        tree.get_mut(r12).next = Some(r11);
        tree.head = Some(r12);
        assert_eq!(tree.trunk(), vec![r12, r11]);
    }

    #[test]
    fn test_branch_list_stays_sorted() {
        let mut interner = Interner::new();
        let mut tree = DeltaTree::new();
        let point = tree.insert(bare_delta("1.1"), &mut interner).unwrap();
        let b2 = tree.insert(bare_delta("1.1.2.1"), &mut interner).unwrap();
        let b1 = tree.insert(bare_delta("1.1.1.1"), &mut interner).unwrap();
        tree.insert_branch(point, b2);
        tree.insert_branch(point, b1);
        assert_eq!(tree.get(point).branches, vec![b1, b2]);
    }

    #[test]
    fn test_lock_bookkeeping() {
        let mut admin = AdminHeader::default();
        let rev = RevNum::parse("1.3").unwrap();
        admin.locks.push(Lock {
            user: "kay".to_string(),
            rev: rev.clone(),
        });
        assert_eq!(admin.find_lock(&rev).unwrap().user, "kay");
        assert_eq!(admin.locks_by("kay").len(), 1);
        assert!(admin.remove_lock(&rev).is_some());
        assert!(admin.find_lock(&rev).is_none());
    }
}
