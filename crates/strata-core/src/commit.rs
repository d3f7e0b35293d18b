//! Commit-time tree mutation and lock management.
//!
//! One commit runs the pipeline: compute the target number, locate the
//! insertion point (trunk extension, branch-tip append, or new branch
//! point), validate/consume the lock on the delta being extended, then
//! splice the new delta in. Everything here mutates only the in-memory
//! tree; the caller serializes and swaps the file afterwards, so an error
//! at any stage leaves the on-disk store untouched.
//!
//! Delta direction: the trunk head always keeps the literal text, the old
//! head is rewritten to a reverse script (new text → old text), and branch
//! deltas store forward scripts (previous revision → new text).

use crate::diffgen::DiffTool;
use crate::engine::{locate, materialize, Filter};
use crate::error::{StrataError, StrataResult};
use crate::ident::now_store_date;
use crate::num::RevNum;
use crate::scan::Interner;
use crate::tree::{AdminHeader, Delta, DeltaId, DeltaTree};

/// What a caller wants committed.
pub struct CommitRequest {
    /// Full new revision text.
    pub text: String,
    /// Log message.
    pub log: String,
    /// Recorded author; defaults to the committing user.
    pub author: Option<String>,
    /// Store-form date; defaults to now.
    pub date: Option<String>,
    /// State label; defaults to `Exp`.
    pub state: Option<String>,
    /// Explicit target revision or branch number.
    pub rev: Option<RevNum>,
}

/// The result of one commit.
#[derive(Debug, PartialEq)]
pub enum CommitOutcome {
    /// A new delta with this number is now in the tree.
    Committed(RevNum),
    /// The text was identical to the revision it would have extended; the
    /// tree was not touched and the rewrite should be abandoned.
    Unchanged(RevNum),
}

/// Where the new delta attaches.
enum Insertion {
    /// First revision of an empty store.
    Root,
    /// New trunk head; the old head is this id.
    Trunk(DeltaId),
    /// Append after this branch tip.
    BranchTip(DeltaId),
    /// Start a new branch rooted at this delta.
    BranchPoint(DeltaId),
}

/// Run one commit against the in-memory store.
///
/// `user` is the committing identity, `owner` whether that identity owns
/// the underlying store file (the non-strict lock bypass).
pub fn commit(
    admin: &mut AdminHeader,
    tree: &mut DeltaTree,
    interner: &mut Interner,
    req: CommitRequest,
    user: &str,
    owner: bool,
    diff: &dyn DiffTool,
) -> StrataResult<CommitOutcome> {
    let target = compute_target(admin, tree, req.rev.as_ref(), user)?;
    let insertion = find_insertion(tree, &target)?;

    // The delta being extended, if any, is the one whose lock matters and
    // whose text the new delta is diffed against.
    let extended = match insertion {
        Insertion::Root => None,
        Insertion::Trunk(id) | Insertion::BranchTip(id) | Insertion::BranchPoint(id) => Some(id),
    };

    if let Some(id) = extended {
        consume_lock(admin, tree.get(id).rev.clone(), user, owner)?;
    }

    // Bodies to store, computed before any tree mutation.
    let mut old_head_script = None;
    let new_body = match insertion {
        Insertion::Root => req.text.clone(),
        Insertion::Trunk(old_head) => {
            let old_text = tree.get(old_head).text.clone();
            match diff.script(&req.text, &old_text)? {
                Some(script) => old_head_script = Some(script),
                None => return Ok(CommitOutcome::Unchanged(tree.get(old_head).rev.clone())),
            }
            req.text.clone()
        }
        Insertion::BranchTip(tip) | Insertion::BranchPoint(tip) => {
            let base_rev = tree.get(tip).rev.clone();
            let path = locate(tree, Some(&base_rev), &Filter::default())?;
            let base_text = materialize(tree, &path)?;
            match diff.script(&base_text, &req.text)? {
                Some(script) => script,
                None => return Ok(CommitOutcome::Unchanged(base_rev)),
            }
        }
    };

    let delta = Delta {
        rev: target.clone(),
        date: req.date.unwrap_or_else(now_store_date),
        author: req.author.unwrap_or_else(|| user.to_string()),
        state: req.state.unwrap_or_else(|| "Exp".to_string()),
        branches: Vec::new(),
        next: None,
        log: req.log,
        text: new_body,
        phrases: Vec::new(),
        text_phrases: Vec::new(),
    };
    let new_id = tree
        .insert(delta, interner)
        .ok_or_else(|| StrataError::Semantic(format!("revision {target} already exists")))?;

    match insertion {
        Insertion::Root => tree.head = Some(new_id),
        Insertion::Trunk(old_head) => {
            tree.get_mut(old_head).text =
                old_head_script.expect("trunk extension computed a reverse script");
            tree.get_mut(new_id).next = Some(old_head);
            tree.head = Some(new_id);
        }
        Insertion::BranchTip(tip) => tree.get_mut(tip).next = Some(new_id),
        Insertion::BranchPoint(point) => tree.insert_branch(point, new_id),
    }

    Ok(CommitOutcome::Committed(target))
}

/// Compute the concrete revision number to assign, in priority order:
/// explicit > single held lock > default branch > increment head.
fn compute_target(
    admin: &AdminHeader,
    tree: &DeltaTree,
    explicit: Option<&RevNum>,
    user: &str,
) -> StrataResult<RevNum> {
    if let Some(rev) = explicit {
        return resolve_line(tree, rev.clone());
    }

    let held = admin.locks_by(user);
    match held.len() {
        0 => {}
        1 => return number_from_lock(tree, &held[0].rev.clone()),
        n => {
            return Err(StrataError::Semantic(format!(
                "{user} holds {n} locks; specify a revision"
            )))
        }
    }

    if let Some(branch) = &admin.default_branch {
        return resolve_line(tree, branch.clone());
    }

    match tree.head_delta() {
        Some(head) => Ok(head.rev.increment()),
        None => Ok(RevNum::parse("1.1").expect("constant parses")),
    }
}

/// Turn a branch number (or one-field number) into the concrete revision
/// that extends it; pass concrete revision numbers through.
fn resolve_line(tree: &DeltaTree, rev: RevNum) -> StrataResult<RevNum> {
    let fc = rev.field_count();

    if fc == 1 {
        // Widen: `5` means `5.1` on a new trunk line, unless head already
        // sits on that line, in which case head simply advances.
        return match tree.head_delta() {
            Some(head) if head.rev.cmp_field(&rev, 0) == std::cmp::Ordering::Equal => {
                Ok(head.rev.increment())
            }
            _ => Ok(rev.append("1")),
        };
    }

    if rev.is_revision() {
        return Ok(rev);
    }

    // Odd count >= 3: a side branch. Extend its tip if it exists, else its
    // first revision is `<branch>.1`.
    let point_rev = rev.prefix(fc - 1);
    let Some(point) = tree.find(&point_rev) else {
        return Err(StrataError::Semantic(format!(
            "branch point revision {point_rev} doesn't exist"
        )));
    };
    for &oldest in &tree.get(point).branches {
        if tree.get(oldest).rev.starts_with(&rev) {
            let tip = tree.branch_tip(oldest);
            return Ok(tree.get(tip).rev.increment());
        }
    }
    Ok(rev.append("1"))
}

/// Number a commit from the one lock its user holds: tips advance by one;
/// a lock on an interior delta starts a new branch there, taking the next
/// unused branch id.
fn number_from_lock(tree: &DeltaTree, locked: &RevNum) -> StrataResult<RevNum> {
    let Some(id) = tree.find(locked) else {
        return Err(StrataError::Semantic(format!(
            "locked revision {locked} doesn't exist"
        )));
    };
    let is_tip = if locked.field_count() == 2 {
        tree.head == Some(id)
    } else {
        tree.get(id).next.is_none()
    };
    if is_tip {
        return Ok(locked.increment());
    }
    let next_id = next_branch_id(tree, id, locked);
    Ok(locked.append(&next_id).append("1"))
}

/// One past the highest branch id currently rooted at `point`.
fn next_branch_id(tree: &DeltaTree, point: DeltaId, point_rev: &RevNum) -> String {
    let field = point_rev.field_count();
    match tree.get(point).branches.last() {
        Some(&highest) => {
            let branch_rev = tree.get(highest).rev.clone();
            let id_num = branch_rev.prefix(field + 1);
            id_num.increment().last_field().to_string()
        }
        None => "1".to_string(),
    }
}

/// Decide where `target` attaches and validate its ordering constraints.
///
/// An already-taken number falls out of the ordering checks: it can never
/// exceed the head or tip of its line, so the error names the bound the
/// caller must beat.
fn find_insertion(tree: &DeltaTree, target: &RevNum) -> StrataResult<Insertion> {
    if target.field_count() < 2 || !target.is_revision() {
        return Err(StrataError::Semantic(format!(
            "{target} does not name a revision"
        )));
    }

    if target.field_count() == 2 {
        return match tree.head {
            None => Ok(Insertion::Root),
            Some(head) => {
                let head_rev = &tree.get(head).rev;
                if target > head_rev {
                    Ok(Insertion::Trunk(head))
                } else {
                    Err(StrataError::Numbering {
                        given: target.to_string(),
                        required: head_rev.to_string(),
                    })
                }
            }
        };
    }

    // Side branch: find the branch point by truncating to the nearest
    // even-length prefix.
    let branch = target.branch_of().expect("revision numbers have branches");
    let point_rev = target.prefix(target.field_count() - 2);
    let Some(point) = tree.find(&point_rev) else {
        return Err(StrataError::Semantic(format!(
            "branch point revision {point_rev} doesn't exist"
        )));
    };

    for &oldest in &tree.get(point).branches {
        if tree.get(oldest).rev.starts_with(&branch) {
            let tip = tree.branch_tip(oldest);
            let tip_rev = &tree.get(tip).rev;
            if target > tip_rev {
                return Ok(Insertion::BranchTip(tip));
            }
            return Err(StrataError::Numbering {
                given: target.to_string(),
                required: tip_rev.to_string(),
            });
        }
    }
    Ok(Insertion::BranchPoint(point))
}

/// Apply the lock-consume rules for extending `rev`.
///
/// A lock held by the committing user is consumed. With strict locking
/// off, the store's owner may consume anyone's lock (and needs none);
/// with it on, a lock is mandatory. Anything else is a conflict naming
/// the holder.
fn consume_lock(
    admin: &mut AdminHeader,
    rev: RevNum,
    user: &str,
    owner: bool,
) -> StrataResult<()> {
    match admin.find_lock(&rev) {
        Some(lock) if lock.user == user => {
            admin.remove_lock(&rev);
            Ok(())
        }
        Some(lock) => {
            if !admin.strict && owner {
                admin.remove_lock(&rev);
                Ok(())
            } else {
                Err(StrataError::LockConflict {
                    rev: rev.to_string(),
                    holder: Some(lock.user.clone()),
                })
            }
        }
        None => {
            if admin.strict {
                Err(StrataError::LockConflict {
                    rev: rev.to_string(),
                    holder: None,
                })
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffgen::LcsDiff;
    use crate::tree::Lock;

    struct Fixture {
        admin: AdminHeader,
        tree: DeltaTree,
        interner: Interner,
    }

    impl Fixture {
        fn empty() -> Fixture {
            Fixture {
                admin: AdminHeader::default(),
                tree: DeltaTree::new(),
                interner: Interner::new(),
            }
        }

        fn commit(&mut self, req: CommitRequest, user: &str) -> StrataResult<CommitOutcome> {
            commit(
                &mut self.admin,
                &mut self.tree,
                &mut self.interner,
                req,
                user,
                false,
                &LcsDiff,
            )
        }

        fn commit_text(&mut self, text: &str, user: &str) -> StrataResult<CommitOutcome> {
            self.commit(plain_req(text, None), user)
        }

        fn text_of(&self, rev: &str) -> String {
            let rev = RevNum::parse(rev).unwrap();
            let path = locate(&self.tree, Some(&rev), &Filter::default()).unwrap();
            materialize(&self.tree, &path).unwrap()
        }
    }

    fn plain_req(text: &str, rev: Option<&str>) -> CommitRequest {
        CommitRequest {
            text: text.to_string(),
            log: "change".to_string(),
            author: None,
            date: None,
            state: None,
            rev: rev.map(|r| RevNum::parse(r).unwrap()),
        }
    }

    /// 1.1 → 1.2 → 1.3, non-strict, no locks.
    fn trunk_fixture() -> Fixture {
        let mut fx = Fixture::empty();
        fx.commit_text("one\n", "mel").unwrap();
        fx.commit_text("one\ntwo\n", "mel").unwrap();
        fx.commit_text("one\ntwo\nthree\n", "kay").unwrap();
        fx
    }

    #[test]
    fn test_initial_commit_is_1_1() {
        let mut fx = Fixture::empty();
        let outcome = fx.commit_text("hello\n", "mel").unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("1.1").unwrap()));
        assert_eq!(fx.tree.head_delta().unwrap().rev.to_string(), "1.1");
        assert_eq!(fx.tree.head_delta().unwrap().text, "hello\n");
    }

    #[test]
    fn test_trunk_extension_increments_head() {
        let mut fx = trunk_fixture();
        let outcome = fx.commit_text("one\ntwo\nthree\nfour\n", "kay").unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("1.4").unwrap()));

        let head = fx.tree.head.unwrap();
        assert_eq!(fx.tree.get(head).rev.to_string(), "1.4");
        let old = fx.tree.get(head).next.unwrap();
        assert_eq!(fx.tree.get(old).rev.to_string(), "1.3");
        // Old head now holds a reverse script, new head the literal.
        assert_eq!(fx.tree.get(head).text, "one\ntwo\nthree\nfour\n");
        assert_eq!(fx.tree.get(old).text, "d4 1\n");
    }

    #[test]
    fn test_old_revisions_still_materialize_after_commits() {
        let fx = trunk_fixture();
        assert_eq!(fx.text_of("1.1"), "one\n");
        assert_eq!(fx.text_of("1.2"), "one\ntwo\n");
        assert_eq!(fx.text_of("1.3"), "one\ntwo\nthree\n");
    }

    #[test]
    fn test_first_branch_at_point_gets_dot1_dot1() {
        let mut fx = trunk_fixture();
        let outcome = fx
            .commit(plain_req("one\ntwo\nbranched\n", Some("1.2.1")), "mel")
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed(RevNum::parse("1.2.1.1").unwrap())
        );
        assert_eq!(fx.text_of("1.2.1.1"), "one\ntwo\nbranched\n");
        // Trunk is untouched.
        assert_eq!(fx.text_of("1.3"), "one\ntwo\nthree\n");
    }

    #[test]
    fn test_branch_tip_append() {
        let mut fx = trunk_fixture();
        fx.commit(plain_req("one\ntwo\nbranched\n", Some("1.2.1")), "mel")
            .unwrap();
        let outcome = fx
            .commit(plain_req("one\ntwo\nbranched more\n", Some("1.2.1")), "mel")
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed(RevNum::parse("1.2.1.2").unwrap())
        );
        assert_eq!(fx.text_of("1.2.1.2"), "one\ntwo\nbranched more\n");
        assert_eq!(fx.text_of("1.2.1.1"), "one\ntwo\nbranched\n");
    }

    #[test]
    fn test_sibling_branch_takes_next_id() {
        let mut fx = trunk_fixture();
        fx.commit(plain_req("b1\n", Some("1.2.1.1")), "mel").unwrap();
        // Lock an interior delta and commit without a number: new branch,
        // next unused id.
        fx.admin.locks.push(Lock {
            user: "kay".to_string(),
            rev: RevNum::parse("1.2").unwrap(),
        });
        let outcome = fx.commit_text("b2\n", "kay").unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed(RevNum::parse("1.2.2.1").unwrap())
        );
    }

    #[test]
    fn test_explicit_low_trunk_number_names_head_as_bound() {
        let mut fx = trunk_fixture();
        // 1.2 is already taken; the error must name the head it has to beat.
        let err = fx
            .commit(plain_req("anything\n", Some("1.2")), "kay")
            .unwrap_err();
        match err {
            StrataError::Numbering { given, required } => {
                assert_eq!(given, "1.2");
                assert_eq!(required, "1.3");
            }
            other => panic!("expected numbering error, got {other:?}"),
        }
    }

    #[test]
    fn test_taken_branch_number_names_tip_as_bound() {
        let mut fx = trunk_fixture();
        fx.commit(plain_req("b1\n", Some("1.2.1.1")), "mel").unwrap();
        fx.commit(plain_req("b2\n", Some("1.2.1")), "mel").unwrap();
        let err = fx
            .commit(plain_req("late\n", Some("1.2.1.1")), "mel")
            .unwrap_err();
        match err {
            StrataError::Numbering { given, required } => {
                assert_eq!(given, "1.2.1.1");
                assert_eq!(required, "1.2.1.2");
            }
            other => panic!("expected numbering error, got {other:?}"),
        }
    }

    #[test]
    fn test_lock_by_other_user_conflicts() {
        let mut fx = trunk_fixture();
        fx.admin.locks.push(Lock {
            user: "mel".to_string(),
            rev: RevNum::parse("1.3").unwrap(),
        });
        let err = fx.commit_text("four\n", "kay").unwrap_err();
        match err {
            StrataError::LockConflict { rev, holder } => {
                assert_eq!(rev, "1.3");
                assert_eq!(holder.as_deref(), Some("mel"));
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_own_lock_is_consumed() {
        let mut fx = trunk_fixture();
        fx.admin.strict = true;
        fx.admin.locks.push(Lock {
            user: "kay".to_string(),
            rev: RevNum::parse("1.3").unwrap(),
        });
        let outcome = fx.commit_text("one\ntwo\nthree\nfour\n", "kay").unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("1.4").unwrap()));
        assert!(fx.admin.locks.is_empty());
    }

    #[test]
    fn test_strict_mode_requires_a_lock() {
        let mut fx = trunk_fixture();
        fx.admin.strict = true;
        let err = fx.commit_text("four\n", "kay").unwrap_err();
        assert!(matches!(
            err,
            StrataError::LockConflict { holder: None, .. }
        ));
    }

    #[test]
    fn test_nonstrict_owner_breaks_foreign_lock() {
        let mut fx = trunk_fixture();
        fx.admin.locks.push(Lock {
            user: "mel".to_string(),
            rev: RevNum::parse("1.3").unwrap(),
        });
        let outcome = commit(
            &mut fx.admin,
            &mut fx.tree,
            &mut fx.interner,
            plain_req("one\ntwo\nthree\nfour\n", None),
            "kay",
            true, // owner
            &LcsDiff,
        )
        .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("1.4").unwrap()));
        assert!(fx.admin.locks.is_empty());
    }

    #[test]
    fn test_single_lock_numbers_the_commit() {
        let mut fx = trunk_fixture();
        fx.admin.locks.push(Lock {
            user: "kay".to_string(),
            rev: RevNum::parse("1.3").unwrap(),
        });
        let outcome = fx.commit_text("one\ntwo\nthree\nfour\n", "kay").unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("1.4").unwrap()));
    }

    #[test]
    fn test_two_locks_is_ambiguous() {
        let mut fx = trunk_fixture();
        fx.admin.locks.push(Lock {
            user: "kay".to_string(),
            rev: RevNum::parse("1.2").unwrap(),
        });
        fx.admin.locks.push(Lock {
            user: "kay".to_string(),
            rev: RevNum::parse("1.3").unwrap(),
        });
        let err = fx.commit_text("four\n", "kay").unwrap_err();
        assert!(matches!(err, StrataError::Semantic(_)));
    }

    #[test]
    fn test_default_branch_numbers_the_commit() {
        let mut fx = trunk_fixture();
        fx.commit(plain_req("b1\n", Some("1.2.1.1")), "mel").unwrap();
        fx.admin.default_branch = Some(RevNum::parse("1.2.1").unwrap());
        let outcome = fx.commit_text("b1 plus\n", "mel").unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed(RevNum::parse("1.2.1.2").unwrap())
        );
    }

    #[test]
    fn test_unchanged_text_is_reported_not_committed() {
        let mut fx = trunk_fixture();
        let outcome = fx.commit_text("one\ntwo\nthree\n", "kay").unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged(RevNum::parse("1.3").unwrap()));
        assert_eq!(fx.tree.len(), 3);
    }

    #[test]
    fn test_one_field_number_widens() {
        let mut fx = trunk_fixture();
        // Head is on line 1, so `2` opens line 2 as 2.1.
        let outcome = fx.commit(plain_req("v2\n", Some("2")), "kay").unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("2.1").unwrap()));

        // And `2` again now advances the head on line 2.
        let outcome = fx.commit(plain_req("v2 more\n", Some("2")), "kay").unwrap();
        assert_eq!(outcome, CommitOutcome::Committed(RevNum::parse("2.2").unwrap()));
    }
}
