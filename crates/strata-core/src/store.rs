//! One-file store transactions.
//!
//! A [`Store`] owns the parsed admin header and delta tree of a single
//! store file for the duration of one transaction. All mutating entry
//! points work on the in-memory state and then rewrite the whole file
//! through the serialize-and-swap path; nothing is ever patched in place,
//! so an error at any stage leaves the original file untouched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::codec::{emit_order, read_store, write_store};
use crate::commit::{self, CommitOutcome, CommitRequest};
use crate::diffgen::{DiffTool, LcsDiff};
use crate::engine::{locate, materialize, Filter};
use crate::error::{StrataError, StrataResult};
use crate::fsutil::{atomic_replace, process_owns, SwapGuard};
use crate::ident::current_user;
use crate::num::RevNum;
use crate::scan::Interner;
use crate::tree::{AdminHeader, DeltaTree, Lock, Symbol};

const SWAP_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed store plus the path it came from.
pub struct Store {
    path: PathBuf,
    admin: AdminHeader,
    tree: DeltaTree,
    interner: Interner,
}

/// The result of a checkout.
#[derive(Debug)]
pub struct Checkout {
    pub rev: RevNum,
    pub text: String,
}

/// One delta in a history listing.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub rev: RevNum,
    pub date: String,
    pub author: String,
    pub state: String,
    pub log: String,
    pub branches: Vec<RevNum>,
}

/// Store-level history listing.
#[derive(Debug, Serialize)]
pub struct StoreReport {
    pub file: String,
    pub head: Option<RevNum>,
    pub default_branch: Option<RevNum>,
    pub strict: bool,
    pub locks: Vec<Lock>,
    pub symbols: Vec<Symbol>,
    pub access: Vec<String>,
    pub desc: String,
    pub total: usize,
    pub entries: Vec<LogEntry>,
}

impl Store {
    /// Parse an existing store file.
    pub fn open(path: impl Into<PathBuf>) -> StrataResult<Store> {
        let path = path.into();
        let raw = fs::read_to_string(&path)?;
        let mut interner = Interner::new();
        let (admin, tree) = read_store(&raw, &mut interner)?;
        Ok(Store {
            path,
            admin,
            tree,
            interner,
        })
    }

    /// A fresh, empty store (no revisions, strict locking on). Nothing is
    /// written until the first mutation.
    pub fn init(path: impl Into<PathBuf>) -> StrataResult<Store> {
        let path = path.into();
        if path.exists() {
            return Err(StrataError::Semantic(format!(
                "store {} already exists",
                path.display()
            )));
        }
        Ok(Store {
            path,
            admin: AdminHeader {
                strict: true,
                ..AdminHeader::default()
            },
            tree: DeltaTree::new(),
            interner: Interner::new(),
        })
    }

    /// Open the store if present, otherwise start a new one.
    pub fn open_or_init(path: impl Into<PathBuf>) -> StrataResult<Store> {
        let path = path.into();
        if path.exists() {
            Store::open(path)
        } else {
            Store::init(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn admin(&self) -> &AdminHeader {
        &self.admin
    }

    pub fn head_rev(&self) -> Option<&RevNum> {
        self.tree.head_delta().map(|d| &d.rev)
    }

    /// Resolve a user-supplied revision argument: a dotted number is used
    /// as given, anything else is looked up as a symbolic name. Absent
    /// means the default branch when one is configured.
    pub fn resolve_rev(&self, arg: Option<&str>) -> StrataResult<Option<RevNum>> {
        match arg {
            Some(text) => {
                if text.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
                    return RevNum::parse(text).map(Some);
                }
                match self.admin.lookup_symbol(text) {
                    Some(rev) => Ok(Some(rev.clone())),
                    None => Err(StrataError::Semantic(format!(
                        "symbolic name {text} is not defined"
                    ))),
                }
            }
            None => Ok(self.admin.default_branch.clone()),
        }
    }

    /// Reconstruct the text of the selected revision.
    pub fn checkout(&self, rev_arg: Option<&str>, filter: &Filter) -> StrataResult<Checkout> {
        let rev = self.resolve_rev(rev_arg)?;
        let path = locate(&self.tree, rev.as_ref(), filter)?;
        let target = path.last().expect("locate never returns an empty path");
        let rev = self.tree.get(*target).rev.clone();
        let text = materialize(&self.tree, &path)?;
        Ok(Checkout { rev, text })
    }

    /// Resolve a selector to a concrete revision number without
    /// materializing its text.
    pub fn lookup(&self, rev_arg: Option<&str>, filter: &Filter) -> StrataResult<RevNum> {
        let rev = self.resolve_rev(rev_arg)?;
        let path = locate(&self.tree, rev.as_ref(), filter)?;
        let target = path.last().expect("locate never returns an empty path");
        Ok(self.tree.get(*target).rev.clone())
    }

    /// Commit a new revision and rewrite the store. `user` defaults to
    /// the ambient identity. An unchanged-content commit is reported and
    /// the file is left alone.
    pub fn commit(
        &mut self,
        req: CommitRequest,
        user: Option<&str>,
    ) -> StrataResult<CommitOutcome> {
        let user = user.map(str::to_string).unwrap_or_else(current_user);
        let owner = if self.path.exists() {
            process_owns(&self.path).unwrap_or(false)
        } else {
            true
        };
        let outcome = commit::commit(
            &mut self.admin,
            &mut self.tree,
            &mut self.interner,
            req,
            &user,
            owner,
            &LcsDiff,
        )?;
        if matches!(outcome, CommitOutcome::Committed(_)) {
            self.save()?;
        }
        Ok(outcome)
    }

    /// Take an exclusive lock on the selected revision for `user`.
    pub fn lock(&mut self, rev_arg: Option<&str>, user: &str) -> StrataResult<RevNum> {
        let rev = self.lookup(rev_arg, &Filter::default())?;
        if let Some(existing) = self.admin.find_lock(&rev) {
            return Err(StrataError::LockConflict {
                rev: rev.to_string(),
                holder: Some(existing.user.clone()),
            });
        }
        self.admin.locks.push(Lock {
            user: user.to_string(),
            rev: rev.clone(),
        });
        self.save()?;
        Ok(rev)
    }

    /// Release `user`'s lock on the selected revision. Another holder's
    /// lock is a conflict; breaking it is a separate, deliberate step.
    pub fn unlock(&mut self, rev_arg: Option<&str>, user: &str) -> StrataResult<RevNum> {
        let rev = self.lookup(rev_arg, &Filter::default())?;
        match self.admin.find_lock(&rev) {
            Some(lock) if lock.user == user => {
                self.admin.remove_lock(&rev);
                self.save()?;
                Ok(rev)
            }
            Some(lock) => Err(StrataError::LockConflict {
                rev: rev.to_string(),
                holder: Some(lock.user.clone()),
            }),
            None => Err(StrataError::LockConflict {
                rev: rev.to_string(),
                holder: None,
            }),
        }
    }

    /// Bind a symbolic name to a revision, replacing any previous binding.
    pub fn set_symbol(&mut self, name: &str, rev_arg: &str) -> StrataResult<RevNum> {
        let rev = self.lookup(Some(rev_arg), &Filter::default())?;
        self.admin.symbols.retain(|s| s.name != name);
        self.admin.symbols.push(Symbol {
            name: name.to_string(),
            rev: rev.clone(),
        });
        self.save()?;
        Ok(rev)
    }

    /// The diff script between two selected revisions; `None` when their
    /// texts are identical.
    pub fn diff(
        &self,
        from_arg: Option<&str>,
        to_arg: Option<&str>,
        filter: &Filter,
    ) -> StrataResult<Option<String>> {
        let from = self.checkout(from_arg, filter)?;
        let to = self.checkout(to_arg, filter)?;
        LcsDiff.script(&from.text, &to.text)
    }

    /// History listing, newest trunk delta first, then branches.
    pub fn report(&self) -> StoreReport {
        let entries = emit_order(&self.tree)
            .into_iter()
            .map(|id| {
                let delta = self.tree.get(id);
                LogEntry {
                    rev: delta.rev.clone(),
                    date: delta.date.clone(),
                    author: delta.author.clone(),
                    state: delta.state.clone(),
                    log: delta.log.clone(),
                    branches: delta
                        .branches
                        .iter()
                        .map(|&b| self.tree.get(b).rev.clone())
                        .collect(),
                }
            })
            .collect::<Vec<_>>();
        StoreReport {
            file: self.path.display().to_string(),
            head: self.head_rev().cloned(),
            default_branch: self.admin.default_branch.clone(),
            strict: self.admin.strict,
            locks: self.admin.locks.clone(),
            symbols: self.admin.symbols.clone(),
            access: self.admin.access.clone(),
            desc: self.admin.desc.clone(),
            total: self.tree.len(),
            entries,
        }
    }

    /// Serialize the whole store and swap it over the original under the
    /// short-lived OS lock.
    fn save(&self) -> StrataResult<()> {
        let contents = write_store(&self.admin, &self.tree);
        let _guard = SwapGuard::acquire(&self.path, SWAP_TIMEOUT)?;
        atomic_replace(&self.path, &contents)
    }
}
