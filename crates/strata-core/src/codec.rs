//! Reader and writer for the on-disk store format.
//!
//! A store file is three sections: the admin header (head pointer, default
//! branch, access list, symbols, locks, flags), the delta list (one header
//! clause per revision), and the delta texts (log + body per revision),
//! separated by the `desc` string. All strings are `@`-quoted with doubled
//! `@` escaping. Identifier-led clauses the reader does not recognize are
//! captured as opaque phrases and replayed verbatim by the writer, so files
//! from newer tools round-trip unharmed.

use std::collections::HashSet;

use crate::error::StrataResult;
use crate::num::RevNum;
use crate::scan::{escape, Interner, Scanner, Spanned, Token};
use crate::tree::{AdminHeader, Delta, DeltaId, DeltaTree, Lock, Symbol};

/// Admin keywords the reader understands; anything else becomes a phrase.
const ADMIN_KEYWORDS: &[&str] = &[
    "branch", "access", "symbols", "locks", "strict", "comment", "expand",
];

/// Parse a whole store file.
pub fn read_store(src: &str, interner: &mut Interner) -> StrataResult<(AdminHeader, DeltaTree)> {
    let mut reader = Reader {
        sc: Scanner::new(src),
        interner,
    };
    reader.read()
}

struct Reader<'a, 'i> {
    sc: Scanner<'a>,
    interner: &'i mut Interner,
}

/// Unresolved cross-references of one delta header, fixed up once every
/// header has been read.
struct PendingLinks {
    id: DeltaId,
    next: Option<String>,
    branches: Vec<String>,
}

impl<'a, 'i> Reader<'a, 'i> {
    fn read(&mut self) -> StrataResult<(AdminHeader, DeltaTree)> {
        let mut admin = AdminHeader::default();
        let mut tree = DeltaTree::new();

        let head_num = self.read_admin(&mut admin)?;
        let links = self.read_delta_list(&mut tree)?;
        self.link_deltas(&mut tree, head_num, links)?;
        self.read_desc(&mut admin)?;
        self.read_delta_texts(&mut tree)?;
        Ok((admin, tree))
    }

    // -- token helpers ----------------------------------------------------

    fn next_required(&mut self) -> StrataResult<Spanned> {
        self.sc
            .next()?
            .ok_or_else(|| self.sc.err("unexpected end of file"))
    }

    fn expect_word(&mut self, expected: &str) -> StrataResult<()> {
        let sp = self.next_required()?;
        match sp.tok {
            Token::Word(w) if w == expected => Ok(()),
            other => Err(self.sc.err(format!("expected `{expected}`, found {other:?}"))),
        }
    }

    fn expect_punct(&mut self, p: u8) -> StrataResult<()> {
        let sp = self.next_required()?;
        match sp.tok {
            Token::Punct(b) if b == p => Ok(()),
            other => Err(self
                .sc
                .err(format!("expected `{}`, found {other:?}", p as char))),
        }
    }

    fn expect_str(&mut self) -> StrataResult<String> {
        let sp = self.next_required()?;
        match sp.tok {
            Token::Str(s) => Ok(s),
            other => Err(self.sc.err(format!("expected string, found {other:?}"))),
        }
    }

    fn next_word(&mut self) -> StrataResult<String> {
        let sp = self.next_required()?;
        match sp.tok {
            Token::Word(w) => Ok(w),
            other => Err(self.sc.err(format!("expected word, found {other:?}"))),
        }
    }

    fn parse_num(&mut self, text: &str) -> StrataResult<RevNum> {
        self.interner.intern(text);
        RevNum::parse(text).map_err(|_| self.sc.err(format!("malformed number `{text}`")))
    }

    /// Optional number before a `;` terminator; consumes the `;`.
    fn opt_num_clause(&mut self) -> StrataResult<Option<RevNum>> {
        let sp = self.next_required()?;
        match sp.tok {
            Token::Punct(b';') => Ok(None),
            Token::Num(t) => {
                let num = self.parse_num(&t)?;
                self.expect_punct(b';')?;
                Ok(Some(num))
            }
            other => Err(self.sc.err(format!("expected number or `;`, found {other:?}"))),
        }
    }

    /// Capture an unrecognized clause verbatim, from the identifier that
    /// started it through its closing `;`.
    fn capture_phrase(&mut self, start: usize) -> StrataResult<String> {
        loop {
            let sp = self.next_required()?;
            if sp.tok == Token::Punct(b';') {
                return Ok(self.sc.slice(start, sp.end).to_string());
            }
        }
    }

    // -- admin header ------------------------------------------------------

    /// Returns the head revision number, resolved to a delta id later.
    fn read_admin(&mut self, admin: &mut AdminHeader) -> StrataResult<Option<RevNum>> {
        self.expect_word("head")?;
        let head_num = self.opt_num_clause()?;

        loop {
            let (tok, start) = match self.sc.peek()? {
                None => break,
                Some(sp) => (sp.tok.clone(), sp.start),
            };
            match tok {
                Token::Num(_) => break,
                Token::Word(w) if w == "desc" => break,
                Token::Word(w) if ADMIN_KEYWORDS.contains(&w.as_str()) => {
                    self.next_word()?;
                    self.read_admin_clause(admin, &w)?;
                }
                Token::Word(_) => {
                    let phrase = self.capture_phrase(start)?;
                    admin.phrases.push(phrase);
                }
                other => {
                    let msg = format!("unexpected {other:?} in admin header");
                    return Err(self.sc.err(msg));
                }
            }
        }
        Ok(head_num)
    }

    fn read_admin_clause(&mut self, admin: &mut AdminHeader, kw: &str) -> StrataResult<()> {
        match kw {
            "branch" => admin.default_branch = self.opt_num_clause()?,
            "access" => loop {
                let sp = self.next_required()?;
                match sp.tok {
                    Token::Punct(b';') => break,
                    Token::Word(w) => admin.access.push(w),
                    other => {
                        return Err(self.sc.err(format!("bad access entry: {other:?}")));
                    }
                }
            },
            "symbols" => loop {
                let sp = self.next_required()?;
                match sp.tok {
                    Token::Punct(b';') => break,
                    Token::Word(name) => {
                        self.expect_punct(b':')?;
                        let sp = self.next_required()?;
                        let Token::Num(t) = sp.tok else {
                            return Err(self.sc.err("expected number after symbol name"));
                        };
                        let rev = self.parse_num(&t)?;
                        admin.symbols.push(Symbol { name, rev });
                    }
                    other => {
                        return Err(self.sc.err(format!("bad symbol entry: {other:?}")));
                    }
                }
            },
            "locks" => loop {
                let sp = self.next_required()?;
                match sp.tok {
                    Token::Punct(b';') => break,
                    Token::Word(user) => {
                        self.expect_punct(b':')?;
                        let sp = self.next_required()?;
                        let Token::Num(t) = sp.tok else {
                            return Err(self.sc.err("expected number after lock holder"));
                        };
                        let rev = self.parse_num(&t)?;
                        if admin.find_lock(&rev).is_some() {
                            return Err(self.sc.err(format!("revision {rev} locked twice")));
                        }
                        admin.locks.push(Lock { user, rev });
                    }
                    other => {
                        return Err(self.sc.err(format!("bad lock entry: {other:?}")));
                    }
                }
            },
            "strict" => {
                admin.strict = true;
                self.expect_punct(b';')?;
            }
            "comment" => {
                admin.comment_leader = self.opt_str_clause()?;
            }
            "expand" => {
                admin.expand_mode = self.opt_str_clause()?;
            }
            _ => unreachable!("caller filters keywords"),
        }
        Ok(())
    }

    /// Optional string before a `;` terminator; consumes the `;`.
    fn opt_str_clause(&mut self) -> StrataResult<Option<String>> {
        let sp = self.next_required()?;
        match sp.tok {
            Token::Punct(b';') => Ok(None),
            Token::Str(s) => {
                self.expect_punct(b';')?;
                Ok(Some(s))
            }
            other => Err(self.sc.err(format!("expected string or `;`, found {other:?}"))),
        }
    }

    // -- delta list --------------------------------------------------------

    /// Parse delta headers until the next token is not a number.
    fn read_delta_list(&mut self, tree: &mut DeltaTree) -> StrataResult<Vec<PendingLinks>> {
        let mut links = Vec::new();
        loop {
            match self.sc.peek()? {
                Some(sp) if matches!(sp.tok, Token::Num(_)) => {}
                _ => break,
            }
            let sp = self.next_required()?;
            let Token::Num(rev_text) = sp.tok else {
                unreachable!("peeked a number");
            };
            let rev = self.parse_num(&rev_text)?;

            self.expect_word("date")?;
            let sp = self.next_required()?;
            let Token::Num(date) = sp.tok else {
                return Err(self.sc.err("expected date value"));
            };
            self.expect_punct(b';')?;

            self.expect_word("author")?;
            let author = self.next_word()?;
            self.expect_punct(b';')?;

            self.expect_word("state")?;
            let sp = self.next_required()?;
            let state = match sp.tok {
                Token::Punct(b';') => String::new(),
                Token::Word(w) => {
                    self.expect_punct(b';')?;
                    w
                }
                other => return Err(self.sc.err(format!("bad state: {other:?}"))),
            };

            self.expect_word("branches")?;
            let mut branches = Vec::new();
            loop {
                let sp = self.next_required()?;
                match sp.tok {
                    Token::Punct(b';') => break,
                    Token::Num(t) => {
                        self.parse_num(&t)?;
                        branches.push(t);
                    }
                    other => {
                        return Err(self.sc.err(format!("bad branches entry: {other:?}")));
                    }
                }
            }

            self.expect_word("next")?;
            let next = self.opt_num_clause()?.map(|n| n.to_string());

            let mut phrases = Vec::new();
            loop {
                let (tok, start) = match self.sc.peek()? {
                    None => break,
                    Some(sp) => (sp.tok.clone(), sp.start),
                };
                match tok {
                    Token::Num(_) => break,
                    Token::Word(w) if w == "desc" => break,
                    Token::Word(_) => {
                        let phrase = self.capture_phrase(start)?;
                        phrases.push(phrase);
                    }
                    other => {
                        let msg = format!("unexpected {other:?} after delta header");
                        return Err(self.sc.err(msg));
                    }
                }
            }

            let delta = Delta {
                rev: rev.clone(),
                date,
                author,
                state,
                branches: Vec::new(),
                next: None,
                log: String::new(),
                text: String::new(),
                phrases,
                text_phrases: Vec::new(),
            };
            let Some(id) = tree.insert(delta, self.interner) else {
                return Err(self.sc.err(format!("duplicate delta {rev}")));
            };
            links.push(PendingLinks {
                id,
                next,
                branches,
            });
        }
        Ok(links)
    }

    /// Resolve `next`/`branches` number references into arena ids and set
    /// the head pointer.
    fn link_deltas(
        &mut self,
        tree: &mut DeltaTree,
        head_num: Option<RevNum>,
        links: Vec<PendingLinks>,
    ) -> StrataResult<()> {
        match head_num {
            Some(num) => {
                let Some(id) = tree.find(&num) else {
                    return Err(self.sc.err(format!("head revision {num} has no delta")));
                };
                tree.head = Some(id);
            }
            None => {
                if !tree.is_empty() {
                    return Err(self.sc.err("store has deltas but no head"));
                }
            }
        }
        for pending in links {
            if let Some(next_text) = pending.next {
                let Some(next_id) = tree.find_text(&next_text) else {
                    return Err(self.sc.err(format!("next revision {next_text} has no delta")));
                };
                tree.get_mut(pending.id).next = Some(next_id);
            }
            for branch_text in pending.branches {
                let Some(branch_id) = tree.find_text(&branch_text) else {
                    return Err(self
                        .sc
                        .err(format!("branch revision {branch_text} has no delta")));
                };
                tree.get_mut(pending.id).branches.push(branch_id);
            }
        }
        Ok(())
    }

    fn read_desc(&mut self, admin: &mut AdminHeader) -> StrataResult<()> {
        self.expect_word("desc")?;
        admin.desc = self.expect_str()?;
        Ok(())
    }

    // -- delta texts -------------------------------------------------------

    /// Parse log + body for every delta, matching by number.
    fn read_delta_texts(&mut self, tree: &mut DeltaTree) -> StrataResult<()> {
        let mut seen: HashSet<DeltaId> = HashSet::new();
        loop {
            let Some(sp) = self.sc.next()? else { break };
            let Token::Num(rev_text) = sp.tok else {
                return Err(self
                    .sc
                    .err(format!("expected revision number, found {:?}", sp.tok)));
            };
            let Some(id) = tree.find_text(&rev_text) else {
                return Err(self
                    .sc
                    .err(format!("delta text for unknown revision {rev_text}")));
            };
            if !seen.insert(id) {
                return Err(self.sc.err(format!("duplicate delta text for {rev_text}")));
            }

            self.expect_word("log")?;
            let log = self.expect_str()?;

            let mut text_phrases = Vec::new();
            loop {
                let (tok, start) = match self.sc.peek()? {
                    None => return Err(self.sc.err("unexpected end of file in delta text")),
                    Some(sp) => (sp.tok.clone(), sp.start),
                };
                match tok {
                    Token::Word(w) if w == "text" => break,
                    Token::Word(_) => {
                        let phrase = self.capture_phrase(start)?;
                        text_phrases.push(phrase);
                    }
                    other => {
                        let msg = format!("unexpected {other:?} before `text`");
                        return Err(self.sc.err(msg));
                    }
                }
            }
            self.expect_word("text")?;
            let text = self.expect_str()?;

            let delta = tree.get_mut(id);
            delta.log = log;
            delta.text = text;
            delta.text_phrases = text_phrases;
        }
        if seen.len() != tree.len() {
            return Err(self
                .sc
                .err("mismatch between delta list and delta texts"));
        }
        Ok(())
    }
}

// -- writer ----------------------------------------------------------------

/// Emission order: trunk head→root, then each branch chain oldest→tip in
/// the order branches were encountered, recursively.
pub(crate) fn emit_order(tree: &DeltaTree) -> Vec<DeltaId> {
    let mut out = Vec::new();
    let mut queue: Vec<DeltaId> = Vec::new();
    for id in tree.trunk() {
        out.push(id);
        queue.extend(tree.get(id).branches.iter().copied());
    }
    let mut i = 0;
    while i < queue.len() {
        let oldest = queue[i];
        i += 1;
        for id in tree.branch_chain(oldest) {
            out.push(id);
            queue.extend(tree.get(id).branches.iter().copied());
        }
    }
    out
}

/// Serialize the whole store to its text form.
pub fn write_store(admin: &AdminHeader, tree: &DeltaTree) -> String {
    let mut out = String::new();

    match tree.head_delta() {
        Some(head) => out.push_str(&format!("head\t{};\n", head.rev)),
        None => out.push_str("head\t;\n"),
    }
    if let Some(branch) = &admin.default_branch {
        out.push_str(&format!("branch\t{branch};\n"));
    }
    out.push_str("access");
    for user in &admin.access {
        out.push_str(&format!("\n\t{user}"));
    }
    out.push_str(";\n");
    out.push_str("symbols");
    for sym in &admin.symbols {
        out.push_str(&format!("\n\t{}:{}", sym.name, sym.rev));
    }
    out.push_str(";\n");
    out.push_str("locks");
    for lock in &admin.locks {
        out.push_str(&format!("\n\t{}:{}", lock.user, lock.rev));
    }
    out.push(';');
    if admin.strict {
        out.push_str(" strict;");
    }
    out.push('\n');
    if let Some(comment) = &admin.comment_leader {
        out.push_str(&format!("comment\t@{}@;\n", escape(comment)));
    }
    if let Some(expand) = &admin.expand_mode {
        out.push_str(&format!("expand\t@{}@;\n", escape(expand)));
    }
    for phrase in &admin.phrases {
        out.push_str(phrase);
        out.push('\n');
    }

    let order = emit_order(tree);

    for &id in &order {
        let delta = tree.get(id);
        out.push_str(&format!(
            "\n\n{}\ndate\t{};\tauthor {};\tstate {};\n",
            delta.rev, delta.date, delta.author, delta.state
        ));
        out.push_str("branches");
        for &branch in &delta.branches {
            out.push_str(&format!("\n\t{}", tree.get(branch).rev));
        }
        out.push_str(";\n");
        match delta.next.map(|n| &tree.get(n).rev) {
            Some(next) => out.push_str(&format!("next\t{next};\n")),
            None => out.push_str("next\t;\n"),
        }
        for phrase in &delta.phrases {
            out.push_str(phrase);
            out.push('\n');
        }
    }

    out.push_str(&format!("\n\ndesc\n@{}@\n", escape(&admin.desc)));

    for &id in &order {
        let delta = tree.get(id);
        out.push_str(&format!(
            "\n\n{}\nlog\n@{}@\n",
            delta.rev,
            escape(&delta.log)
        ));
        for phrase in &delta.text_phrases {
            out.push_str(phrase);
            out.push('\n');
        }
        out.push_str(&format!("text\n@{}@\n", escape(&delta.text)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrataError;

    /// A two-revision trunk with one branch, in writer-canonical layout.
    pub(crate) fn sample_store() -> String {
        let src = "\
head\t1.2;
access;
symbols
\trelease:1.1;
locks
\tkay:1.2; strict;
comment\t@# @;

1.2
date\t2026.03.01.10.00.00;\tauthor kay;\tstate Exp;
branches;
next\t1.1;

1.1
date\t2026.02.01.09.00.00;\tauthor mel;\tstate Exp;
branches
\t1.1.1.1;
next\t;

1.1.1.1
date\t2026.02.15.12.00.00;\tauthor mel;\tstate Exp;
branches;
next\t;

desc
@demo store@

1.2
log
@second@
text
@line one
line two v2
@

1.1
log
@first@
text
@d2 1
a2 1
line two
@

1.1.1.1
log
@branch work@
text
@a2 1
branch line
@
";
        src.to_string()
    }

    #[test]
    fn test_read_admin_fields() {
        let mut interner = Interner::new();
        let (admin, tree) = read_store(&sample_store(), &mut interner).unwrap();
        assert!(admin.strict);
        assert_eq!(admin.comment_leader.as_deref(), Some("# "));
        assert_eq!(admin.symbols.len(), 1);
        assert_eq!(admin.symbols[0].name, "release");
        assert_eq!(admin.locks.len(), 1);
        assert_eq!(admin.locks[0].user, "kay");
        assert_eq!(admin.desc, "demo store");
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.head_delta().unwrap().rev.to_string(), "1.2");
    }

    #[test]
    fn test_tree_links() {
        let mut interner = Interner::new();
        let (_, tree) = read_store(&sample_store(), &mut interner).unwrap();
        let head = tree.head.unwrap();
        let root = tree.get(head).next.unwrap();
        assert_eq!(tree.get(root).rev.to_string(), "1.1");
        assert!(tree.get(root).next.is_none());
        assert_eq!(tree.get(root).branches.len(), 1);
        let branch = tree.get(root).branches[0];
        assert_eq!(tree.get(branch).rev.to_string(), "1.1.1.1");
    }

    #[test]
    fn test_roundtrip_is_stable() {
        let mut interner = Interner::new();
        let (admin, tree) = read_store(&sample_store(), &mut interner).unwrap();
        let once = write_store(&admin, &tree);
        let mut interner2 = Interner::new();
        let (admin2, tree2) = read_store(&once, &mut interner2).unwrap();
        let twice = write_store(&admin2, &tree2);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_phrases_roundtrip_verbatim() {
        let mut src = sample_store();
        src = src.replace(
            "comment\t@# @;\n",
            "comment\t@# @;\nnewgadget 4:2 @opaque @@ data@;\n",
        );
        let mut interner = Interner::new();
        let (admin, tree) = read_store(&src, &mut interner).unwrap();
        assert_eq!(admin.phrases.len(), 1);
        assert_eq!(admin.phrases[0], "newgadget 4:2 @opaque @@ data@;");
        let written = write_store(&admin, &tree);
        assert!(written.contains("newgadget 4:2 @opaque @@ data@;"));
    }

    #[test]
    fn test_missing_head_keyword_is_format_error() {
        let mut interner = Interner::new();
        let err = read_store("access;\n", &mut interner).unwrap_err();
        assert!(matches!(err, StrataError::Format { .. }));
    }

    #[test]
    fn test_unknown_next_reference_is_format_error() {
        let src = sample_store().replace("next\t1.1;", "next\t1.9;");
        let mut interner = Interner::new();
        let err = read_store(&src, &mut interner).unwrap_err();
        assert!(matches!(err, StrataError::Format { .. }));
    }

    #[test]
    fn test_text_for_unknown_delta_is_format_error() {
        let src = sample_store().replace("\n1.1.1.1\nlog", "\n1.1.9.9\nlog");
        let mut interner = Interner::new();
        let err = read_store(&src, &mut interner).unwrap_err();
        assert!(matches!(err, StrataError::Format { .. }));
    }

    #[test]
    fn test_format_error_carries_line() {
        // Unterminated string in the desc section.
        let src = "head\t;\naccess;\nsymbols;\nlocks;\n\ndesc\n@oops";
        let mut interner = Interner::new();
        match read_store(src, &mut interner) {
            Err(StrataError::Format { line, .. }) => assert!(line >= 6),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_store_roundtrip() {
        let src = "head\t;\naccess;\nsymbols;\nlocks;\n\ndesc\n@@\n";
        let mut interner = Interner::new();
        let (admin, tree) = read_store(src, &mut interner).unwrap();
        assert!(tree.is_empty());
        let written = write_store(&admin, &tree);
        let (_, tree2) = read_store(&written, &mut Interner::new()).unwrap();
        assert!(tree2.is_empty());
    }
}
