//! Tokenizer for the store format, plus the revision-number interner.
//!
//! The store is plain text: bare words, dotted numbers, `@`-quoted strings
//! (an embedded `@` is doubled), and the punctuation `;` `:` `,`. The
//! scanner owns all lexing state for one file transaction and tracks the
//! current line for error reporting. Token spans index back into the source
//! so unrecognized phrases can be replayed byte-verbatim.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{StrataError, StrataResult};

/// One lexed token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A bare word: a keyword, author name, state label, or symbol.
    Word(String),
    /// A run of digits and dots.
    Num(String),
    /// An `@`-quoted string, already unescaped.
    Str(String),
    /// One of `;` `:` `,`.
    Punct(u8),
}

/// A token plus the byte span it was lexed from.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub start: usize,
    pub end: usize,
    pub tok: Token,
}

/// Lexer over one store file's text.
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    peeked: Option<Spanned>,
}

fn is_word_byte(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b';' | b':' | b',' | b'@')
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Scanner<'a> {
        Scanner {
            src,
            pos: 0,
            line: 1,
            peeked: None,
        }
    }

    /// Line number of the most recently consumed byte, 1-based.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Raw source between two byte offsets.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.src[start..end]
    }

    /// Build a format error at the current line.
    pub fn err(&self, msg: impl Into<String>) -> StrataError {
        StrataError::Format {
            line: self.line,
            msg: msg.into(),
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let b = *self.src.as_bytes().get(self.pos)?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&b) = self.src.as_bytes().get(self.pos) {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> StrataResult<Option<&Spanned>> {
        if self.peeked.is_none() {
            self.peeked = self.lex()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Consume and return the next token; `None` at end of input.
    pub fn next(&mut self) -> StrataResult<Option<Spanned>> {
        if let Some(t) = self.peeked.take() {
            return Ok(Some(t));
        }
        self.lex()
    }

    fn lex(&mut self) -> StrataResult<Option<Spanned>> {
        self.skip_whitespace();
        let start = self.pos;
        let b = match self.src.as_bytes().get(self.pos) {
            Some(&b) => b,
            None => return Ok(None),
        };
        let tok = match b {
            b';' | b':' | b',' => {
                self.bump();
                Token::Punct(b)
            }
            b'@' => Token::Str(self.lex_string()?),
            b'0'..=b'9' => {
                let mut end = self.pos;
                while matches!(self.src.as_bytes().get(end), Some(b'0'..=b'9') | Some(b'.')) {
                    end += 1;
                }
                let text = self.src[self.pos..end].to_string();
                while self.pos < end {
                    self.bump();
                }
                Token::Num(text)
            }
            _ => {
                let mut end = self.pos;
                while self
                    .src
                    .as_bytes()
                    .get(end)
                    .is_some_and(|&b| is_word_byte(b))
                {
                    end += 1;
                }
                let text = self.src[self.pos..end].to_string();
                while self.pos < end {
                    self.bump();
                }
                Token::Word(text)
            }
        };
        Ok(Some(Spanned {
            start,
            end: self.pos,
            tok,
        }))
    }

    /// Lex an `@`-quoted string starting at the current `@`. A doubled `@`
    /// inside the body stands for a literal `@`; a single `@` terminates.
    fn lex_string(&mut self) -> StrataResult<String> {
        self.bump(); // opening @
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'@') => {
                    if self.src.as_bytes().get(self.pos) == Some(&b'@') {
                        self.bump();
                        out.push('@');
                    } else {
                        return Ok(out);
                    }
                }
                Some(_) => {
                    // Push the whole UTF-8 character, not just the lead byte.
                    let ch_start = self.pos - 1;
                    let ch = self.src[ch_start..].chars().next().expect("in-bounds char");
                    for _ in 1..ch.len_utf8() {
                        self.bump();
                    }
                    out.push(ch);
                }
            }
        }
    }
}

/// Escape a string body for output: double every `@`.
pub fn escape(body: &str) -> String {
    body.replace('@', "@@")
}

/// Interner for revision-number text. Repeatedly referenced numbers
/// (`next`, `branches`, locks, symbols) share one allocation; capacity
/// grows with the table.
#[derive(Default)]
pub struct Interner {
    table: HashSet<Arc<str>>,
}

impl Interner {
    pub fn new() -> Interner {
        Interner::default()
    }

    /// Return the shared handle for `text`, inserting it if new.
    pub fn intern(&mut self, text: &str) -> Arc<str> {
        if let Some(existing) = self.table.get(text) {
            return existing.clone();
        }
        let handle: Arc<str> = Arc::from(text);
        self.table.insert(handle.clone());
        handle
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
