// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! A deliberately small query surface over the ordered keyspace.
//!
//! The operator RPC exposes `executeDBQuery`; rather than linking a SQL
//! engine into the kernel, we accept the one query shape that is actually
//! useful against a string KV map:
//!
//! ```text
//! SELECT key, value FROM kv [WHERE key LIKE '<prefix>%'] [LIMIT <n>]
//! ```
//!
//! Keywords are case-insensitive; the pattern is a single-quoted literal
//! with `%` allowed only as the final character.

use crate::{KVError, KVRead, KVResult};

/// One result row of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVRow {
    pub key: String,
    pub value: String,
}

/// A parsed `executeDBQuery` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVQuery {
    /// Key prefix to scan; empty means the whole keyspace.
    prefix: String,
    /// `true` if the pattern ended in `%`, `false` for an exact key match.
    wildcard: bool,
    limit: Option<usize>,
}

impl KVQuery {
    pub fn parse(query: &str) -> KVResult<Self> {
        let mut tokens = Tokens::new(query);

        tokens.keyword("SELECT")?;
        tokens.keyword("key")?;
        tokens.punct(',')?;
        tokens.keyword("value")?;
        tokens.keyword("FROM")?;
        tokens.keyword("kv")?;

        let mut parsed = KVQuery {
            prefix: String::new(),
            wildcard: true,
            limit: None,
        };

        if tokens.try_keyword("WHERE") {
            tokens.keyword("key")?;
            tokens.keyword("LIKE")?;
            let pattern = tokens.quoted()?;
            if let Some(prefix) = pattern.strip_suffix('%') {
                if prefix.contains('%') {
                    return Err(KVError::Query(
                        "'%' is only supported at the end of the pattern".into(),
                    ));
                }
                parsed.prefix = prefix.to_string();
                parsed.wildcard = true;
            } else {
                if pattern.contains('%') {
                    return Err(KVError::Query(
                        "'%' is only supported at the end of the pattern".into(),
                    ));
                }
                parsed.prefix = pattern;
                parsed.wildcard = false;
            }
        }

        if tokens.try_keyword("LIMIT") {
            let n = tokens.number()?;
            parsed.limit = Some(n);
        }

        tokens.end()?;

        Ok(parsed)
    }

    /// Run the query against a read transaction, returning rows in key order.
    pub fn execute<T: KVRead + ?Sized>(&self, tx: &T) -> KVResult<Vec<KVRow>> {
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut rows = Vec::new();

        if !self.wildcard {
            if let Some(value) = tx.get(&self.prefix)? {
                rows.push(KVRow {
                    key: self.prefix.clone(),
                    value,
                });
            }
            rows.truncate(limit);
            return Ok(rows);
        }

        if rows.len() < limit {
            if let Some(value) = tx.get(&self.prefix)? {
                rows.push(KVRow {
                    key: self.prefix.clone(),
                    value,
                });
            }
        }
        let mut cursor = self.prefix.clone();
        while rows.len() < limit {
            match tx.get_next_key(&cursor)? {
                Some(k) if k.starts_with(&self.prefix) => {
                    let value = tx.get(&k)?.unwrap_or_default();
                    rows.push(KVRow {
                        key: k.clone(),
                        value,
                    });
                    cursor = k;
                }
                _ => break,
            }
        }
        Ok(rows)
    }
}

/// Whitespace tokenizer for the query grammar.
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input.trim() }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        // Quoted literals may contain whitespace.
        if self.rest.starts_with('\'') {
            let end = self.rest[1..].find('\'')?;
            let (tok, rest) = self.rest.split_at(end + 2);
            self.rest = rest;
            return Some(tok);
        }
        let end = self
            .rest
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(self.rest.len());
        if end == 0 {
            // Leading punctuation, emit it alone.
            let (tok, rest) = self.rest.split_at(1);
            self.rest = rest;
            return Some(tok);
        }
        let (tok, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(tok)
    }

    fn peek_token(&self) -> Option<&'a str> {
        let mut copy = Tokens { rest: self.rest };
        copy.next_token()
    }

    fn keyword(&mut self, expected: &str) -> KVResult<()> {
        match self.next_token() {
            Some(tok) if tok.eq_ignore_ascii_case(expected) => Ok(()),
            Some(tok) => Err(KVError::Query(format!(
                "expected '{expected}', found '{tok}'"
            ))),
            None => Err(KVError::Query(format!(
                "expected '{expected}', found end of query"
            ))),
        }
    }

    fn try_keyword(&mut self, expected: &str) -> bool {
        match self.peek_token() {
            Some(tok) if tok.eq_ignore_ascii_case(expected) => {
                self.next_token();
                true
            }
            _ => false,
        }
    }

    fn punct(&mut self, expected: char) -> KVResult<()> {
        match self.next_token() {
            Some(tok) if tok.len() == 1 && tok.starts_with(expected) => Ok(()),
            other => Err(KVError::Query(format!(
                "expected '{expected}', found {other:?}"
            ))),
        }
    }

    fn quoted(&mut self) -> KVResult<String> {
        match self.next_token() {
            Some(tok) if tok.len() >= 2 && tok.starts_with('\'') && tok.ends_with('\'') => {
                Ok(tok[1..tok.len() - 1].to_string())
            }
            other => Err(KVError::Query(format!(
                "expected a quoted pattern, found {other:?}"
            ))),
        }
    }

    fn number(&mut self) -> KVResult<usize> {
        match self.next_token() {
            Some(tok) => tok
                .parse()
                .map_err(|_| KVError::Query(format!("expected a number, found '{tok}'"))),
            None => Err(KVError::Query("expected a number".into())),
        }
    }

    fn end(&mut self) -> KVResult<()> {
        match self.next_token() {
            None => Ok(()),
            Some(tok) => Err(KVError::Query(format!("unexpected trailing '{tok}'"))),
        }
    }
}
