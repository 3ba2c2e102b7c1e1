//! rsync-style wildcard patterns.
//!
//! A pattern is matched against a workspace-relative path using `/` as the
//! separator:
//!
//! - `*` matches any run of characters except `/`
//! - `?` matches one character except `/`
//! - `[...]` matches one character from a class (`[!...]` or `[^...]` negates)
//! - `**` matches any run of characters, `/` included
//! - `\` escapes the next character
//!
//! A leading `/` anchors the pattern at the root of the tree and a trailing
//! `/` restricts it to directories. An unanchored pattern that contains a `/`
//! or a `**` is tried against the whole path and against every trailing run of
//! whole components; any other pattern is only tried against the final
//! component.

use std::fmt;

use thiserror::Error;

/// Errors raised while compiling a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("unterminated character class in pattern '{0}'")]
    UnterminatedClass(String),
    #[error("dangling escape at end of pattern '{0}'")]
    DanglingEscape(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Anchored,
    Tail,
    Basename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    DoubleStar,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

/// A compiled selection pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    scope: Scope,
    dir_only: bool,
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn new(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        let anchored = raw.starts_with('/');
        let mut body = raw.trim_start_matches('/');
        let dir_only = body.len() > 1 && body.ends_with('/');
        if dir_only {
            body = body.trim_end_matches('/');
        }
        if body.is_empty() {
            return Err(PatternError::Empty);
        }

        let scope = if anchored {
            Scope::Anchored
        } else if body.contains('/') || body.contains("**") {
            Scope::Tail
        } else {
            Scope::Basename
        };

        Ok(Self {
            raw: raw.to_string(),
            scope,
            dir_only,
            tokens: tokenize(body, raw)?,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern only applies to directories.
    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    /// Test a normalized relative path (no leading or trailing `/`).
    pub fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        match self.scope {
            Scope::Anchored => wildmatch(&self.tokens, path),
            Scope::Basename => {
                let name = path.rsplit('/').next().unwrap_or(path);
                wildmatch(&self.tokens, name)
            }
            Scope::Tail => {
                if wildmatch(&self.tokens, path) {
                    return true;
                }
                path.match_indices('/')
                    .any(|(idx, _)| wildmatch(&self.tokens, &path[idx + 1..]))
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn tokenize(body: &str, raw: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    tokens.push(Token::DoubleStar);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '?' => tokens.push(Token::AnyChar),
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(Token::Literal(escaped)),
                None => return Err(PatternError::DanglingEscape(raw.to_string())),
            },
            '[' => {
                let mut negated = false;
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    negated = true;
                    chars.next();
                }
                let mut items = Vec::new();
                let mut closed = false;
                let mut first = true;
                while let Some(member) = chars.next() {
                    if member == ']' && !first {
                        closed = true;
                        break;
                    }
                    first = false;
                    if chars.peek() == Some(&'-') {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        match lookahead.peek() {
                            Some(&end) if end != ']' => {
                                chars.next();
                                chars.next();
                                items.push(ClassItem::Range(member, end));
                                continue;
                            }
                            _ => {}
                        }
                    }
                    items.push(ClassItem::Single(member));
                }
                if !closed {
                    return Err(PatternError::UnterminatedClass(raw.to_string()));
                }
                tokens.push(Token::Class { negated, items });
            }
            other => tokens.push(Token::Literal(other)),
        }
    }

    Ok(tokens)
}

fn class_contains(items: &[ClassItem], c: char) -> bool {
    items.iter().any(|item| match *item {
        ClassItem::Single(s) => s == c,
        ClassItem::Range(lo, hi) => lo <= c && c <= hi,
    })
}

/// Table-driven wildcard match: `dp[i][j]` holds whether `tokens[i..]`
/// matches `text[j..]`.
fn wildmatch(tokens: &[Token], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let n = tokens.len();
    let m = text.len();
    let width = m + 1;
    let mut dp = vec![false; (n + 1) * width];
    dp[n * width + m] = true;

    for i in (0..n).rev() {
        for j in (0..=m).rev() {
            let next = text.get(j).copied();
            let step = || dp[(i + 1) * width + j + 1];
            let matched = match &tokens[i] {
                Token::Literal(c) => next == Some(*c) && step(),
                Token::AnyChar => matches!(next, Some(c) if c != '/') && step(),
                Token::Class { negated, items } => match next {
                    Some(c) if c != '/' => class_contains(items, c) != *negated && step(),
                    _ => false,
                },
                Token::Star => {
                    dp[(i + 1) * width + j]
                        || (matches!(next, Some(c) if c != '/') && dp[i * width + j + 1])
                }
                Token::DoubleStar => {
                    dp[(i + 1) * width + j] || (next.is_some() && dp[i * width + j + 1])
                }
            };
            dp[i * width + j] = matched;
        }
    }

    dp[0]
}
