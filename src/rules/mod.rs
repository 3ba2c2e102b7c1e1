//! Ordered include/exclude selection rules.
//!
//! A [`RuleSet`] is evaluated in declaration order and the first rule whose
//! pattern matches decides. Paths that no rule matches are excluded. A path
//! is only selected when every ancestor directory is selected too, since an
//! excluded directory is never descended into.
//!
//! Rule text uses the rsync filter-file syntax:
//!
//! ```text
//! # comments and blank lines are ignored
//! + lib
//! - lib/*.a
//! + lib/**
//! - **
//! ```
//!
//! Order is load-bearing: later lines carve exceptions out of earlier broad
//! ones, so rules are never sorted or deduplicated.

pub mod pattern;
pub mod strip_list;

use std::fmt;

use thiserror::Error;

pub use pattern::{Pattern, PatternError};
pub use strip_list::StripList;

/// Outcome of evaluating a path against a rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Include,
    Exclude,
}

/// One include or exclude rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionRule {
    Include(Pattern),
    Exclude(Pattern),
}

impl SelectionRule {
    pub fn include(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self::Include(Pattern::new(pattern)?))
    }

    pub fn exclude(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self::Exclude(Pattern::new(pattern)?))
    }

    pub fn pattern(&self) -> &Pattern {
        match self {
            Self::Include(p) | Self::Exclude(p) => p,
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            Self::Include(_) => Decision::Include,
            Self::Exclude(_) => Decision::Exclude,
        }
    }
}

impl fmt::Display for SelectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include(p) => write!(f, "+ {p}"),
            Self::Exclude(p) => write!(f, "- {p}"),
        }
    }
}

/// Errors raised while parsing rule text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("line {line}: expected '+ <pattern>' or '- <pattern>', got '{text}'")]
    MissingSign { line: usize, text: String },
    #[error("line {line}: {source}")]
    BadPattern {
        line: usize,
        #[source]
        source: PatternError,
    },
}

/// Why a path was selected or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The rule at `index` (zero-based declaration order) matched the path.
    Rule { index: usize, rule: String },
    /// No rule matched; excluded by default.
    NoMatch,
    /// An ancestor directory was rejected, so the path is never reached.
    ExcludedAncestor { ancestor: String },
}

/// Full evaluation result for a path, used by the `explain` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    pub path: String,
    pub decision: Decision,
    pub reason: Reason,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.decision {
            Decision::Include => "include",
            Decision::Exclude => "exclude",
        };
        match &self.reason {
            Reason::Rule { index, rule } => {
                write!(f, "{verdict} {} (rule #{}: {rule})", self.path, index + 1)
            }
            Reason::NoMatch => write!(f, "{verdict} {} (no rule matched)", self.path),
            Reason::ExcludedAncestor { ancestor } => {
                write!(f, "{verdict} {} (ancestor '{ancestor}' excluded)", self.path)
            }
        }
    }
}

/// An ordered, immutable list of selection rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<SelectionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<SelectionRule>) -> Self {
        Self { rules }
    }

    /// Parse rsync filter-file text.
    ///
    /// Accepts `+ pattern`, `- pattern`, `include pattern` and
    /// `exclude pattern`; `#` comments and blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, RuleParseError> {
        let mut rules = Vec::new();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_no = idx + 1;
            let (sign, pattern) = split_sign(line).ok_or_else(|| RuleParseError::MissingSign {
                line: line_no,
                text: line.to_string(),
            })?;
            let pattern = Pattern::new(pattern).map_err(|source| RuleParseError::BadPattern {
                line: line_no,
                source,
            })?;
            rules.push(match sign {
                Decision::Include => SelectionRule::Include(pattern),
                Decision::Exclude => SelectionRule::Exclude(pattern),
            });
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[SelectionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching `path` itself, ignoring ancestors.
    pub fn first_match(&self, path: &str, is_dir: bool) -> Option<(usize, &SelectionRule)> {
        let path = normalize(path);
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.pattern().matches(path, is_dir))
    }

    /// Decision for `path` alone. Walkers that never descend into rejected
    /// directories can use this directly.
    pub fn decide(&self, path: &str, is_dir: bool) -> Decision {
        self.first_match(path, is_dir)
            .map(|(_, rule)| rule.decision())
            .unwrap_or(Decision::Exclude)
    }

    /// Whether `path` ends up in the mirrored tree, ancestors included.
    pub fn is_selected(&self, path: &str, is_dir: bool) -> bool {
        self.explain(path, is_dir).decision == Decision::Include
    }

    pub fn explain(&self, path: &str, is_dir: bool) -> Explanation {
        let path = normalize(path);

        for (idx, _) in path.match_indices('/') {
            let ancestor = &path[..idx];
            if self.decide(ancestor, true) == Decision::Exclude {
                return Explanation {
                    path: path.to_string(),
                    decision: Decision::Exclude,
                    reason: Reason::ExcludedAncestor {
                        ancestor: ancestor.to_string(),
                    },
                };
            }
        }

        match self.first_match(path, is_dir) {
            Some((index, rule)) => Explanation {
                path: path.to_string(),
                decision: rule.decision(),
                reason: Reason::Rule {
                    index,
                    rule: rule.to_string(),
                },
            },
            None => Explanation {
                path: path.to_string(),
                decision: Decision::Exclude,
                reason: Reason::NoMatch,
            },
        }
    }

    /// Render as filter-file text for `rsync --include-from`.
    ///
    /// rsync includes unmatched paths by default, so a closing `- **` is
    /// appended to keep the default-exclude behaviour.
    pub fn to_filter_text(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            out.push_str(&rule.to_string());
            out.push('\n');
        }
        out.push_str("- **\n");
        out
    }
}

fn split_sign(line: &str) -> Option<(Decision, &str)> {
    let candidates = [
        ("+ ", Decision::Include),
        ("- ", Decision::Exclude),
        ("include ", Decision::Include),
        ("exclude ", Decision::Exclude),
    ];
    candidates.iter().find_map(|(prefix, decision)| {
        line.strip_prefix(prefix)
            .map(|rest| (*decision, rest.trim()))
            .filter(|(_, rest)| !rest.is_empty())
    })
}

fn normalize(path: &str) -> &str {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.trim_matches('/')
}
