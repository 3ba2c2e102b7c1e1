//! Lists of workspace-relative binaries handed to a strip tool.

use std::collections::HashSet;

/// Ordered, duplicate-free list of files to strip.
///
/// Blank lines are skipped and repeated entries keep their first position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripList {
    entries: Vec<String>,
}

impl StripList {
    pub fn parse(text: &str) -> Self {
        Self::from_entries(text.lines())
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().trim_start_matches("./").to_string())
            .filter(|entry| !entry.is_empty())
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
