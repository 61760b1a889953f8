//! Walk data model: commits, the ordered walk, changed-file sets and the path filter.

use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

/// A commit as read from `git log`. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: String,
    pub short_id: String,
    pub subject: String,
    /// 1-based position within the walk.
    pub position: usize,
    /// First parent; empty for a root commit.
    pub parent: String,
}

/// Commits from `base` (exclusive) to the tip (inclusive), oldest first.
///
/// Every commit's parent is the previous commit's id; the first commit's parent is `base`.
#[derive(Debug, Clone)]
pub struct RevisionWalk {
    base: String,
    commits: Vec<Commit>,
}

impl RevisionWalk {
    /// Build a walk, checking the parent chain. Returns the offending position on a break.
    pub fn new(base: String, commits: Vec<Commit>) -> Result<Self, usize> {
        let mut expected = base.as_str();
        for (idx, c) in commits.iter().enumerate() {
            if c.parent != expected || c.position != idx + 1 {
                return Err(idx + 1);
            }
            expected = c.id.as_str();
        }
        Ok(Self { base, commits })
    }

    /// Walk with no commits (base and tip are the same commit).
    pub fn empty(base: String) -> Self {
        Self {
            base,
            commits: Vec::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Commit> {
        self.commits.iter()
    }

    pub fn tip(&self) -> &str {
        self.commits.last().map(|c| c.id.as_str()).unwrap_or(&self.base)
    }
}

impl<'a> IntoIterator for &'a RevisionWalk {
    type Item = &'a Commit;
    type IntoIter = std::slice::Iter<'a, Commit>;

    fn into_iter(self) -> Self::IntoIter {
        self.commits.iter()
    }
}

/// Relative paths that differ between two commits, sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedFileSet(BTreeSet<String>);

impl ChangedFileSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    pub fn filter(&self, pattern: &FilePattern) -> ChangedFileSet {
        self.0.iter().filter(|p| pattern.matches(p)).cloned().collect()
    }

    /// Keep only paths that exist below `root` (drops deletions after a checkout).
    pub fn present_in(&self, root: &Path) -> ChangedFileSet {
        self.0
            .iter()
            .filter(|p| root.join(p.as_str()).exists())
            .cloned()
            .collect()
    }
}

impl FromIterator<String> for ChangedFileSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        ChangedFileSet(iter.into_iter().collect())
    }
}

/// Regex matched against each changed path. No pattern matches every path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct FilePattern(Option<Regex>);

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.trim().is_empty() {
            return Ok(FilePattern(None));
        }
        Regex::new(pattern).map(|re| FilePattern(Some(re)))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.0.as_ref().map(|re| re.is_match(path)).unwrap_or(true)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_ref().map(Regex::as_str)
    }
}

impl TryFrom<String> for FilePattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FilePattern::new(&value)
    }
}
