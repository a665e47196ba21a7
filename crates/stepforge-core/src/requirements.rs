//! Requirement declaration and coverage tracking.
//!
//! A tracker holds three views of the same tags: the declared set, the tags
//! covered by the test in progress, and the suite-lifetime coverage multiset.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    declared: IndexSet<String>,
    current: IndexSet<String>,
    coverage: IndexMap<String, usize>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker with the given declared tags and no coverage.
    pub fn with_declared<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut requirements = Self::new();
        for tag in tags {
            requirements.add(tag);
        }
        requirements
    }

    /// Declare a tag. Declaring the same tag twice is a no-op.
    pub fn add(&mut self, tag: impl Into<String>) {
        self.declared.insert(tag.into());
    }

    /// Mark a tag covered by the current test.
    ///
    /// Undeclared tags are accepted and show up in [`Requirements::excess`].
    /// Returns true when the tag was not yet covered in the current test.
    pub fn covered(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        *self.coverage.entry(tag.clone()).or_insert(0) += 1;
        self.current.insert(tag)
    }

    /// Whether the tag is covered by the current test.
    pub fn is_covered(&self, tag: &str) -> bool {
        self.current.contains(tag)
    }

    /// Whether the tag has been covered anywhere in the suite so far.
    pub fn is_covered_in_suite(&self, tag: &str) -> bool {
        self.coverage.contains_key(tag)
    }

    /// Forget per-test coverage. Suite-lifetime coverage is kept.
    pub fn clear_coverage(&mut self) {
        self.current.clear();
    }

    /// Tags covered by the current test, in first-cover order.
    pub fn current_coverage(&self) -> impl Iterator<Item = &str> + '_ {
        self.current.iter().map(String::as_str)
    }

    /// Distinct tags covered across the suite, in first-cover order.
    pub fn unique_coverage(&self) -> Vec<&str> {
        self.coverage.keys().map(String::as_str).collect()
    }

    /// Number of times a tag was marked covered across the suite.
    pub fn coverage_count(&self, tag: &str) -> usize {
        self.coverage.get(tag).copied().unwrap_or(0)
    }

    pub fn declared_requirements(&self) -> Vec<&str> {
        self.declared.iter().map(String::as_str).collect()
    }

    /// Covered tags that were never declared.
    pub fn excess(&self) -> Vec<&str> {
        self.coverage
            .keys()
            .filter(|tag| !self.declared.contains(*tag))
            .map(String::as_str)
            .collect()
    }

    /// Declared tags that were never covered.
    pub fn missing(&self) -> Vec<&str> {
        self.declared
            .iter()
            .filter(|tag| !self.coverage.contains_key(*tag))
            .map(String::as_str)
            .collect()
    }

    /// Whether every declared tag is covered by the current test.
    pub fn all_covered(&self) -> bool {
        self.declared.iter().all(|tag| self.current.contains(tag))
    }

    /// Whether every declared tag is covered somewhere in the suite.
    pub fn all_covered_in_suite(&self) -> bool {
        self.missing().is_empty()
    }

    pub(crate) fn declared_set(&self) -> &IndexSet<String> {
        &self.declared
    }
}
