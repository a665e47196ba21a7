//! Coverage measurement and suite scoring.

use crate::suite::{TestCase, TestSuite};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// What a set of tests covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestCoverage {
    steps: IndexMap<String, usize>,
    step_pairs: IndexSet<(String, String)>,
    requirements: IndexSet<String>,
    states: IndexSet<String>,
    state_pairs: IndexSet<(String, String)>,
    values: IndexMap<String, IndexSet<String>>,
    total_steps: usize,
    tests: usize,
}

impl TestCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_suite(suite: &TestSuite) -> Self {
        Self::from_tests(suite.tests())
    }

    pub fn from_tests<'a>(tests: impl IntoIterator<Item = &'a TestCase>) -> Self {
        let mut coverage = Self::new();
        for test in tests {
            coverage.add_test(test);
        }
        coverage
    }

    pub fn add_test(&mut self, test: &TestCase) {
        self.tests += 1;
        self.total_steps += test.len();
        for tag in test.covered_requirements() {
            self.requirements.insert(tag.clone());
        }
        let mut previous: Option<(&str, Option<&str>)> = None;
        for step in test.steps() {
            *self.steps.entry(step.name.clone()).or_insert(0) += 1;
            if let Some(state) = &step.state {
                self.states.insert(state.clone());
            }
            for (name, value) in &step.values {
                self.values
                    .entry(name.clone())
                    .or_default()
                    .insert(value.clone());
            }
            if let Some((prev_name, prev_state)) = previous {
                self.step_pairs
                    .insert((prev_name.to_string(), step.name.clone()));
                if let (Some(from), Some(to)) = (prev_state, step.state.as_deref()) {
                    self.state_pairs.insert((from.to_string(), to.to_string()));
                }
            }
            previous = Some((step.name.as_str(), step.state.as_deref()));
        }
    }

    /// Distinct steps executed.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Executions per step, in first-execution order.
    pub fn steps(&self) -> &IndexMap<String, usize> {
        &self.steps
    }

    pub fn step_pairs(&self) -> &IndexSet<(String, String)> {
        &self.step_pairs
    }

    pub fn requirements(&self) -> &IndexSet<String> {
        &self.requirements
    }

    pub fn states(&self) -> &IndexSet<String> {
        &self.states
    }

    pub fn state_pairs(&self) -> &IndexSet<(String, String)> {
        &self.state_pairs
    }

    pub fn values(&self) -> &IndexMap<String, IndexSet<String>> {
        &self.values
    }

    /// Distinct (name, value) observations.
    pub fn value_count(&self) -> usize {
        self.values.values().map(IndexSet::len).sum()
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn tests(&self) -> usize {
        self.tests
    }
}

/// Maps a suite to a number. Higher is better.
pub trait ScoreFunction: Send + Sync {
    fn score(&self, suite: &TestSuite) -> f64;
}

impl<F> ScoreFunction for F
where
    F: Fn(&TestSuite) -> f64 + Send + Sync,
{
    fn score(&self, suite: &TestSuite) -> f64 {
        self(suite)
    }
}

/// Weights for [`CoverageScore`]. A negative length weight rewards shorter suites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub length_weight: f64,
    pub step_weight: f64,
    pub step_pair_weight: f64,
    pub requirement_weight: f64,
    pub state_weight: f64,
    pub state_pair_weight: f64,
    pub value_weight: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        ScoreConfig {
            length_weight: 0.0,
            step_weight: 1.0,
            step_pair_weight: 1.0,
            requirement_weight: 1.0,
            state_weight: 1.0,
            state_pair_weight: 1.0,
            value_weight: 1.0,
        }
    }
}

/// Weighted sum of distinct coverage counts.
#[derive(Debug, Clone, Default)]
pub struct CoverageScore {
    pub config: ScoreConfig,
}

impl CoverageScore {
    pub fn new(config: ScoreConfig) -> Self {
        CoverageScore { config }
    }

    pub fn score_coverage(&self, coverage: &TestCoverage) -> f64 {
        let c = &self.config;
        c.length_weight * coverage.total_steps() as f64
            + c.step_weight * coverage.step_count() as f64
            + c.step_pair_weight * coverage.step_pairs().len() as f64
            + c.requirement_weight * coverage.requirements().len() as f64
            + c.state_weight * coverage.states().len() as f64
            + c.state_pair_weight * coverage.state_pairs().len() as f64
            + c.value_weight * coverage.value_count() as f64
    }
}

impl ScoreFunction for CoverageScore {
    fn score(&self, suite: &TestSuite) -> f64 {
        self.score_coverage(&TestCoverage::of_suite(suite))
    }
}
