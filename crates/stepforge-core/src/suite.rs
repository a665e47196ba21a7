//! Test case and suite records produced by generation.
//!
//! Records are append-only while running and sealed when they end. A sealed
//! test rejects further steps; its status can still change if an after-test
//! hook fails.

use crate::error::{GenResult, GenerationError};
use crate::model::Phase;
use crate::requirements::Requirements;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    #[default]
    NotStarted,
    Running,
    Ended,
}

/// Outcome of a single generated test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    #[default]
    Passed,
    /// The test hit a dead end before its end condition held.
    Incomplete,
    Errored,
}

/// Where and why a test failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub phase: Phase,
    pub target: String,
    pub message: String,
}

impl TestFailure {
    pub(crate) fn from_error(error: &GenerationError, fallback_target: &str) -> Self {
        match error.root_cause() {
            GenerationError::Invocation {
                phase,
                target,
                source,
            } => TestFailure {
                phase: *phase,
                target: target.clone(),
                message: source.to_string(),
            },
            other => TestFailure {
                phase: Phase::Step,
                target: fallback_target.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether two failures happened at the same invocation point.
    pub fn same_site(&self, other: &TestFailure) -> bool {
        self.phase == other.phase && self.target == other.target
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseStep {
    pub name: String,
    /// State label recorded after the action ran.
    pub state: Option<String>,
    /// Position within the test, starting at 0.
    pub index: usize,
    pub timestamp: SystemTime,
    /// Named coverage values recorded after the action ran.
    pub values: BTreeMap<String, String>,
}

impl TestCaseStep {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        TestCaseStep {
            name: name.into(),
            state: None,
            index,
            timestamp: SystemTime::now(),
            values: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    id: usize,
    steps: Vec<TestCaseStep>,
    lifecycle: Lifecycle,
    status: TestStatus,
    failure: Option<TestFailure>,
    requirements: Vec<String>,
}

impl TestCase {
    pub fn new(id: usize) -> Self {
        TestCase {
            id,
            steps: Vec::new(),
            lifecycle: Lifecycle::NotStarted,
            status: TestStatus::Passed,
            failure: None,
            requirements: Vec::new(),
        }
    }

    /// Build a sealed test from a list of step names.
    pub fn from_steps<I, S>(id: usize, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut test = TestCase::new(id);
        test.steps = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| TestCaseStep::new(name, index))
            .collect();
        test.lifecycle = Lifecycle::Ended;
        test
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn steps(&self) -> &[TestCaseStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// The most recently executed step.
    pub fn last_step(&self) -> Option<&TestCaseStep> {
        self.steps.last()
    }

    /// Executions of each step, in first-execution order.
    pub fn step_counts(&self) -> IndexMap<String, usize> {
        let mut counts = IndexMap::new();
        for step in &self.steps {
            *counts.entry(step.name.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Executions of one step.
    pub fn count(&self, name: &str) -> usize {
        self.steps.iter().filter(|s| s.name == name).count()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_sealed(&self) -> bool {
        self.lifecycle == Lifecycle::Ended
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn is_errored(&self) -> bool {
        self.status == TestStatus::Errored
    }

    pub fn failure(&self) -> Option<&TestFailure> {
        self.failure.as_ref()
    }

    /// Requirement tags covered while this test ran, in first-cover order.
    pub fn covered_requirements(&self) -> &[String] {
        &self.requirements
    }

    /// Append a step record. Fails once the test is sealed.
    pub fn add_step(&mut self, step: TestCaseStep) -> GenResult<()> {
        if self.is_sealed() {
            return Err(GenerationError::SealedTest { test_id: self.id });
        }
        self.steps.push(step);
        Ok(())
    }

    pub(crate) fn start(&mut self) {
        self.lifecycle = Lifecycle::Running;
    }

    pub(crate) fn seal(&mut self) {
        self.lifecycle = Lifecycle::Ended;
    }

    pub(crate) fn record_requirement(&mut self, tag: &str) {
        if !self.requirements.iter().any(|t| t == tag) {
            self.requirements.push(tag.to_string());
        }
    }

    pub(crate) fn mark_incomplete(&mut self) {
        if self.status == TestStatus::Passed {
            self.status = TestStatus::Incomplete;
        }
    }

    /// Keeps the first failure if the test fails more than once.
    pub(crate) fn mark_errored(&mut self, failure: TestFailure) {
        self.status = TestStatus::Errored;
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    seed: u64,
    tests: Vec<TestCase>,
    lifecycle: Lifecycle,
    listeners: Vec<String>,
    requirements: Requirements,
}

impl TestSuite {
    pub fn new(seed: u64) -> Self {
        TestSuite {
            seed,
            tests: Vec::new(),
            lifecycle: Lifecycle::NotStarted,
            listeners: Vec::new(),
            requirements: Requirements::new(),
        }
    }

    /// Build a sealed suite holding a subset of this suite's tests.
    ///
    /// Declared requirements are carried over; coverage is rebuilt from the
    /// tags recorded on the given tests.
    pub fn subset(&self, tests: Vec<TestCase>) -> TestSuite {
        let mut requirements = Requirements::with_declared(self.requirements.declared_set().iter().cloned());
        for test in &tests {
            for tag in test.covered_requirements() {
                requirements.covered(tag.as_str());
            }
            requirements.clear_coverage();
        }
        TestSuite {
            seed: self.seed,
            tests,
            lifecycle: Lifecycle::Ended,
            listeners: self.listeners.clone(),
            requirements,
        }
    }

    /// Seed the suite was generated from; re-running with it reproduces the suite.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn into_tests(self) -> Vec<TestCase> {
        self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn last_test(&self) -> Option<&TestCase> {
        self.tests.last()
    }

    pub fn total_steps(&self) -> usize {
        self.tests.iter().map(TestCase::len).sum()
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestCase> + '_ {
        self.tests.iter().filter(|t| t.is_errored())
    }

    /// Requirement tracker snapshot taken when the suite ended.
    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Names of the listeners attached during generation.
    pub fn listener_names(&self) -> &[String] {
        &self.listeners
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_sealed(&self) -> bool {
        self.lifecycle == Lifecycle::Ended
    }

    pub(crate) fn start(&mut self, listeners: Vec<String>) {
        self.listeners = listeners;
        self.lifecycle = Lifecycle::Running;
    }

    pub(crate) fn push_test(&mut self, test: TestCase) -> GenResult<()> {
        if self.is_sealed() {
            return Err(GenerationError::SealedTest { test_id: test.id() });
        }
        self.tests.push(test);
        Ok(())
    }

    pub(crate) fn seal(&mut self, requirements: Requirements) {
        self.requirements = requirements;
        self.lifecycle = Lifecycle::Ended;
    }
}
