//! Scenarios: per-step occurrence bounds that constrain generation.

use crate::suite::TestCase;
use serde::{Deserialize, Serialize};

/// Occurrence bounds for one step within a single test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    step: String,
    min: usize,
    max: usize,
}

impl Slice {
    pub fn new(step: impl Into<String>, min: usize, max: usize) -> Self {
        Slice {
            step: step.into(),
            min,
            max,
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// A set of slices. In strict mode, steps without a slice may not run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    slices: Vec<Slice>,
    strict: bool,
}

impl Scenario {
    pub fn new(strict: bool) -> Self {
        Scenario {
            slices: Vec::new(),
            strict,
        }
    }

    /// Exact slices for every step of `test`: each step must occur exactly as
    /// often as it did there, ordered by first occurrence. Strict.
    pub fn from_test(test: &TestCase) -> Self {
        let mut scenario = Scenario::new(true);
        for (step, count) in test.step_counts() {
            scenario.slices.push(Slice::new(step, count, count));
        }
        scenario
    }

    /// Drop every lower bound, keeping the upper ones.
    #[must_use]
    pub fn relaxed(mut self) -> Self {
        for slice in &mut self.slices {
            slice.min = 0;
        }
        self
    }

    /// Add or replace the slice for a step.
    #[must_use]
    pub fn with_slice(mut self, slice: Slice) -> Self {
        self.add_slice(slice);
        self
    }

    pub fn add_slice(&mut self, slice: Slice) {
        match self.slices.iter_mut().find(|s| s.step == slice.step) {
            Some(existing) => *existing = slice,
            None => self.slices.push(slice),
        }
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn slice(&self, step: &str) -> Option<&Slice> {
        self.slices.iter().find(|s| s.step == step)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether `step` may run again after `count` executions in the current test.
    pub fn allows(&self, step: &str, count: usize) -> bool {
        match self.slice(step) {
            Some(slice) => count < slice.max,
            None => !self.strict,
        }
    }

    /// Whether every lower bound holds for `test`.
    pub fn minimums_met(&self, test: &TestCase) -> bool {
        self.slices
            .iter()
            .all(|slice| slice.min == 0 || test.count(&slice.step) >= slice.min)
    }

    pub fn validate(&self) -> Result<(), String> {
        for slice in &self.slices {
            if slice.min > slice.max {
                return Err(format!(
                    "slice '{}' has min {} above max {}",
                    slice.step, slice.min, slice.max
                ));
            }
        }
        Ok(())
    }
}
