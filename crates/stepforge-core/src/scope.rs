//! Views of the generation run handed to guards, actions and hooks.

use crate::requirements::Requirements;
use crate::suite::{TestCase, TestSuite};
use rand::rngs::StdRng;

/// Read-only context for guard evaluation.
pub struct GuardScope<'a> {
    pub requirements: &'a Requirements,
    pub test: &'a TestCase,
    pub suite: &'a TestSuite,
}

/// Context for step actions and hooks.
///
/// Lifecycle hooks at suite level run outside any test, so `test()` is
/// `None` there. `step()` is set for pre, post and step actions only.
pub struct StepScope<'a> {
    requirements: &'a mut Requirements,
    rng: &'a mut StdRng,
    test: Option<&'a mut TestCase>,
    suite: &'a TestSuite,
    step: Option<&'a str>,
}

impl<'a> StepScope<'a> {
    pub(crate) fn new(
        requirements: &'a mut Requirements,
        rng: &'a mut StdRng,
        test: Option<&'a mut TestCase>,
        suite: &'a TestSuite,
        step: Option<&'a str>,
    ) -> Self {
        StepScope {
            requirements,
            rng,
            test,
            suite,
            step,
        }
    }

    /// Mark a requirement covered by the current test.
    pub fn cover(&mut self, tag: &str) {
        self.requirements.covered(tag);
        if let Some(test) = self.test.as_deref_mut() {
            test.record_requirement(tag);
        }
    }

    pub fn requirements(&self) -> &Requirements {
        &*self.requirements
    }

    /// The run's seeded generator. Draws made here are reproducible from the suite seed.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    pub fn test(&self) -> Option<&TestCase> {
        self.test.as_deref()
    }

    pub fn suite(&self) -> &TestSuite {
        self.suite
    }

    pub fn step(&self) -> Option<&str> {
        self.step
    }
}
