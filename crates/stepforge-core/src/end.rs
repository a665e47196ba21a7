//! End conditions for tests and suites.
//!
//! The same condition type serves both scopes. Length counts steps when it
//! ends a test and tests when it ends a suite; requirement conditions look at
//! the current test's coverage or the suite-lifetime coverage likewise.
//! Conditions are stateless, so a configuration can be reused across runs.

use crate::requirements::Requirements;
use crate::suite::{TestCase, TestSuite};
use rand::rngs::StdRng;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndScope {
    Test,
    Suite,
}

/// What an end condition can observe.
pub struct EndContext<'a> {
    pub scope: EndScope,
    pub suite: &'a TestSuite,
    /// The test in progress (test scope) or the last finished test (suite scope).
    pub test: Option<&'a TestCase>,
    pub requirements: &'a Requirements,
    /// Time since the current test (test scope) or suite (suite scope) started.
    pub elapsed: Duration,
    pub(crate) rng: &'a mut StdRng,
}

impl<'a> EndContext<'a> {
    pub fn new(
        scope: EndScope,
        suite: &'a TestSuite,
        test: Option<&'a TestCase>,
        requirements: &'a Requirements,
        elapsed: Duration,
        rng: &'a mut StdRng,
    ) -> Self {
        EndContext {
            scope,
            suite,
            test,
            requirements,
            elapsed,
            rng,
        }
    }

    /// Steps of the current test, or tests of the suite.
    pub fn units(&self) -> usize {
        match self.scope {
            EndScope::Test => self.test.map_or(0, TestCase::len),
            EndScope::Suite => self.suite.len(),
        }
    }
}

pub type CustomEndFn = Arc<dyn Fn(&EndContext<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum EndCondition {
    /// At least this many units.
    Length(usize),
    /// Holds with this probability on each check, drawn from the run's generator.
    Probability(f64),
    /// The tag is covered.
    Requirement(String),
    /// Every declared tag is covered. Holds trivially when none are declared.
    AllRequirements,
    /// Wall-clock time since the scope started.
    Elapsed(Duration),
    /// Never holds.
    Endless,
    /// Every inner condition holds. Evaluation stops at the first that does not.
    And(Vec<EndCondition>),
    /// Any inner condition holds. Evaluation stops at the first that does.
    Or(Vec<EndCondition>),
    Custom(CustomEndFn),
}

impl EndCondition {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&EndContext<'_>) -> bool + Send + Sync + 'static,
    {
        EndCondition::Custom(Arc::new(f))
    }

    #[must_use]
    pub fn and(self, other: EndCondition) -> Self {
        match self {
            EndCondition::And(mut all) => {
                all.push(other);
                EndCondition::And(all)
            }
            first => EndCondition::And(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: EndCondition) -> Self {
        match self {
            EndCondition::Or(mut any) => {
                any.push(other);
                EndCondition::Or(any)
            }
            first => EndCondition::Or(vec![first, other]),
        }
    }

    pub fn is_met(&self, ctx: &mut EndContext<'_>) -> bool {
        match self {
            EndCondition::Length(n) => ctx.units() >= *n,
            EndCondition::Probability(p) => ctx.rng.gen_bool(*p),
            EndCondition::Requirement(tag) => match ctx.scope {
                EndScope::Test => ctx.requirements.is_covered(tag),
                EndScope::Suite => ctx.requirements.is_covered_in_suite(tag),
            },
            EndCondition::AllRequirements => match ctx.scope {
                EndScope::Test => ctx.requirements.all_covered(),
                EndScope::Suite => ctx.requirements.all_covered_in_suite(),
            },
            EndCondition::Elapsed(limit) => ctx.elapsed >= *limit,
            EndCondition::Endless => false,
            EndCondition::And(all) => all.iter().all(|c| c.is_met(ctx)),
            EndCondition::Or(any) => any.iter().any(|c| c.is_met(ctx)),
            EndCondition::Custom(f) => f(&*ctx),
        }
    }

    /// Check parameters that would otherwise fail at evaluation time.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            EndCondition::Probability(p) if !(0.0..=1.0).contains(p) => {
                Err(format!("probability {} is outside [0, 1]", p))
            }
            EndCondition::And(inner) | EndCondition::Or(inner) => {
                inner.iter().try_for_each(EndCondition::validate)
            }
            _ => Ok(()),
        }
    }

    /// Whether the condition can never hold, making a loop over it unbounded.
    pub fn is_endless(&self) -> bool {
        match self {
            EndCondition::Endless => true,
            EndCondition::Probability(p) => *p <= 0.0,
            EndCondition::And(all) => all.iter().any(EndCondition::is_endless),
            EndCondition::Or(any) => !any.is_empty() && any.iter().all(EndCondition::is_endless),
            _ => false,
        }
    }
}

impl fmt::Debug for EndCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndCondition::Length(n) => write!(f, "Length({})", n),
            EndCondition::Probability(p) => write!(f, "Probability({})", p),
            EndCondition::Requirement(tag) => write!(f, "Requirement({:?})", tag),
            EndCondition::AllRequirements => f.write_str("AllRequirements"),
            EndCondition::Elapsed(d) => write!(f, "Elapsed({:?})", d),
            EndCondition::Endless => f.write_str("Endless"),
            EndCondition::And(all) => f.debug_tuple("And").field(all).finish(),
            EndCondition::Or(any) => f.debug_tuple("Or").field(any).finish(),
            EndCondition::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn check(cond: &EndCondition, scope: EndScope, test: &TestCase, req: &Requirements) -> bool {
        let suite = TestSuite::new(0);
        let mut rng = StdRng::seed_from_u64(7);
        let mut ctx = EndContext::new(scope, &suite, Some(test), req, Duration::ZERO, &mut rng);
        cond.is_met(&mut ctx)
    }

    #[test]
    fn test_length_counts_steps_in_test_scope() {
        let req = Requirements::new();
        let cond = EndCondition::Length(3);
        assert!(!check(&cond, EndScope::Test, &TestCase::from_steps(1, ["a", "b"]), &req));
        assert!(check(&cond, EndScope::Test, &TestCase::from_steps(1, ["a", "b", "c"]), &req));
        // empty suite: zero tests regardless of the test passed in
        assert!(!check(&cond, EndScope::Suite, &TestCase::from_steps(1, ["a", "b", "c"]), &req));
    }

    #[test]
    fn test_requirement_scopes() {
        let mut req = Requirements::with_declared(["r"]);
        let test = TestCase::new(1);
        let cond = EndCondition::Requirement("r".into());
        assert!(!check(&cond, EndScope::Test, &test, &req));

        req.covered("r");
        req.clear_coverage();
        assert!(!check(&cond, EndScope::Test, &test, &req));
        assert!(check(&cond, EndScope::Suite, &test, &req));
        assert!(check(&EndCondition::AllRequirements, EndScope::Suite, &test, &req));
    }

    #[test]
    fn test_and_short_circuits_probability() {
        let suite = TestSuite::new(0);
        let req = Requirements::new();
        let test = TestCase::new(1);
        let cond = EndCondition::Length(1).and(EndCondition::Probability(0.5));

        let mut rng = StdRng::seed_from_u64(1);
        let mut untouched = rng.clone();
        let mut ctx = EndContext::new(EndScope::Test, &suite, Some(&test), &req, Duration::ZERO, &mut rng);
        assert!(!cond.is_met(&mut ctx));
        assert_eq!(rng.gen::<u64>(), untouched.gen::<u64>());
    }

    #[test]
    fn test_probability_extremes() {
        let req = Requirements::new();
        let test = TestCase::new(1);
        assert!(check(&EndCondition::Probability(1.0), EndScope::Test, &test, &req));
        assert!(!check(&EndCondition::Probability(0.0), EndScope::Test, &test, &req));
    }

    #[test]
    fn test_validate_and_endless() {
        assert!(EndCondition::Probability(1.5).validate().is_err());
        assert!(EndCondition::Length(1)
            .or(EndCondition::Probability(-0.1))
            .validate()
            .is_err());
        assert!(EndCondition::Endless.is_endless());
        assert!(EndCondition::Length(2).and(EndCondition::Endless).is_endless());
        assert!(!EndCondition::Endless.or(EndCondition::Length(2)).is_endless());
    }

    #[test]
    fn test_elapsed_in_both_scopes() {
        let suite = TestSuite::new(0);
        let req = Requirements::new();
        let test = TestCase::new(1);
        let cond = EndCondition::Elapsed(Duration::from_millis(100));
        for scope in [EndScope::Test, EndScope::Suite] {
            for (elapsed, expected) in [(50, false), (100, true), (250, true)] {
                let mut rng = StdRng::seed_from_u64(3);
                let mut ctx = EndContext::new(
                    scope,
                    &suite,
                    Some(&test),
                    &req,
                    Duration::from_millis(elapsed),
                    &mut rng,
                );
                assert_eq!(cond.is_met(&mut ctx), expected, "{:?} at {}ms", scope, elapsed);
            }
        }
        assert!(!cond.is_endless());
    }

    #[test]
    fn test_custom() {
        let req = Requirements::new();
        let cond = EndCondition::custom(|ctx| ctx.test.map_or(false, |t| t.count("x") == 2));
        assert!(check(&cond, EndScope::Test, &TestCase::from_steps(1, ["x", "y", "x"]), &req));
        assert!(!check(&cond, EndScope::Test, &TestCase::from_steps(1, ["x"]), &req));
    }
}
