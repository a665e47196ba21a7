//! The generation engine.
//!
//! One call to [`Generator::generate`] produces one suite. All randomness
//! flows from a single `StdRng` seeded with the suite seed, so the same
//! model, configuration and seed always produce the same step sequences.

use crate::end::{EndCondition, EndContext, EndScope};
use crate::error::{GenResult, GenerationError};
use crate::listener::{GenerationListener, ListenerSet};
use crate::model::{ActionFn, Model, Phase};
use crate::requirements::Requirements;
use crate::scenario::Scenario;
use crate::scope::{GuardScope, StepScope};
use crate::suite::{TestCase, TestCaseStep, TestFailure, TestSuite};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Generation configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Ends each test. Default: at least one step, then 10% per check.
    pub test_end: EndCondition,
    /// Ends the suite. Default: at least one test, then 5% per check.
    pub suite_end: EndCondition,
    /// Abort the suite on the first failing hook or step.
    pub fail_on_error: bool,
    /// Report fatal errors as the user error itself instead of wrapped with context.
    pub unwrap_errors: bool,
    /// Treat a dead end (no enabled steps) as fatal instead of ending the test incomplete.
    pub fail_on_dead_end: bool,
    pub scenario: Option<Scenario>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            test_end: EndCondition::Length(1).and(EndCondition::Probability(0.1)),
            suite_end: EndCondition::Length(1).and(EndCondition::Probability(0.05)),
            fail_on_error: false,
            unwrap_errors: false,
            fail_on_dead_end: false,
            scenario: None,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> GenResult<()> {
        self.test_end
            .validate()
            .map_err(|e| GenerationError::InvalidConfig(format!("test end: {}", e)))?;
        self.suite_end
            .validate()
            .map_err(|e| GenerationError::InvalidConfig(format!("suite end: {}", e)))?;
        if self.suite_end.is_endless() {
            return Err(GenerationError::InvalidConfig(
                "suite end condition can never hold".into(),
            ));
        }
        if let Some(scenario) = &self.scenario {
            scenario.validate().map_err(GenerationError::InvalidConfig)?;
        }
        Ok(())
    }
}

pub struct Generator<M> {
    model: Arc<Model<M>>,
    config: GenerationConfig,
    listeners: ListenerSet,
}

impl<M: 'static> Generator<M> {
    pub fn new(model: Arc<Model<M>>, config: GenerationConfig) -> Self {
        Generator {
            model,
            config,
            listeners: ListenerSet::default(),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: impl GenerationListener + 'static) -> Self {
        self.add_listener(listener);
        self
    }

    pub fn add_listener(&mut self, listener: impl GenerationListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn model(&self) -> &Model<M> {
        &self.model
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut GenerationConfig {
        &mut self.config
    }

    /// Generate one suite from `seed`.
    ///
    /// A fatal error returns [`GenerationError::Aborted`] carrying the tests
    /// generated so far, or [`GenerationError::Unwrapped`] when
    /// `unwrap_errors` is set and a user callback failed.
    pub fn generate(&mut self, seed: u64) -> GenResult<TestSuite> {
        self.config.validate()?;
        let model = Arc::clone(&self.model);
        let run = Run {
            model: &model,
            config: &self.config,
            listeners: &mut self.listeners,
            instance: model.instantiate(),
            rng: StdRng::seed_from_u64(seed),
            requirements: Requirements::with_declared(model.requirements()),
            suite: TestSuite::new(seed),
            started: Instant::now(),
        };
        run.execute()
    }
}

enum TestEnd {
    Normal,
    DeadEnd,
}

/// State of one suite generation.
struct Run<'g, M> {
    model: &'g Model<M>,
    config: &'g GenerationConfig,
    listeners: &'g mut ListenerSet,
    instance: M,
    rng: StdRng,
    requirements: Requirements,
    suite: TestSuite,
    started: Instant,
}

impl<'g, M> Run<'g, M> {
    fn execute(mut self) -> GenResult<TestSuite> {
        let seed = self.suite.seed();
        let summary = self.model.summary();
        info!(model = %summary.name, seed, "suite generation starting");
        self.listeners.init(seed, &summary);
        let names = self.listeners.names();
        self.suite.start(names);
        self.listeners.suite_started(&self.suite);

        if let Err(error) = self.lifecycle(Phase::BeforeSuite, None) {
            return Err(self.abort(error));
        }
        while !self.suite_end_reached() {
            if let Err(error) = self.next_test() {
                return Err(self.abort(error));
            }
        }
        if let Err(error) = self.lifecycle(Phase::AfterSuite, None) {
            return Err(self.abort(error));
        }

        let Run {
            mut suite,
            requirements,
            listeners,
            ..
        } = self;
        suite.seal(requirements);
        listeners.suite_ended(&suite);
        info!(
            seed,
            tests = suite.len(),
            steps = suite.total_steps(),
            "suite generation finished"
        );
        Ok(suite)
    }

    fn abort(self, cause: GenerationError) -> GenerationError {
        let unwrap = self.config.unwrap_errors;
        let Run {
            mut suite,
            requirements,
            listeners,
            ..
        } = self;
        suite.seal(requirements);
        listeners.suite_error(&suite, &cause);
        warn!(
            seed = suite.seed(),
            tests = suite.len(),
            error = %cause,
            "suite generation aborted"
        );
        match cause {
            GenerationError::Invocation { source, .. } if unwrap => {
                GenerationError::Unwrapped(source)
            }
            cause => GenerationError::Aborted {
                tests: suite.len(),
                suite: Box::new(suite),
                cause: Box::new(cause),
            },
        }
    }

    fn suite_end_reached(&mut self) -> bool {
        let mut ctx = EndContext::new(
            EndScope::Suite,
            &self.suite,
            self.suite.last_test(),
            &self.requirements,
            self.started.elapsed(),
            &mut self.rng,
        );
        self.config.suite_end.is_met(&mut ctx)
    }

    /// Generate one test and append it to the suite. Errors returned here are fatal.
    fn next_test(&mut self) -> GenResult<()> {
        let mut test = TestCase::new(self.suite.len() + 1);
        test.start();
        self.requirements.clear_coverage();
        self.listeners.test_started(&test);
        let started = Instant::now();

        let mut fatal = None;
        match self.run_test(&mut test, started) {
            Ok(TestEnd::Normal) => {}
            Ok(TestEnd::DeadEnd) => {
                test.mark_incomplete();
                warn!(test = test.id(), steps = test.len(), "dead end, no enabled steps");
                if self.config.fail_on_dead_end {
                    let error = GenerationError::DeadEnd {
                        test_id: test.id(),
                        steps: test.len(),
                    };
                    self.listeners.test_error(&test, &error);
                    fatal = Some(error);
                }
            }
            Err(error) => {
                self.record_failure(&mut test, &error);
                if self.config.fail_on_error {
                    fatal = Some(error);
                }
            }
        }

        test.seal();
        if let Err(error) = self.lifecycle(Phase::AfterTest, Some(&mut test)) {
            self.record_failure(&mut test, &error);
            if fatal.is_none() && self.config.fail_on_error {
                fatal = Some(error);
            }
        }

        debug!(
            test = test.id(),
            steps = test.len(),
            status = ?test.status(),
            "test finished"
        );
        self.listeners.test_ended(&test);
        self.suite.push_test(test)?;
        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record_failure(&mut self, test: &mut TestCase, error: &GenerationError) {
        debug!(test = test.id(), error = %error, "test failed");
        test.mark_errored(TestFailure::from_error(error, "test"));
        self.listeners.test_error(test, error);
    }

    fn run_test(&mut self, test: &mut TestCase, started: Instant) -> GenResult<TestEnd> {
        self.lifecycle(Phase::BeforeTest, Some(&mut *test))?;
        while !self.test_end_reached(test, started) {
            let enabled = self.enabled_steps(test);
            if enabled.is_empty() {
                return Ok(TestEnd::DeadEnd);
            }
            let index = self.choose(&enabled)?;
            self.execute_step(index, test, Phase::Step)?;
        }

        let model = self.model;
        for index in model.last_steps() {
            self.listeners.guard(model.steps()[index].name());
            let enabled = {
                let scope = GuardScope {
                    requirements: &self.requirements,
                    test,
                    suite: &self.suite,
                };
                model.is_enabled(index, &self.instance, &scope)
            };
            if enabled {
                self.execute_step(index, test, Phase::LastStep)?;
                self.listeners.last_step(model.steps()[index].name());
            }
        }
        Ok(TestEnd::Normal)
    }

    /// Model end conditions end the test outright. Configured conditions
    /// only apply once scenario minimums and model end states hold.
    fn test_end_reached(&mut self, test: &TestCase, started: Instant) -> bool {
        if self.model.end_condition_met(&self.instance) {
            return true;
        }
        if let Some(scenario) = &self.config.scenario {
            if !scenario.minimums_met(test) {
                return false;
            }
        }
        if !self.model.in_end_state(&self.instance) {
            return false;
        }
        let mut ctx = EndContext::new(
            EndScope::Test,
            &self.suite,
            Some(test),
            &self.requirements,
            started.elapsed(),
            &mut self.rng,
        );
        self.config.test_end.is_met(&mut ctx)
    }

    fn enabled_steps(&mut self, test: &TestCase) -> SmallVec<[usize; 16]> {
        let model = self.model;
        let listeners = &mut *self.listeners;
        let scope = GuardScope {
            requirements: &self.requirements,
            test,
            suite: &self.suite,
        };
        let mut enabled = model.enabled_steps(&self.instance, &scope, |name| listeners.guard(name));
        if let Some(scenario) = &self.config.scenario {
            enabled.retain(|index| {
                let name = model.steps()[*index].name();
                scenario.allows(name, test.count(name))
            });
        }
        enabled
    }

    /// Weighted draw among the enabled steps. Weights are summed as `u64` so
    /// no combination of `u32` weights can overflow the total.
    fn choose(&mut self, enabled: &[usize]) -> GenResult<usize> {
        let model = self.model;
        let weights = enabled
            .iter()
            .map(|&index| u64::from(model.steps()[index].selection_weight()));
        let dist = WeightedIndex::new(weights)
            .map_err(|e| GenerationError::InvalidConfig(format!("step weights: {}", e)))?;
        Ok(enabled[dist.sample(&mut self.rng)])
    }

    /// Run one step with its hooks and record it.
    ///
    /// A step whose pre hooks or action fail is still recorded, without
    /// state or values, so that the test shows where it failed.
    fn execute_step(&mut self, index: usize, test: &mut TestCase, phase: Phase) -> GenResult<()> {
        let model = self.model;
        let name = model.steps()[index].name();
        trace!(test = test.id(), step = name, "step starting");
        self.listeners.step_starting(name);

        let mut record = TestCaseStep::new(name, test.len());
        if let Err(error) = self.act(index, test, phase) {
            test.add_step(record)?;
            return Err(error);
        }
        record.state = model.label_state(&self.instance);
        record.values = model.coverage_values(&self.instance);
        test.add_step(record)?;
        if let Some(done) = test.last_step() {
            self.listeners.step_done(done);
        }

        self.listeners.post(name);
        for hook in &model.plan(index).post {
            self.invoke(hook, Phase::Post, name, Some(&mut *test))?;
        }
        Ok(())
    }

    fn act(&mut self, index: usize, test: &mut TestCase, phase: Phase) -> GenResult<()> {
        let model = self.model;
        let step = &model.steps()[index];
        self.listeners.pre(step.name());
        for hook in &model.plan(index).pre {
            self.invoke(hook, Phase::Pre, step.name(), Some(&mut *test))?;
        }
        self.invoke(step.action(), phase, step.name(), Some(test))
    }

    fn lifecycle(&mut self, phase: Phase, mut test: Option<&mut TestCase>) -> GenResult<()> {
        let model = self.model;
        let target = phase.to_string();
        for hook in model.lifecycle_hooks(phase) {
            self.invoke(hook, phase, &target, test.as_deref_mut())?;
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        hook: &ActionFn<M>,
        phase: Phase,
        target: &str,
        test: Option<&mut TestCase>,
    ) -> GenResult<()> {
        let step = match phase {
            Phase::Pre | Phase::Step | Phase::Post | Phase::LastStep => Some(target),
            _ => None,
        };
        let mut scope = StepScope::new(&mut self.requirements, &mut self.rng, test, &self.suite, step);
        hook(&mut self.instance, &mut scope).map_err(|source| GenerationError::Invocation {
            phase,
            target: target.to_string(),
            source,
        })
    }
}
