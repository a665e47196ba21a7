//! Generation event observers.

use crate::error::GenerationError;
use crate::model::ModelSummary;
use crate::suite::{TestCase, TestCaseStep, TestSuite};
use tracing::{debug, info, trace, warn};

/// Observer of generation events. Every method defaults to a no-op.
///
/// Events for one run arrive in execution order: `init`, `suite_started`,
/// then per test `test_started`, per step `guard` (once for each step whose
/// guards are evaluated), `step_starting`, `pre`, `step_done`, `post`,
/// followed by `guard` and, when its guards hold, `last_step` for each last
/// step, then `test_ended`. `test_error` and `suite_error` report failures
/// as they happen.
pub trait GenerationListener {
    /// Name recorded in the suite metadata.
    fn name(&self) -> &str {
        "listener"
    }

    fn init(&mut self, _seed: u64, _model: &ModelSummary) {}

    fn suite_started(&mut self, _suite: &TestSuite) {}

    fn suite_ended(&mut self, _suite: &TestSuite) {}

    fn test_started(&mut self, _test: &TestCase) {}

    fn test_ended(&mut self, _test: &TestCase) {}

    fn guard(&mut self, _step: &str) {}

    fn step_starting(&mut self, _step: &str) {}

    fn pre(&mut self, _step: &str) {}

    fn step_done(&mut self, _step: &TestCaseStep) {}

    fn post(&mut self, _step: &str) {}

    fn last_step(&mut self, _step: &str) {}

    fn test_error(&mut self, _test: &TestCase, _error: &GenerationError) {}

    fn suite_error(&mut self, _suite: &TestSuite, _error: &GenerationError) {}
}

/// Fan-out over the registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Box<dyn GenerationListener>>,
}

impl ListenerSet {
    pub(crate) fn push(&mut self, listener: Box<dyn GenerationListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.listeners.iter().map(|l| l.name().to_string()).collect()
    }

    fn each(&mut self, mut f: impl FnMut(&mut Box<dyn GenerationListener>)) {
        for listener in &mut self.listeners {
            f(listener);
        }
    }

    pub(crate) fn init(&mut self, seed: u64, model: &ModelSummary) {
        self.each(|l| l.init(seed, model));
    }

    pub(crate) fn suite_started(&mut self, suite: &TestSuite) {
        self.each(|l| l.suite_started(suite));
    }

    pub(crate) fn suite_ended(&mut self, suite: &TestSuite) {
        self.each(|l| l.suite_ended(suite));
    }

    pub(crate) fn test_started(&mut self, test: &TestCase) {
        self.each(|l| l.test_started(test));
    }

    pub(crate) fn test_ended(&mut self, test: &TestCase) {
        self.each(|l| l.test_ended(test));
    }

    pub(crate) fn guard(&mut self, step: &str) {
        self.each(|l| l.guard(step));
    }

    pub(crate) fn step_starting(&mut self, step: &str) {
        self.each(|l| l.step_starting(step));
    }

    pub(crate) fn pre(&mut self, step: &str) {
        self.each(|l| l.pre(step));
    }

    pub(crate) fn step_done(&mut self, step: &TestCaseStep) {
        self.each(|l| l.step_done(step));
    }

    pub(crate) fn post(&mut self, step: &str) {
        self.each(|l| l.post(step));
    }

    pub(crate) fn last_step(&mut self, step: &str) {
        self.each(|l| l.last_step(step));
    }

    pub(crate) fn test_error(&mut self, test: &TestCase, error: &GenerationError) {
        self.each(|l| l.test_error(test, error));
    }

    pub(crate) fn suite_error(&mut self, suite: &TestSuite, error: &GenerationError) {
        self.each(|l| l.suite_error(suite, error));
    }
}

/// Listener that reports generation progress through `tracing`.
///
/// Suites log at info, tests at debug, steps at trace, failures at warn.
#[derive(Debug, Default)]
pub struct TracingListener;

impl GenerationListener for TracingListener {
    fn name(&self) -> &str {
        "tracing"
    }

    fn init(&mut self, seed: u64, model: &ModelSummary) {
        info!(
            model = %model.name,
            seed,
            steps = model.steps.len(),
            requirements = model.requirements.len(),
            "generation starting"
        );
    }

    fn suite_ended(&mut self, suite: &TestSuite) {
        info!(
            seed = suite.seed(),
            tests = suite.len(),
            steps = suite.total_steps(),
            failed = suite.failed_tests().count(),
            "suite ended"
        );
    }

    fn test_started(&mut self, test: &TestCase) {
        debug!(test = test.id(), "test started");
    }

    fn test_ended(&mut self, test: &TestCase) {
        debug!(test = test.id(), steps = test.len(), status = ?test.status(), "test ended");
    }

    fn step_done(&mut self, step: &TestCaseStep) {
        trace!(step = %step.name, index = step.index, state = ?step.state, "step done");
    }

    fn last_step(&mut self, step: &str) {
        trace!(step, "last step done");
    }

    fn test_error(&mut self, test: &TestCase, error: &GenerationError) {
        warn!(test = test.id(), error = %error, "test failed");
    }

    fn suite_error(&mut self, suite: &TestSuite, error: &GenerationError) {
        warn!(seed = suite.seed(), tests = suite.len(), error = %error, "suite aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::end::EndCondition;
    use crate::generator::{GenerationConfig, Generator};
    use std::sync::Arc;

    #[test]
    fn test_tracing_listener_is_recorded() {
        let model = Arc::new(
            ModelBuilder::<u8>::new("tick")
                .factory(|| 0)
                .step("tick", |n, _| {
                    *n = n.wrapping_add(1);
                    Ok(())
                })
                .step("fail", |_, _| Err("broken".into()))
                .build()
                .unwrap(),
        );
        let config = GenerationConfig {
            test_end: EndCondition::Length(4),
            suite_end: EndCondition::Length(3),
            ..Default::default()
        };
        let suite = Generator::new(model, config)
            .with_listener(TracingListener)
            .generate(9)
            .unwrap();
        assert_eq!(suite.listener_names(), &["tracing".to_string()]);
        assert_eq!(suite.len(), 3);
    }

    #[test]
    fn test_listener_set_fans_out_in_order() {
        struct Named(&'static str);
        impl GenerationListener for Named {
            fn name(&self) -> &str {
                self.0
            }
        }
        let mut set = ListenerSet::default();
        set.push(Box::new(TracingListener));
        set.push(Box::new(Named("second")));
        assert_eq!(set.names(), ["tracing", "second"]);
    }
}
