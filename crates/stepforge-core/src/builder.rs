//! Model declaration.
//!
//! [`ModelBuilder`] collects steps, guards, hooks and observers, validates
//! them, and resolves the per-step guard and hook order once so that
//! generation never re-sorts anything.
//!
//! Pre hooks and guards run global first, then shared, then step-specific.
//! Post hooks run in the reverse grouping. Within a group, declaration order.

use crate::error::{HookResult, ModelError, ModelResult};
use crate::model::{
    ActionFn, FactoryFn, GuardFn, LabelFn, LifecycleHooks, Model, Phase, PredicateFn,
    StepDescriptor, StepPlan, Target,
};
use crate::scope::{GuardScope, StepScope};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

struct Targeted<F> {
    target: Target,
    callback: F,
}

pub struct ModelBuilder<M> {
    name: String,
    steps: Vec<StepDescriptor<M>>,
    guards: Vec<Targeted<GuardFn<M>>>,
    pre: Vec<Targeted<ActionFn<M>>>,
    post: Vec<Targeted<ActionFn<M>>>,
    lifecycle: LifecycleHooks<M>,
    state_label: Option<LabelFn<M>>,
    coverage_values: Vec<(String, LabelFn<M>)>,
    end_conditions: Vec<PredicateFn<M>>,
    end_states: Vec<PredicateFn<M>>,
    requirements: Vec<String>,
    factory: Option<FactoryFn<M>>,
}

impl<M: 'static> ModelBuilder<M> {
    pub fn new(name: impl Into<String>) -> Self {
        ModelBuilder {
            name: name.into(),
            steps: Vec::new(),
            guards: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
            lifecycle: LifecycleHooks::default(),
            state_label: None,
            coverage_values: Vec::new(),
            end_conditions: Vec::new(),
            end_states: Vec::new(),
            requirements: Vec::new(),
            factory: None,
        }
    }

    /// Factory creating a fresh model instance for each generation run.
    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Add a step with weight 1 and no guards.
    #[must_use]
    pub fn step<F>(self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.add_step(StepDescriptor::new(name, action))
    }

    #[must_use]
    pub fn add_step(mut self, step: StepDescriptor<M>) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a guard for the targeted steps.
    #[must_use]
    pub fn guard<G>(mut self, target: impl Into<Target>, guard: G) -> Self
    where
        G: Fn(&M, &GuardScope<'_>) -> bool + Send + Sync + 'static,
    {
        self.guards.push(Targeted {
            target: target.into(),
            callback: Arc::new(guard),
        });
        self
    }

    /// Add a hook run before the targeted steps' actions.
    #[must_use]
    pub fn pre<F>(mut self, target: impl Into<Target>, hook: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.pre.push(Targeted {
            target: target.into(),
            callback: Arc::new(hook),
        });
        self
    }

    /// Add a hook run after the targeted steps' actions.
    #[must_use]
    pub fn post<F>(mut self, target: impl Into<Target>, hook: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.post.push(Targeted {
            target: target.into(),
            callback: Arc::new(hook),
        });
        self
    }

    #[must_use]
    pub fn before_suite<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.lifecycle.before_suite.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn before_test<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.lifecycle.before_test.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after_test<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.lifecycle.after_test.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after_suite<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        self.lifecycle.after_suite.push(Arc::new(hook));
        self
    }

    /// Label recorded on every executed step. Only the last declared label is used.
    #[must_use]
    pub fn state_label<F>(mut self, label: F) -> Self
    where
        F: Fn(&M) -> String + Send + Sync + 'static,
    {
        self.state_label = Some(Arc::new(label));
        self
    }

    /// Named value recorded on every executed step.
    #[must_use]
    pub fn coverage_value<F>(mut self, name: impl Into<String>, value: F) -> Self
    where
        F: Fn(&M) -> String + Send + Sync + 'static,
    {
        self.coverage_values.push((name.into(), Arc::new(value)));
        self
    }

    /// Model-level test end condition. When any holds, the current test ends.
    #[must_use]
    pub fn end_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.end_conditions.push(Arc::new(condition));
        self
    }

    /// Acceptable end state. Configured end conditions only end a test when all hold.
    #[must_use]
    pub fn end_state<F>(mut self, state: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.end_states.push(Arc::new(state));
        self
    }

    /// Declare a requirement tag.
    #[must_use]
    pub fn requirement(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.requirements.contains(&tag) {
            self.requirements.push(tag);
        }
        self
    }

    pub fn build(self) -> ModelResult<Model<M>> {
        let factory = self.factory.ok_or_else(|| ModelError::MissingFactory {
            model: self.name.clone(),
        })?;

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(ModelError::DuplicateStep {
                    name: step.name().to_string(),
                });
            }
            if step.selection_weight() == 0 {
                return Err(ModelError::ZeroWeight {
                    name: step.name().to_string(),
                });
            }
        }
        if self.steps.iter().all(StepDescriptor::is_last_step) {
            return Err(ModelError::NoSteps { model: self.name });
        }

        check_targets(&self.guards, &seen, Phase::Guard)?;
        check_targets(&self.pre, &seen, Phase::Pre)?;
        check_targets(&self.post, &seen, Phase::Post)?;

        let plans = self
            .steps
            .iter()
            .map(|step| {
                let mut guards = resolve(&self.guards, step.name(), false);
                guards.extend(step.own_guards().iter().cloned());
                StepPlan {
                    guards,
                    pre: resolve(&self.pre, step.name(), false),
                    post: resolve(&self.post, step.name(), true),
                }
            })
            .collect();

        debug!(
            model = %self.name,
            steps = self.steps.len(),
            requirements = self.requirements.len(),
            "model built"
        );

        Ok(Model {
            name: self.name,
            steps: self.steps,
            plans,
            lifecycle: self.lifecycle,
            state_label: self.state_label,
            coverage_values: self.coverage_values,
            end_conditions: self.end_conditions,
            end_states: self.end_states,
            requirements: self.requirements,
            factory,
        })
    }
}

fn check_targets<F>(
    entries: &[Targeted<F>],
    steps: &HashSet<&str>,
    phase: Phase,
) -> ModelResult<()> {
    for entry in entries {
        if let Target::Steps(names) = &entry.target {
            if names.is_empty() {
                return Err(ModelError::EmptyTarget { phase });
            }
            if let Some(unknown) = names.iter().find(|n| !steps.contains(n.as_str())) {
                return Err(ModelError::UnknownStep {
                    phase,
                    name: unknown.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Callbacks covering `step`, grouped by specificity. Stable within a group.
fn resolve<F: Clone>(entries: &[Targeted<F>], step: &str, specific_first: bool) -> Vec<F> {
    let mut matching: Vec<&Targeted<F>> =
        entries.iter().filter(|e| e.target.covers(step)).collect();
    if specific_first {
        matching.sort_by_key(|e| std::cmp::Reverse(e.target.specificity()));
    } else {
        matching.sort_by_key(|e| e.target.specificity());
    }
    matching.into_iter().map(|e| e.callback.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    fn noop(_: &mut Counter, _: &mut StepScope<'_>) -> HookResult {
        Ok(())
    }

    #[test]
    fn test_missing_factory() {
        let result = ModelBuilder::<Counter>::new("counter").step("inc", noop).build();
        match result {
            Err(ModelError::MissingFactory { model }) => assert_eq!(model, "counter"),
            other => panic!("expected MissingFactory, got {:?}", other.map(|m| m.summary())),
        }
    }

    #[test]
    fn test_duplicate_step() {
        let result = ModelBuilder::<Counter>::new("counter")
            .factory(Counter::default)
            .step("inc", noop)
            .step("inc", noop)
            .build();
        match result {
            Err(ModelError::DuplicateStep { name }) => assert_eq!(name, "inc"),
            other => panic!("expected DuplicateStep, got {:?}", other.map(|m| m.summary())),
        }
    }

    #[test]
    fn test_unknown_hook_target() {
        let result = ModelBuilder::<Counter>::new("counter")
            .factory(Counter::default)
            .step("inc", noop)
            .pre(Target::steps(["inc", "dec"]), noop)
            .build();
        match result {
            Err(ModelError::UnknownStep { phase, name }) => {
                assert_eq!(phase, Phase::Pre);
                assert_eq!(name, "dec");
            }
            other => panic!("expected UnknownStep, got {:?}", other.map(|m| m.summary())),
        }
    }

    #[test]
    fn test_zero_weight_and_no_steps() {
        let zero = ModelBuilder::<Counter>::new("counter")
            .factory(Counter::default)
            .add_step(StepDescriptor::new("inc", noop).weight(0))
            .build();
        assert!(matches!(zero, Err(ModelError::ZeroWeight { .. })));

        let only_last = ModelBuilder::<Counter>::new("counter")
            .factory(Counter::default)
            .add_step(StepDescriptor::new("done", noop).last_step())
            .build();
        assert!(matches!(only_last, Err(ModelError::NoSteps { .. })));
    }

    #[test]
    fn test_guards_combine() {
        let model = ModelBuilder::<Counter>::new("counter")
            .factory(Counter::default)
            .add_step(StepDescriptor::new("inc", noop).guard(|c: &Counter, _| c.value < 3))
            .step("reset", noop)
            .guard(Target::All, |c: &Counter, _| c.value != 1)
            .build()
            .unwrap();

        let test = crate::suite::TestCase::new(1);
        let suite = crate::suite::TestSuite::new(0);
        let requirements = crate::requirements::Requirements::new();
        let scope = GuardScope {
            requirements: &requirements,
            test: &test,
            suite: &suite,
        };

        let mut evaluated = Vec::new();
        let enabled = model.enabled_steps(&Counter { value: 0 }, &scope, |s| {
            evaluated.push(s.to_string())
        });
        assert_eq!(enabled.as_slice(), &[0, 1]);
        assert_eq!(evaluated, vec!["inc", "reset"]);

        let enabled = model.enabled_steps(&Counter { value: 1 }, &scope, |_| {});
        assert!(enabled.is_empty());

        let enabled = model.enabled_steps(&Counter { value: 5 }, &scope, |_| {});
        assert_eq!(enabled.as_slice(), &[1]);
    }

    #[test]
    fn test_hook_resolution_order() {
        fn tagged(tag: &'static str) -> impl Fn(&mut Vec<&'static str>, &mut StepScope<'_>) -> HookResult {
            move |log, _| {
                log.push(tag);
                Ok(())
            }
        }
        let model = ModelBuilder::<Vec<&'static str>>::new("order")
            .factory(Vec::new)
            .step("a", |_, _| Ok(()))
            .step("b", |_, _| Ok(()))
            .pre("a", tagged("pre-a"))
            .pre(Target::All, tagged("pre-all"))
            .pre(Target::steps(["a", "b"]), tagged("pre-ab"))
            .post(Target::All, tagged("post-all"))
            .post("a", tagged("post-a"))
            .post(Target::steps(["a", "b"]), tagged("post-ab"))
            .build()
            .unwrap();

        let plan = model.plan(0);
        assert_eq!(plan.pre.len(), 3);
        assert_eq!(plan.post.len(), 3);
        assert_eq!(model.plan(1).pre.len(), 2);

        let mut log = Vec::new();
        let mut requirements = crate::requirements::Requirements::new();
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(0);
        let suite = crate::suite::TestSuite::new(0);
        for hook in plan.pre.iter().chain(plan.post.iter()) {
            let mut scope = StepScope::new(&mut requirements, &mut rng, None, &suite, Some("a"));
            hook(&mut log, &mut scope).unwrap();
        }
        assert_eq!(
            log,
            vec!["pre-all", "pre-ab", "pre-a", "post-a", "post-ab", "post-all"]
        );
    }
}
