//! Loaded test models.
//!
//! A [`Model`] is the immutable description produced by
//! [`ModelBuilder`](crate::builder::ModelBuilder): the step table, the hook
//! lists resolved per step, and the observers used to label executed steps.
//! It is shared read-only between generation runs; each run creates its own
//! instance of `M` through the model factory.

use crate::error::HookResult;
use crate::scope::{GuardScope, StepScope};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type GuardFn<M> = Arc<dyn Fn(&M, &GuardScope<'_>) -> bool + Send + Sync>;
pub type ActionFn<M> = Arc<dyn Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync>;
pub type LabelFn<M> = Arc<dyn Fn(&M) -> String + Send + Sync>;
pub type PredicateFn<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;
pub type FactoryFn<M> = Arc<dyn Fn() -> M + Send + Sync>;

/// Invocation point of a model callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    BeforeSuite,
    BeforeTest,
    Guard,
    Pre,
    Step,
    Post,
    LastStep,
    AfterTest,
    AfterSuite,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::BeforeSuite => "before-suite",
            Phase::BeforeTest => "before-test",
            Phase::Guard => "guard",
            Phase::Pre => "pre",
            Phase::Step => "step",
            Phase::Post => "post",
            Phase::LastStep => "last-step",
            Phase::AfterTest => "after-test",
            Phase::AfterSuite => "after-suite",
        };
        f.write_str(name)
    }
}

/// Steps a guard or hook applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every step.
    All,
    /// The named steps. One name is a step-specific target, several a shared one.
    Steps(Vec<String>),
}

impl Target {
    pub fn step(name: impl Into<String>) -> Self {
        Target::Steps(vec![name.into()])
    }

    pub fn steps<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::Steps(names.into_iter().map(Into::into).collect())
    }

    pub fn covers(&self, step: &str) -> bool {
        match self {
            Target::All => true,
            Target::Steps(names) => names.iter().any(|n| n == step),
        }
    }

    /// 0 for global, 1 for shared, 2 for step-specific.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            Target::All => 0,
            Target::Steps(names) if names.len() > 1 => 1,
            Target::Steps(_) => 2,
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::step(name)
    }
}

/// A selectable transition of the model.
pub struct StepDescriptor<M> {
    name: String,
    weight: u32,
    guards: Vec<GuardFn<M>>,
    action: ActionFn<M>,
    last: bool,
}

impl<M> StepDescriptor<M> {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut M, &mut StepScope<'_>) -> HookResult + Send + Sync + 'static,
    {
        StepDescriptor {
            name: name.into(),
            weight: 1,
            guards: Vec::new(),
            action: Arc::new(action),
            last: false,
        }
    }

    /// Relative selection weight among enabled steps. Default 1.
    #[must_use]
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Add a guard specific to this step. All guards must hold for the step to be enabled.
    #[must_use]
    pub fn guard<G>(mut self, guard: G) -> Self
    where
        G: Fn(&M, &GuardScope<'_>) -> bool + Send + Sync + 'static,
    {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Run this step once when a test ends normally instead of offering it for selection.
    #[must_use]
    pub fn last_step(mut self) -> Self {
        self.last = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selection_weight(&self) -> u32 {
        self.weight
    }

    pub fn is_last_step(&self) -> bool {
        self.last
    }

    pub(crate) fn own_guards(&self) -> &[GuardFn<M>] {
        &self.guards
    }

    pub(crate) fn action(&self) -> &ActionFn<M> {
        &self.action
    }
}

/// Guards and hooks resolved for one step, in invocation order.
pub(crate) struct StepPlan<M> {
    pub(crate) guards: Vec<GuardFn<M>>,
    pub(crate) pre: Vec<ActionFn<M>>,
    pub(crate) post: Vec<ActionFn<M>>,
}

/// Hooks that run around tests and suites, in declaration order.
pub(crate) struct LifecycleHooks<M> {
    pub(crate) before_suite: Vec<ActionFn<M>>,
    pub(crate) before_test: Vec<ActionFn<M>>,
    pub(crate) after_test: Vec<ActionFn<M>>,
    pub(crate) after_suite: Vec<ActionFn<M>>,
}

impl<M> Default for LifecycleHooks<M> {
    fn default() -> Self {
        LifecycleHooks {
            before_suite: Vec::new(),
            before_test: Vec::new(),
            after_test: Vec::new(),
            after_suite: Vec::new(),
        }
    }
}

/// Static facts about a model, passed to listeners and logged at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub steps: Vec<String>,
    pub last_steps: Vec<String>,
    pub requirements: Vec<String>,
}

pub struct Model<M> {
    pub(crate) name: String,
    pub(crate) steps: Vec<StepDescriptor<M>>,
    pub(crate) plans: Vec<StepPlan<M>>,
    pub(crate) lifecycle: LifecycleHooks<M>,
    pub(crate) state_label: Option<LabelFn<M>>,
    pub(crate) coverage_values: Vec<(String, LabelFn<M>)>,
    pub(crate) end_conditions: Vec<PredicateFn<M>>,
    pub(crate) end_states: Vec<PredicateFn<M>>,
    pub(crate) requirements: Vec<String>,
    pub(crate) factory: FactoryFn<M>,
}

impl<M> Model<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A fresh model instance.
    pub fn instantiate(&self) -> M {
        (self.factory)()
    }

    pub fn steps(&self) -> &[StepDescriptor<M>] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepDescriptor<M>> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// All step names in declaration order, last steps included.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Indices of last steps in declaration order.
    pub fn last_steps(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.last)
            .map(|(i, _)| i)
    }

    /// Declared requirement tags.
    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            steps: self.step_names().into_iter().map(String::from).collect(),
            last_steps: self
                .last_steps()
                .map(|i| self.steps[i].name.clone())
                .collect(),
            requirements: self.requirements.clone(),
        }
    }

    /// Whether every guard of step `index` holds. Stops at the first failing guard.
    pub fn is_enabled(&self, index: usize, instance: &M, scope: &GuardScope<'_>) -> bool {
        self.plans[index]
            .guards
            .iter()
            .all(|guard| guard(instance, scope))
    }

    /// Indices of selectable steps whose guards all hold, in declaration order.
    ///
    /// `on_guard` is called once for every step whose guards are evaluated.
    pub fn enabled_steps(
        &self,
        instance: &M,
        scope: &GuardScope<'_>,
        mut on_guard: impl FnMut(&str),
    ) -> SmallVec<[usize; 16]> {
        let mut enabled = SmallVec::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.last {
                continue;
            }
            on_guard(&step.name);
            if self.is_enabled(index, instance, scope) {
                enabled.push(index);
            }
        }
        enabled
    }

    pub(crate) fn plan(&self, index: usize) -> &StepPlan<M> {
        &self.plans[index]
    }

    pub(crate) fn lifecycle_hooks(&self, phase: Phase) -> &[ActionFn<M>] {
        match phase {
            Phase::BeforeSuite => &self.lifecycle.before_suite,
            Phase::BeforeTest => &self.lifecycle.before_test,
            Phase::AfterTest => &self.lifecycle.after_test,
            Phase::AfterSuite => &self.lifecycle.after_suite,
            _ => &[],
        }
    }

    /// State label for the current instance, if the model declares one.
    pub fn label_state(&self, instance: &M) -> Option<String> {
        self.state_label.as_ref().map(|label| label(instance))
    }

    /// Named coverage values observed on the current instance.
    pub fn coverage_values(&self, instance: &M) -> BTreeMap<String, String> {
        self.coverage_values
            .iter()
            .map(|(name, value)| (name.clone(), value(instance)))
            .collect()
    }

    /// Whether any model-declared end condition holds.
    pub fn end_condition_met(&self, instance: &M) -> bool {
        self.end_conditions.iter().any(|cond| cond(instance))
    }

    /// Whether the instance is in an acceptable end state. True when none are declared.
    pub fn in_end_state(&self, instance: &M) -> bool {
        self.end_states.iter().all(|state| state(instance))
    }
}

impl<M> fmt::Debug for Model<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}
