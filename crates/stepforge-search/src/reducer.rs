//! Failing-test reduction.
//!
//! The reducer fuzzes the model until a test reproduces the target failure,
//! then repeatedly halves the target length, generating only tests whose step
//! multiset fits inside the shortest failing test found so far. Fuzzing within
//! one attempt runs on a rayon pool; attempts themselves are sequential.

use crate::analyzer::{Analyzer, Invariants};
use crate::error::{SearchError, SearchResult};
use crate::{derive_seed, report, resolve_parallelism};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stepforge_core::{
    EndCondition, GenerationConfig, Generator, Model, Scenario, TestCase, TestFailure,
};
use tracing::{debug, info};

/// Decides whether a generated test shows the failure being reduced.
pub type FailurePredicate = Arc<dyn Fn(&TestCase) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ReducerConfig {
    pub seed: u64,
    /// Candidates generated per attempt.
    pub population: usize,
    /// Test length of the initial fuzz.
    pub length: usize,
    /// Budget for the whole reduction.
    pub total_time: Duration,
    /// Fuzzing threads. 0 means one per available core.
    pub parallelism: usize,
    /// Only accept failures at the same phase and target as the first one found.
    pub same_failure: bool,
    /// Where to write the report. `None` writes nothing.
    pub output_dir: Option<PathBuf>,
    /// Leave timing out of reports so they compare equal across runs.
    pub test_mode: bool,
    /// `None` treats errored tests as failing.
    pub failure: Option<FailurePredicate>,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        ReducerConfig {
            seed: 0,
            population: 1000,
            length: 50,
            total_time: Duration::from_secs(60),
            parallelism: 0,
            same_failure: true,
            output_dir: None,
            test_mode: false,
            failure: None,
        }
    }
}

impl fmt::Debug for ReducerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerConfig")
            .field("seed", &self.seed)
            .field("population", &self.population)
            .field("length", &self.length)
            .field("total_time", &self.total_time)
            .field("parallelism", &self.parallelism)
            .field("same_failure", &self.same_failure)
            .field("output_dir", &self.output_dir)
            .field("test_mode", &self.test_mode)
            .field("failure", &self.failure.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl ReducerConfig {
    pub fn validate(&self) -> SearchResult<()> {
        if self.population == 0 {
            return Err(SearchError::InvalidConfig("population must be at least 1".into()));
        }
        if self.length == 0 {
            return Err(SearchError::InvalidConfig("length must be at least 1".into()));
        }
        if self.total_time.is_zero() {
            return Err(SearchError::InvalidConfig("total time must be non-zero".into()));
        }
        Ok(())
    }

    fn is_failure(&self, test: &TestCase) -> bool {
        match &self.failure {
            Some(predicate) => predicate(test),
            None => test.is_errored(),
        }
    }
}

/// Progress of one reduction.
#[derive(Debug, Clone, Serialize)]
pub struct ReducerState {
    seed: u64,
    steps: Vec<String>,
    history: Vec<TestCase>,
    minimal: Vec<TestCase>,
    lengths: Vec<usize>,
    tests_generated: usize,
    elapsed: Duration,
}

impl ReducerState {
    pub fn new(seed: u64, steps: Vec<String>) -> Self {
        ReducerState {
            seed,
            steps,
            history: Vec::new(),
            minimal: Vec::new(),
            lengths: Vec::new(),
            tests_generated: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Record a failing test. A shorter test replaces the minimal set; one of
    /// equal length joins it unless the same step sequence is already there.
    pub fn add_test(&mut self, test: TestCase) {
        match self.shortest_length() {
            Some(len) if test.len() > len => {}
            Some(len) if test.len() == len => {
                let names = test.step_names();
                if !self.minimal.iter().any(|t| t.step_names() == names) {
                    self.minimal.push(test.clone());
                }
            }
            _ => self.minimal = vec![test.clone()],
        }
        self.history.push(test);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Step names of the reduced model.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Shortest failing tests found.
    pub fn tests(&self) -> &[TestCase] {
        &self.minimal
    }

    /// Every failing test found, in discovery order.
    pub fn history(&self) -> &[TestCase] {
        &self.history
    }

    /// Target length of each shrink attempt, in order.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn shortest_length(&self) -> Option<usize> {
        self.minimal.first().map(TestCase::len)
    }

    pub fn tests_generated(&self) -> usize {
        self.tests_generated
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[derive(Debug)]
pub enum ReducerOutcome {
    Reduced {
        state: ReducerState,
        invariants: Invariants,
        /// Report file, when an output directory was configured.
        report: Option<PathBuf>,
    },
    /// No generated test reproduced the failure.
    NotReproduced { tests_generated: usize },
}

impl ReducerOutcome {
    pub fn state(&self) -> Option<&ReducerState> {
        match self {
            ReducerOutcome::Reduced { state, .. } => Some(state),
            ReducerOutcome::NotReproduced { .. } => None,
        }
    }

    pub fn is_reproduced(&self) -> bool {
        matches!(self, ReducerOutcome::Reduced { .. })
    }
}

/// Shrinks failing tests of a model.
pub struct Reducer<M> {
    model: Arc<Model<M>>,
    generation: GenerationConfig,
    config: ReducerConfig,
}

impl<M: 'static> Reducer<M> {
    /// `generation` supplies everything except the end conditions, error
    /// handling and dead-end handling, which the reducer controls.
    pub fn new(model: Arc<Model<M>>, generation: GenerationConfig, config: ReducerConfig) -> Self {
        Reducer {
            model,
            generation,
            config,
        }
    }

    pub fn config(&self) -> &ReducerConfig {
        &self.config
    }

    pub fn reduce(&self) -> SearchResult<ReducerOutcome> {
        self.config.validate()?;
        self.generation.validate()?;
        let threads = resolve_parallelism(self.config.parallelism);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let started = Instant::now();
        let deadline = started + self.config.total_time;
        let generated = AtomicUsize::new(0);

        info!(
            seed = self.config.seed,
            population = self.config.population,
            length = self.config.length,
            threads,
            "reducer started"
        );

        let initial = self.fuzz(
            &pool,
            0,
            self.config.length,
            self.generation.scenario.clone(),
            &|test: &TestCase| self.config.is_failure(test),
            deadline,
            &generated,
        )?;
        let Some(first) = initial else {
            let tests_generated = generated.load(Ordering::Relaxed);
            info!(tests_generated, "failure not reproduced");
            return Ok(ReducerOutcome::NotReproduced { tests_generated });
        };
        let site = first.failure().cloned();
        debug!(length = first.len(), failure = ?site, "first failing test");

        let steps = self.model.step_names().into_iter().map(String::from).collect();
        let mut state = ReducerState::new(self.config.seed, steps);
        state.add_test(first);

        let mut previous: Option<usize> = None;
        let mut iteration = 1u64;
        while let Some((best, shortest)) = state.shortest_length().zip(state.tests().first()) {
            if best <= 1 || Instant::now() >= deadline {
                break;
            }
            let half = best.div_ceil(2);
            let target = previous.map_or(half, |p| half.min(p.saturating_sub(1)));
            if target == 0 {
                break;
            }
            let scenario = Scenario::from_test(shortest).relaxed();
            state.lengths.push(target);
            previous = Some(target);

            let accept = |test: &TestCase| test.len() < best && self.reproduces(test, site.as_ref());
            let found = self.fuzz(
                &pool,
                iteration,
                target,
                Some(scenario),
                &accept,
                deadline,
                &generated,
            )?;
            match found {
                Some(test) => {
                    info!(iteration, target, length = test.len(), "shrunk failing test");
                    state.add_test(test);
                }
                None => {
                    info!(iteration, target, "no shorter failing test");
                    break;
                }
            }
            iteration += 1;
        }

        state.tests_generated = generated.load(Ordering::Relaxed);
        state.elapsed = started.elapsed();
        let invariants = Analyzer::new(state.steps().iter().cloned()).analyze(state.history());
        info!(
            seed = state.seed,
            shortest = ?state.shortest_length(),
            attempts = state.lengths.len(),
            tests_generated = state.tests_generated,
            "reducer finished"
        );

        let report = match &self.config.output_dir {
            Some(dir) => Some(report::write_reducer_report(
                dir,
                &state,
                &invariants,
                self.config.test_mode,
            )?),
            None => None,
        };
        Ok(ReducerOutcome::Reduced {
            state,
            invariants,
            report,
        })
    }

    fn reproduces(&self, test: &TestCase, site: Option<&TestFailure>) -> bool {
        if !self.config.is_failure(test) {
            return false;
        }
        if !self.config.same_failure {
            return true;
        }
        match (site, test.failure()) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected.same_site(actual),
            (Some(_), None) => false,
        }
    }

    /// Generate up to `population` single-test suites of `length` steps and
    /// return the lowest-index test `accept` takes. Generation errors are
    /// fatal in the initial fuzz (`iteration` 0) and reject the candidate in
    /// shrink attempts.
    #[allow(clippy::too_many_arguments)]
    fn fuzz(
        &self,
        pool: &ThreadPool,
        iteration: u64,
        length: usize,
        scenario: Option<Scenario>,
        accept: &(dyn Fn(&TestCase) -> bool + Sync),
        deadline: Instant,
        generated: &AtomicUsize,
    ) -> SearchResult<Option<TestCase>> {
        let config = GenerationConfig {
            test_end: EndCondition::Length(length),
            suite_end: EndCondition::Length(1),
            fail_on_error: false,
            unwrap_errors: false,
            fail_on_dead_end: false,
            scenario,
            ..self.generation.clone()
        };
        let found = pool.install(|| {
            (0..self.config.population)
                .into_par_iter()
                .map(|index| -> SearchResult<Option<TestCase>> {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    let seed = derive_seed(self.config.seed, iteration, index as u64);
                    let result = Generator::new(Arc::clone(&self.model), config.clone())
                        .generate(seed);
                    generated.fetch_add(1, Ordering::Relaxed);
                    let suite = match result {
                        Ok(suite) => suite,
                        // A shrink attempt must not lose the failures already found.
                        Err(e) if iteration > 0 => {
                            debug!(iteration, index, error = %e, "candidate rejected");
                            return Ok(None);
                        }
                        Err(e) => return Err(e.into()),
                    };
                    Ok(suite.into_tests().into_iter().find(|t| accept(t)))
                })
                .find_map_first(|result| match result {
                    Ok(None) => None,
                    other => Some(other),
                })
        });
        found.transpose().map(Option::flatten)
    }
}
