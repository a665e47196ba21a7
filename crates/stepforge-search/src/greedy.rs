//! Parallel greedy search for a high-scoring suite.
//!
//! Each worker thread repeatedly takes the next candidate index, generates a
//! suite from the seed derived for it, greedily keeps the tests that raise the
//! score, and offers the result to the shared best holder. The holder only
//! accepts strictly better scores and notifies iteration listeners while it is
//! locked, so listeners observe a non-decreasing sequence of scores.

use crate::error::{SearchError, SearchResult};
use crate::{derive_seed, resolve_parallelism};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use stepforge_core::{
    EndCondition, GenerationConfig, Generator, Model, ScoreFunction, TestCase, TestSuite,
};
use tracing::{debug, info};

/// Seed stream used for greedy candidates.
const CANDIDATE_STREAM: u64 = 1;

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    pub seed: u64,
    /// Tests generated per candidate suite.
    pub population: usize,
    /// Stop once the best score reaches this.
    pub threshold: Option<f64>,
    /// Wall-clock budget. Zero disables it. A search that scored nothing by
    /// then fails with `NoCandidates`.
    pub timeout: Duration,
    /// Stop after this many generated tests. 0 means unlimited.
    pub max_tests: usize,
    /// Worker threads. 0 means one per available core.
    pub parallelism: usize,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        GreedyConfig {
            seed: 0,
            population: 100,
            threshold: None,
            timeout: Duration::from_secs(60),
            max_tests: 0,
            parallelism: 0,
        }
    }
}

impl GreedyConfig {
    pub fn validate(&self) -> SearchResult<()> {
        if self.population == 0 {
            return Err(SearchError::InvalidConfig(
                "population must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() && self.max_tests == 0 && self.threshold.is_none() {
            return Err(SearchError::InvalidConfig(
                "no timeout, test limit or threshold: search would never stop".into(),
            ));
        }
        Ok(())
    }
}

/// A new best suite, as reported to iteration listeners.
#[derive(Debug)]
pub struct Improvement<'a> {
    /// Index of the candidate that produced the suite.
    pub candidate: usize,
    pub seed: u64,
    pub score: f64,
    pub suite: &'a TestSuite,
}

pub type IterationListener = Arc<dyn Fn(&Improvement<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Threshold,
    MaxTests,
    Timeout,
}

#[derive(Debug)]
pub struct GreedyResult {
    pub score: f64,
    pub suite: TestSuite,
    /// Candidate index and seed of the best suite.
    pub candidate: usize,
    pub seed: u64,
    pub tests_generated: usize,
    pub candidates: usize,
    pub improvements: usize,
    pub stop: Option<StopReason>,
    pub elapsed: Duration,
}

struct Best {
    score: f64,
    candidate: usize,
    seed: u64,
    suite: TestSuite,
}

/// State shared by all workers of one search.
#[derive(Default)]
struct SearchState {
    best: Mutex<Option<Best>>,
    next_candidate: AtomicUsize,
    candidates: AtomicUsize,
    tests: AtomicUsize,
    improvements: AtomicUsize,
    stop: AtomicBool,
    reason: Mutex<Option<StopReason>>,
}

impl SearchState {
    fn halt(&self, reason: StopReason) {
        let mut current = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            *current = Some(reason);
        }
        self.stop.store(true, Ordering::Relaxed);
    }

    fn should_stop(&self, deadline: Option<Instant>, max_tests: usize) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }
        if max_tests > 0 && self.tests.load(Ordering::Relaxed) >= max_tests {
            self.halt(StopReason::MaxTests);
            return true;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                self.halt(StopReason::Timeout);
                return true;
            }
        }
        false
    }

    fn offer(
        &self,
        candidate: usize,
        seed: u64,
        score: f64,
        suite: TestSuite,
        listeners: &[IterationListener],
    ) {
        if score.is_nan() {
            debug!(candidate, "ignoring NaN score");
            return;
        }
        let mut best = self.best.lock().unwrap_or_else(PoisonError::into_inner);
        if best.as_ref().is_some_and(|b| score <= b.score) {
            return;
        }
        let improvement = Improvement {
            candidate,
            seed,
            score,
            suite: &suite,
        };
        for listener in listeners {
            listener(&improvement);
        }
        info!(candidate, score, tests = suite.len(), "new best suite");
        self.improvements.fetch_add(1, Ordering::Relaxed);
        *best = Some(Best {
            score,
            candidate,
            seed,
            suite,
        });
    }
}

/// Keep adding the test that raises the score most, while one does.
fn select_greedy(suite: &TestSuite, score: &dyn ScoreFunction) -> (f64, TestSuite) {
    let mut remaining: Vec<TestCase> = suite.tests().to_vec();
    let mut chosen: Vec<TestCase> = Vec::new();
    let mut current = score.score(&suite.subset(Vec::new()));
    loop {
        let mut pick: Option<(usize, f64)> = None;
        for (i, test) in remaining.iter().enumerate() {
            let mut trial = chosen.clone();
            trial.push(test.clone());
            let s = score.score(&suite.subset(trial));
            if s > current && pick.map_or(true, |(_, p)| s > p) {
                pick = Some((i, s));
            }
        }
        let Some((i, s)) = pick else {
            break;
        };
        chosen.push(remaining.remove(i));
        current = s;
    }
    (current, suite.subset(chosen))
}

struct Worker<M> {
    model: Arc<Model<M>>,
    generation: GenerationConfig,
    config: GreedyConfig,
    score: Arc<dyn ScoreFunction>,
    listeners: Vec<IterationListener>,
    shared: Arc<SearchState>,
    deadline: Option<Instant>,
}

impl<M: 'static> Worker<M> {
    fn run(self) -> SearchResult<()> {
        while !self.shared.should_stop(self.deadline, self.config.max_tests) {
            let candidate = self.shared.next_candidate.fetch_add(1, Ordering::Relaxed);
            let seed = derive_seed(self.config.seed, CANDIDATE_STREAM, candidate as u64);
            let suite = match Generator::new(Arc::clone(&self.model), self.generation.clone())
                .generate(seed)
            {
                Ok(suite) => suite,
                Err(e) => {
                    self.shared.stop.store(true, Ordering::Relaxed);
                    return Err(e.into());
                }
            };
            self.shared.tests.fetch_add(suite.len(), Ordering::Relaxed);
            self.shared.candidates.fetch_add(1, Ordering::Relaxed);

            let (score, selected) = select_greedy(&suite, self.score.as_ref());
            debug!(candidate, score, selected = selected.len(), "candidate scored");
            self.shared
                .offer(candidate, seed, score, selected, &self.listeners);
            if self.config.threshold.is_some_and(|t| score >= t) {
                self.shared.halt(StopReason::Threshold);
            }
        }
        Ok(())
    }
}

/// Searches for the suite that maximizes a score function.
pub struct GreedyOptimizer<M> {
    model: Arc<Model<M>>,
    generation: GenerationConfig,
    config: GreedyConfig,
    score: Arc<dyn ScoreFunction>,
    listeners: Vec<IterationListener>,
}

impl<M: 'static> GreedyOptimizer<M> {
    /// The suite end condition of `generation` is replaced by `config.population`.
    pub fn new(
        model: Arc<Model<M>>,
        generation: GenerationConfig,
        config: GreedyConfig,
        score: impl ScoreFunction + 'static,
    ) -> Self {
        GreedyOptimizer {
            model,
            generation,
            config,
            score: Arc::new(score),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_iteration_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Improvement<'_>) + Send + Sync + 'static,
    {
        self.add_iteration_listener(listener);
        self
    }

    pub fn add_iteration_listener<F>(&mut self, listener: F)
    where
        F: Fn(&Improvement<'_>) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn config(&self) -> &GreedyConfig {
        &self.config
    }

    pub fn search(&self) -> SearchResult<GreedyResult> {
        self.config.validate()?;
        let generation = GenerationConfig {
            suite_end: EndCondition::Length(self.config.population),
            ..self.generation.clone()
        };
        generation.validate()?;

        let workers = resolve_parallelism(self.config.parallelism);
        let started = Instant::now();
        let deadline = (!self.config.timeout.is_zero()).then(|| started + self.config.timeout);
        let shared = Arc::new(SearchState::default());
        info!(
            seed = self.config.seed,
            population = self.config.population,
            workers,
            "greedy search started"
        );

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let worker = Worker {
                    model: Arc::clone(&self.model),
                    generation: generation.clone(),
                    config: self.config.clone(),
                    score: Arc::clone(&self.score),
                    listeners: self.listeners.clone(),
                    shared: Arc::clone(&shared),
                    deadline,
                };
                thread::spawn(move || worker.run())
            })
            .collect();

        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(SearchError::WorkerPanicked);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let best = shared
            .best
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SearchError::NoCandidates)?;
        let stop = *shared.reason.lock().unwrap_or_else(PoisonError::into_inner);
        let result = GreedyResult {
            score: best.score,
            suite: best.suite,
            candidate: best.candidate,
            seed: best.seed,
            tests_generated: shared.tests.load(Ordering::Relaxed),
            candidates: shared.candidates.load(Ordering::Relaxed),
            improvements: shared.improvements.load(Ordering::Relaxed),
            stop,
            elapsed: started.elapsed(),
        };
        info!(
            score = result.score,
            tests_generated = result.tests_generated,
            candidates = result.candidates,
            stop = ?result.stop,
            "greedy search finished"
        );
        Ok(result)
    }
}
