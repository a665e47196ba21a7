use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepforge_core::{
    EndCondition, GenerationConfig, Generator, Model, ModelBuilder, Scenario, StepDescriptor,
    TestCase,
};
use stepforge_search::{Reducer, ReducerConfig, ReducerOutcome, SearchError};

#[derive(Default)]
struct Trigger {
    armed: bool,
}

/// Firing while armed fails. The shortest failing test is `arm, fire`.
fn trigger() -> Arc<Model<Trigger>> {
    Arc::new(
        ModelBuilder::<Trigger>::new("trigger")
            .factory(Trigger::default)
            .add_step(StepDescriptor::new("noise", |_, _| Ok(())).weight(4))
            .step("arm", |t, _| {
                t.armed = true;
                Ok(())
            })
            .step("disarm", |t, _| {
                t.armed = false;
                Ok(())
            })
            .step("fire", |t, _| {
                if t.armed {
                    Err("fired while armed".into())
                } else {
                    Ok(())
                }
            })
            .build()
            .unwrap(),
    )
}

/// Never fails.
fn calm() -> Arc<Model<()>> {
    Arc::new(
        ModelBuilder::<()>::new("calm")
            .factory(|| ())
            .add_step(StepDescriptor::new("noise", |_, _| Ok(())).weight(4))
            .step("rest", |_, _| Ok(()))
            .build()
            .unwrap(),
    )
}

#[derive(Default)]
struct Gate {
    opened: u32,
    closed: bool,
}

/// `open` is only enabled before `close`; `boom` fails after two opens.
/// Shrinking under a relaxed scenario runs into dead ends.
fn gate() -> Arc<Model<Gate>> {
    Arc::new(
        ModelBuilder::<Gate>::new("gate")
            .factory(Gate::default)
            .add_step(
                StepDescriptor::new("open", |g: &mut Gate, _| {
                    g.opened += 1;
                    Ok(())
                })
                .guard(|g: &Gate, _| !g.closed),
            )
            .step("close", |g, _| {
                g.closed = true;
                Ok(())
            })
            .step("boom", |g, _| {
                if g.opened >= 2 {
                    Err("opened twice".into())
                } else {
                    Ok(())
                }
            })
            .build()
            .unwrap(),
    )
}

struct Latch {
    tripped: Arc<AtomicBool>,
}

/// Fails on `fire`, which needs two earlier steps. Every suite after the
/// first failure fails to start.
fn latch() -> Arc<Model<Latch>> {
    let tripped = Arc::new(AtomicBool::new(false));
    Arc::new(
        ModelBuilder::<Latch>::new("latch")
            .factory(move || Latch {
                tripped: Arc::clone(&tripped),
            })
            .add_step(StepDescriptor::new("noise", |_, _| Ok(())).weight(4))
            .add_step(
                StepDescriptor::new("fire", |l: &mut Latch, _| {
                    l.tripped.store(true, Ordering::SeqCst);
                    Err("fired".into())
                })
                .guard(|_: &Latch, g| g.test.len() >= 2),
            )
            .before_suite(|l, _| {
                if l.tripped.load(Ordering::SeqCst) {
                    Err("latch tripped".into())
                } else {
                    Ok(())
                }
            })
            .build()
            .unwrap(),
    )
}

fn config() -> ReducerConfig {
    ReducerConfig {
        seed: 111,
        population: 1000,
        length: 20,
        total_time: Duration::from_secs(60),
        parallelism: 2,
        ..Default::default()
    }
}

#[test]
fn test_shrinks_to_minimal_failure() {
    let reducer = Reducer::new(trigger(), GenerationConfig::default(), config());
    let (state, invariants) = match reducer.reduce().unwrap() {
        ReducerOutcome::Reduced {
            state, invariants, ..
        } => (state, invariants),
        other => panic!("expected Reduced, got {:?}", other),
    };

    assert_eq!(state.seed(), 111);
    assert_eq!(state.shortest_length(), Some(2));
    assert_eq!(state.tests().len(), 1);
    assert_eq!(state.tests()[0].step_names(), ["arm", "fire"]);
    for test in state.history() {
        let failure = test.failure().unwrap();
        assert_eq!(failure.target, "fire");
        assert_eq!(failure.message, "fired while armed");
    }
    assert!(state.tests_generated() >= state.history().len());
    assert_eq!(invariants.last_steps(), ["fire"]);
    assert_eq!(invariants.tests(), state.history().len());
}

#[test]
fn test_attempt_lengths_decrease() {
    let reducer = Reducer::new(trigger(), GenerationConfig::default(), config());
    let outcome = reducer.reduce().unwrap();
    let state = outcome.state().unwrap();
    let lengths = state.lengths();
    assert!(!lengths.is_empty());
    assert!(lengths[0] <= 10, "first target halves the fuzz length: {:?}", lengths);
    assert!(lengths.windows(2).all(|w| w[0] > w[1]), "{:?}", lengths);
    assert_eq!(lengths.last(), Some(&1));
}

#[test]
fn test_minimal_test_reproduces_under_its_scenario() {
    let reducer = Reducer::new(trigger(), GenerationConfig::default(), config());
    let outcome = reducer.reduce().unwrap();
    let minimal = &outcome.state().unwrap().tests()[0];

    let generation = GenerationConfig {
        test_end: EndCondition::Length(minimal.len()),
        suite_end: EndCondition::Length(50),
        scenario: Some(Scenario::from_test(minimal)),
        ..Default::default()
    };
    let suite = Generator::new(trigger(), generation).generate(5).unwrap();
    assert!(suite
        .failed_tests()
        .any(|t| t.failure().is_some_and(|f| f.target == "fire")));
}

#[test]
fn test_same_seed_same_reduction() {
    let a = Reducer::new(trigger(), GenerationConfig::default(), config())
        .reduce()
        .unwrap();
    let b = Reducer::new(trigger(), GenerationConfig::default(), config())
        .reduce()
        .unwrap();
    let (a, b) = (a.state().unwrap(), b.state().unwrap());
    assert_eq!(a.lengths(), b.lengths());
    let names = |tests: &[TestCase]| -> Vec<Vec<String>> {
        tests
            .iter()
            .map(|t| t.step_names().into_iter().map(String::from).collect())
            .collect()
    };
    assert_eq!(names(a.history()), names(b.history()));
}

#[test]
fn test_dead_ends_do_not_abort_reduction() {
    let generation = GenerationConfig {
        fail_on_dead_end: true,
        ..Default::default()
    };
    for seed in 0..20 {
        let config = ReducerConfig {
            seed,
            population: 200,
            parallelism: 1,
            ..config()
        };
        let outcome = match Reducer::new(gate(), generation.clone(), config).reduce() {
            Ok(outcome) => outcome,
            Err(e) => panic!("seed {}: reduction failed: {}", seed, e),
        };
        let state = outcome.state().unwrap();
        for test in state.tests() {
            assert!(test.count("open") >= 2, "seed {}: {:?}", seed, test.step_names());
            assert_eq!(test.failure().unwrap().target, "boom");
        }
        assert!(state.shortest_length().unwrap() >= 3);
    }
}

#[test]
fn test_generation_errors_reject_shrink_candidates() {
    let config = ReducerConfig {
        population: 100,
        parallelism: 1,
        ..config()
    };
    let outcome = Reducer::new(latch(), GenerationConfig::default(), config)
        .reduce()
        .unwrap();
    let state = outcome.state().unwrap();
    assert_eq!(state.history().len(), 1);
    assert_eq!(state.lengths().len(), 1);
    let first = &state.tests()[0];
    assert_eq!(first.last_step().map(|s| s.name.as_str()), Some("fire"));
    assert!(state.tests_generated() > 100);
}

#[test]
fn test_not_reproduced() {
    let config = ReducerConfig {
        population: 50,
        length: 5,
        ..config()
    };
    match Reducer::new(calm(), GenerationConfig::default(), config).reduce() {
        Ok(ReducerOutcome::NotReproduced { tests_generated }) => assert_eq!(tests_generated, 50),
        other => panic!("expected NotReproduced, got {:?}", other),
    }
}

#[test]
fn test_custom_failure_predicate() {
    let config = ReducerConfig {
        failure: Some(Arc::new(|t: &TestCase| t.count("noise") >= 3)),
        same_failure: false,
        ..config()
    };
    let outcome = Reducer::new(calm(), GenerationConfig::default(), config)
        .reduce()
        .unwrap();
    let state = outcome.state().unwrap();
    let shortest = state.shortest_length().unwrap();
    assert!((3..=4).contains(&shortest), "shortest {}", shortest);
    for test in state.tests() {
        assert!(test.count("noise") >= 3);
        assert!(!test.is_errored());
    }
}

#[test]
fn test_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = ReducerConfig {
        output_dir: Some(dir.path().to_path_buf()),
        test_mode: true,
        ..config()
    };
    let outcome = Reducer::new(trigger(), GenerationConfig::default(), config)
        .reduce()
        .unwrap();
    let path = match outcome {
        ReducerOutcome::Reduced {
            report: Some(path), ..
        } => path,
        other => panic!("expected a report path, got {:?}", other),
    };
    assert_eq!(path, dir.path().join("reducer-111").join("reducer-final.txt"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("seed: 111\n"), "{}", text);
    assert!(text.contains("iteration lengths: ["), "{}", text);
    assert!(text.contains("failed in step 'fire': fired while armed"), "{}", text);
    assert!(!text.contains("time:"));
    assert!(dir.path().join("reducer-111").join("final-tests.json").exists());
}

#[test]
fn test_invalid_config() {
    let config = ReducerConfig {
        length: 0,
        ..config()
    };
    match Reducer::new(trigger(), GenerationConfig::default(), config).reduce() {
        Err(SearchError::InvalidConfig(msg)) => assert!(msg.contains("length")),
        other => panic!("expected InvalidConfig, got {:?}", other),
    }
}
