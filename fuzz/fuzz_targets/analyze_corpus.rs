#![no_main]
use libfuzzer_sys::fuzz_target;
use stepforge_core::TestCase;
use stepforge_search::Analyzer;

const STEPS: [&str; 6] = ["open", "read", "write", "seek", "close", "unused"];

fuzz_target!(|data: &[u8]| {
    // 0xFF separates tests; every other byte picks a step.
    let tests: Vec<TestCase> = data
        .split(|b| *b == 0xFF)
        .take(16)
        .enumerate()
        .map(|(id, chunk)| {
            TestCase::from_steps(id, chunk.iter().take(64).map(|b| STEPS[*b as usize % 5]))
        })
        .collect();
    let invariants = Analyzer::new(STEPS).analyze(&tests);
    assert!(invariants.missing_steps().iter().any(|s| s == "unused"));
    for run in invariants.sequence_patterns() {
        assert!(!run.is_empty());
    }
    let _ = invariants.to_string();
});
