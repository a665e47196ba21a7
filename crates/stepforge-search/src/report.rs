//! Reducer report files.
//!
//! A reduction writes two files under `<dir>/reducer-<seed>/`:
//! `reducer-final.txt`, a readable summary, and `final-tests.json`, the
//! minimal tests as JSON.

use crate::analyzer::Invariants;
use crate::error::SearchResult;
use crate::reducer::ReducerState;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_FILE: &str = "reducer-final.txt";
pub const TESTS_FILE: &str = "final-tests.json";

/// Directory a reduction with `seed` reports into.
pub fn report_dir(root: &Path, seed: u64) -> PathBuf {
    root.join(format!("reducer-{}", seed))
}

/// Readable summary of a reduction. Timing is left out when `include_timing`
/// is false.
pub fn reducer_report(state: &ReducerState, invariants: &Invariants, include_timing: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "seed: {}", state.seed());
    let _ = writeln!(out, "tests generated: {}", state.tests_generated());
    if include_timing {
        let _ = writeln!(out, "time: {:.3}s", state.elapsed().as_secs_f64());
    }
    let _ = writeln!(out, "iteration lengths: {:?}", state.lengths());
    match state.shortest_length() {
        Some(len) => {
            let _ = writeln!(out, "final tests: {} of length {}", state.tests().len(), len);
        }
        None => {
            let _ = writeln!(out, "final tests: none");
        }
    }
    for (i, test) in state.tests().iter().enumerate() {
        let _ = writeln!(out, "test {}:", i + 1);
        for step in test.step_names() {
            let _ = writeln!(out, "  {}", step);
        }
        if let Some(failure) = test.failure() {
            let _ = writeln!(
                out,
                "  failed in {} '{}': {}",
                failure.phase, failure.target, failure.message
            );
        }
    }
    let _ = writeln!(out);
    let _ = write!(out, "{}", invariants);
    out
}

/// Write both report files and return the summary path.
pub fn write_reducer_report(
    root: &Path,
    state: &ReducerState,
    invariants: &Invariants,
    test_mode: bool,
) -> SearchResult<PathBuf> {
    let dir = report_dir(root, state.seed());
    fs::create_dir_all(&dir)?;
    let summary = dir.join(SUMMARY_FILE);
    fs::write(&summary, reducer_report(state, invariants, !test_mode))?;
    let json = serde_json::to_string_pretty(state.tests())?;
    fs::write(dir.join(TESTS_FILE), json)?;
    info!(path = %summary.display(), "wrote reducer report");
    Ok(summary)
}
