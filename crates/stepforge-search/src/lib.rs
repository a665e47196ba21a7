//! Search over generated suites.
//!
//! - [`greedy`]: parallel search for the best-scoring suite.
//! - [`reducer`]: fuzz for a failing test, then shrink it.
//! - [`analyzer`]: invariants shared by a set of failing tests.
//! - [`report`]: reducer report files.

pub mod analyzer;
pub mod error;
pub mod greedy;
pub mod reducer;
pub mod report;

pub use analyzer::{Analyzer, Invariants, Precedence, StepRange};
pub use error::{SearchError, SearchResult};
pub use greedy::{
    GreedyConfig, GreedyOptimizer, GreedyResult, Improvement, IterationListener, StopReason,
};
pub use reducer::{FailurePredicate, Reducer, ReducerConfig, ReducerOutcome, ReducerState};

/// Seed for candidate `index` of `stream`, derived from a base seed.
///
/// Mixes with splitmix64 so neighbouring indices give unrelated seeds.
pub fn derive_seed(base: u64, stream: u64, index: u64) -> u64 {
    let mut z = base
        ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ index.wrapping_add(1).wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Worker count for a configured parallelism. 0 means one per available core.
pub(crate) fn resolve_parallelism(parallelism: usize) -> usize {
    if parallelism > 0 {
        parallelism
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
