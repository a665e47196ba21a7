//! Model-based test generation.
//!
//! A model is a set of named steps with guards, declared with
//! [`ModelBuilder`]. A [`Generator`] walks the model from a seed, choosing
//! among the enabled steps by weight, and records the walk as a
//! [`TestSuite`] of [`TestCase`]s. Generation is deterministic in the seed.

pub mod builder;
pub mod coverage;
pub mod end;
pub mod error;
pub mod generator;
pub mod listener;
pub mod model;
pub mod requirements;
pub mod scenario;
pub mod scope;
pub mod suite;

pub use builder::ModelBuilder;
pub use coverage::{CoverageScore, ScoreConfig, ScoreFunction, TestCoverage};
pub use end::{EndCondition, EndContext, EndScope};
pub use error::{BoxError, GenResult, GenerationError, HookResult, ModelError, ModelResult};
pub use generator::{GenerationConfig, Generator};
pub use listener::{GenerationListener, TracingListener};
pub use model::{Model, ModelSummary, Phase, StepDescriptor, Target};
pub use requirements::Requirements;
pub use scenario::{Scenario, Slice};
pub use scope::{GuardScope, StepScope};
pub use suite::{Lifecycle, TestCase, TestCaseStep, TestFailure, TestStatus, TestSuite};
