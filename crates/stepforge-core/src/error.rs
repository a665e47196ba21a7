//! Error types for model construction and test generation.

use crate::model::Phase;
use crate::suite::TestSuite;
use thiserror::Error;

/// Error type returned by user hooks and step actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a hook or step action invocation.
pub type HookResult = Result<(), BoxError>;

/// Model declaration error, reported by `ModelBuilder::build` before any generation starts.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model '{model}' declares no selectable steps")]
    NoSteps { model: String },

    #[error("model '{model}' has no instance factory")]
    MissingFactory { model: String },

    #[error("duplicate step: {name}")]
    DuplicateStep { name: String },

    #[error("{phase} targets unknown step: {name}")]
    UnknownStep { phase: Phase, name: String },

    #[error("step '{name}' has zero weight")]
    ZeroWeight { name: String },

    #[error("{phase} target lists no steps")]
    EmptyTarget { phase: Phase },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Test generation error.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A hook or step action failed; wrapped with the failing invocation point.
    #[error("{phase} '{target}' failed: {source}")]
    Invocation {
        phase: Phase,
        target: String,
        #[source]
        source: BoxError,
    },

    /// A hook or step action failed and `unwrap_errors` is set: the user error as-is.
    #[error("{0}")]
    Unwrapped(BoxError),

    /// No step was enabled before the test end condition held.
    #[error("dead end in test {test_id}: no enabled steps after {steps} steps")]
    DeadEnd { test_id: usize, steps: usize },

    /// A fatal error stopped the suite; the tests generated so far are preserved.
    #[error("suite aborted after {tests} tests: {cause}")]
    Aborted {
        tests: usize,
        suite: Box<TestSuite>,
        cause: Box<GenerationError>,
    },

    #[error("test {test_id} is sealed")]
    SealedTest { test_id: usize },

    #[error("invalid generation config: {0}")]
    InvalidConfig(String),
}

impl GenerationError {
    /// The partial suite preserved by an aborted run.
    pub fn partial_suite(&self) -> Option<&TestSuite> {
        match self {
            GenerationError::Aborted { suite, .. } => Some(suite),
            _ => None,
        }
    }

    /// The error that caused an abort, or `self` for every other variant.
    pub fn root_cause(&self) -> &GenerationError {
        match self {
            GenerationError::Aborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Invocation point of the failure, when known.
    pub fn phase(&self) -> Option<Phase> {
        match self.root_cause() {
            GenerationError::Invocation { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type GenResult<T> = Result<T, GenerationError>;
