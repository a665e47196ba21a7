//! Invariants shared by a set of tests.
//!
//! Given the failing tests found by the reducer, report what they have in
//! common: how often each step ran, which steps never ran, how the tests end,
//! which steps always come before others, and which step sequences appear in
//! every test.

use indexmap::IndexSet;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use stepforge_core::TestCase;
use tracing::debug;

/// Occurrence range of one step across the analyzed tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRange {
    pub step: String,
    pub min: usize,
    pub max: usize,
}

impl fmt::Display for StepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}-{}", self.step, self.min, self.max)
    }
}

/// `before` first occurs ahead of `after` in every analyzed test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Precedence {
    pub before: String,
    pub after: String,
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.before, self.after)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Invariants {
    tests: usize,
    step_counts: Vec<StepRange>,
    missing_steps: Vec<String>,
    last_steps: Vec<String>,
    precedences: Vec<Precedence>,
    sequences: Vec<Vec<String>>,
}

impl Invariants {
    /// Number of tests the invariants were computed from.
    pub fn tests(&self) -> usize {
        self.tests
    }

    /// Min/max count of every step that ran at least once, declared steps first.
    pub fn used_step_counts(&self) -> &[StepRange] {
        &self.step_counts
    }

    /// Declared steps that ran in none of the tests, in declaration order.
    pub fn missing_steps(&self) -> &[String] {
        &self.missing_steps
    }

    /// Distinct final steps, sorted.
    pub fn last_steps(&self) -> &[String] {
        &self.last_steps
    }

    pub fn precedence_patterns(&self) -> &[Precedence] {
        &self.precedences
    }

    /// Maximal contiguous step sequences present in every test, sorted.
    pub fn sequence_patterns(&self) -> &[Vec<String>] {
        &self.sequences
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

impl fmt::Display for Invariants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tests analyzed: {}", self.tests)?;
        writeln!(f, "step counts:")?;
        for range in &self.step_counts {
            writeln!(f, "  {}", range)?;
        }
        write!(f, "missing steps: ")?;
        write_list(f, &self.missing_steps)?;
        writeln!(f)?;
        write!(f, "last steps: ")?;
        write_list(f, &self.last_steps)?;
        writeln!(f)?;
        writeln!(f, "precedence patterns:")?;
        for precedence in &self.precedences {
            writeln!(f, "  {}", precedence)?;
        }
        writeln!(f, "sequence patterns:")?;
        for sequence in &self.sequences {
            write!(f, "  ")?;
            write_list(f, sequence)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Computes [`Invariants`] over tests of a model with the given steps.
#[derive(Debug, Clone)]
pub struct Analyzer {
    steps: Vec<String>,
}

impl Analyzer {
    /// `steps` are the model's declared step names; they fix the order of
    /// step counts and define which steps can be missing.
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Analyzer {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn analyze<'a, I>(&self, tests: I) -> Invariants
    where
        I: IntoIterator<Item = &'a TestCase>,
    {
        let tests: Vec<&TestCase> = tests.into_iter().collect();
        if tests.is_empty() {
            return Invariants {
                missing_steps: self.steps.clone(),
                ..Default::default()
            };
        }
        let names: Vec<Vec<&str>> = tests.iter().map(|t| t.step_names()).collect();

        let mut order: IndexSet<&str> = self.steps.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for test in &names {
            for &name in test {
                order.insert(name);
                seen.insert(name);
            }
        }

        let step_counts = order
            .iter()
            .filter(|name| seen.contains(*name))
            .map(|&name| {
                let counts = tests.iter().map(|t| t.count(name));
                StepRange {
                    step: name.to_string(),
                    min: counts.clone().min().unwrap_or(0),
                    max: counts.max().unwrap_or(0),
                }
            })
            .collect();

        let missing_steps = self
            .steps
            .iter()
            .filter(|s| !seen.contains(s.as_str()))
            .cloned()
            .collect();

        let last_steps: BTreeSet<&str> = names.iter().filter_map(|t| t.last().copied()).collect();

        let common: Vec<&str> = order
            .iter()
            .copied()
            .filter(|name| names.iter().all(|t| t.contains(name)))
            .collect();
        let precedences = precedences(&common, &names);
        let sequences = common_sequences(&names);

        debug!(
            tests = tests.len(),
            precedences = precedences.len(),
            sequences = sequences.len(),
            "analyzed tests"
        );

        Invariants {
            tests: tests.len(),
            step_counts,
            missing_steps,
            last_steps: last_steps.into_iter().map(String::from).collect(),
            precedences,
            sequences,
        }
    }
}

fn first_index(test: &[&str], step: &str) -> Option<usize> {
    test.iter().position(|s| *s == step)
}

/// Ordered pairs of common steps where the first always starts earlier.
fn precedences(common: &[&str], tests: &[Vec<&str>]) -> Vec<Precedence> {
    let mut found = BTreeSet::new();
    for &before in common {
        for &after in common {
            if before == after {
                continue;
            }
            let holds = tests.iter().all(|t| {
                matches!(
                    (first_index(t, before), first_index(t, after)),
                    (Some(a), Some(b)) if a < b
                )
            });
            if holds {
                found.insert(Precedence {
                    before: before.to_string(),
                    after: after.to_string(),
                });
            }
        }
    }
    found.into_iter().collect()
}

fn contains_run(haystack: &[&str], needle: &[&str]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Contiguous runs present in every test, minus those inside a longer one.
fn common_sequences(tests: &[Vec<&str>]) -> Vec<Vec<String>> {
    let Some(shortest) = tests.iter().min_by_key(|t| t.len()) else {
        return Vec::new();
    };
    let mut candidates: BTreeSet<Vec<&str>> = BTreeSet::new();
    for start in 0..shortest.len() {
        for end in start + 1..=shortest.len() {
            let run = &shortest[start..end];
            // Extending a run that is missing somewhere cannot make it common.
            if !tests.iter().all(|t| contains_run(t, run)) {
                break;
            }
            candidates.insert(run.to_vec());
        }
    }
    candidates
        .iter()
        .filter(|run| {
            !candidates
                .iter()
                .any(|other| other.len() > run.len() && contains_run(other, run))
        })
        .map(|run| run.iter().map(|s| s.to_string()).collect())
        .collect()
}
