//! Phase Registry
//!
//! Named phases per pipeline with soft `run_before` / `run_after`
//! constraints, and the topological ordering built from them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle stage made of an ordered set of phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Setup,
    Execute,
    Analyze,
    Archive,
}

impl Pipeline {
    pub const ALL: [Pipeline; 4] = [
        Pipeline::Setup,
        Pipeline::Execute,
        Pipeline::Analyze,
        Pipeline::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Setup => "setup",
            Pipeline::Execute => "execute",
            Pipeline::Analyze => "analyze",
            Pipeline::Archive => "archive",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pipeline::ALL
            .iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| Error::UnknownPipeline(s.to_string()))
    }
}

/// Declaration of one phase within one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub pipeline: Pipeline,
    /// Phases this one must precede (ignored if absent from the pipeline)
    pub run_before: Vec<String>,
    /// Phases this one must follow (ignored if absent from the pipeline)
    pub run_after: Vec<String>,
}

/// Phase declarations grouped by pipeline, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PhaseRegistry {
    pipelines: BTreeMap<Pipeline, Vec<Phase>>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a phase in a pipeline.
    ///
    /// Re-registering a name within the same pipeline replaces its
    /// constraints and keeps its original declaration position.
    pub fn register<B, A>(&mut self, name: &str, pipeline: Pipeline, run_before: B, run_after: A)
    where
        B: IntoIterator,
        B::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let phase = Phase {
            name: name.to_string(),
            pipeline,
            run_before: run_before.into_iter().map(Into::into).collect(),
            run_after: run_after.into_iter().map(Into::into).collect(),
        };

        let phases = self.pipelines.entry(pipeline).or_default();
        match phases.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                debug!("Overriding phase '{}' in pipeline '{}'", name, pipeline);
                *existing = phase;
            }
            None => phases.push(phase),
        }
    }

    /// Removes a phase from a pipeline.
    pub fn unregister(&mut self, name: &str, pipeline: Pipeline) -> Option<Phase> {
        let phases = self.pipelines.get_mut(&pipeline)?;
        let index = phases.iter().position(|p| p.name == name)?;
        Some(phases.remove(index))
    }

    /// Phases of a pipeline in declaration order.
    pub fn phases(&self, pipeline: Pipeline) -> &[Phase] {
        self.pipelines
            .get(&pipeline)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Pipelines a phase name participates in.
    pub fn pipelines_of(&self, name: &str) -> BTreeSet<Pipeline> {
        self.pipelines
            .iter()
            .filter(|(_, phases)| phases.iter().any(|p| p.name == name))
            .map(|(pipeline, _)| *pipeline)
            .collect()
    }

    /// Applies every declaration of `other` on top of this registry.
    pub fn overlay(&mut self, other: &PhaseRegistry) {
        for phase in other.pipelines.values().flatten() {
            self.register(
                &phase.name,
                phase.pipeline,
                phase.run_before.iter().cloned(),
                phase.run_after.iter().cloned(),
            );
        }
    }

    /// Computes the execution order of a pipeline using Kahn's algorithm.
    ///
    /// Unconstrained phases keep their declaration order. Constraints naming
    /// phases outside the pipeline are ignored; a constraint loop is an
    /// [`Error::PhaseCycle`].
    pub fn build_order(&self, pipeline: Pipeline) -> Result<Vec<String>> {
        let phases = self.phases(pipeline);
        let index: HashMap<&str, usize> = phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();

        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); phases.len()];
        let mut in_degree = vec![0usize; phases.len()];

        for (i, phase) in phases.iter().enumerate() {
            for before in &phase.run_before {
                if let Some(&j) = index.get(before.as_str()) {
                    if successors[i].insert(j) {
                        in_degree[j] += 1;
                    }
                }
            }
            for after in &phase.run_after {
                if let Some(&j) = index.get(after.as_str()) {
                    if successors[j].insert(i) {
                        in_degree[i] += 1;
                    }
                }
            }
        }

        // Always pick the earliest-declared ready phase
        let mut ready: BTreeSet<usize> = (0..phases.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(phases.len());

        while let Some(current) = ready.pop_first() {
            order.push(current);
            for &next in &successors[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != phases.len() {
            let placed: BTreeSet<usize> = order.iter().copied().collect();
            let stuck = (0..phases.len())
                .filter(|i| !placed.contains(i))
                .map(|i| phases[i].name.clone())
                .collect();
            return Err(Error::PhaseCycle {
                pipeline,
                phases: stuck,
            });
        }

        let names: Vec<String> = order.into_iter().map(|i| phases[i].name.clone()).collect();
        debug!("Phase order for '{}': {:?}", pipeline, names);
        Ok(names)
    }
}
