//! Phase Graph / Pipeline Executor
//!
//! Couples a [`PhaseRegistry`] with the bodies bound to its phase names and
//! runs a pipeline against one target in dependency order.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{Error, Result};

use super::registry::{Phase, PhaseRegistry, Pipeline};

/// Result of a phase body that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Done,
    /// The phase decided it has nothing to do
    Skipped(String),
}

impl PhaseOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        PhaseOutcome::Skipped(reason.into())
    }
}

/// Lifecycle of a phase within one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "UPPERCASE")]
pub enum PhaseState {
    Pending,
    Running,
    Done,
    Skipped(String),
    Failed(String),
}

impl PhaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseState::Done | PhaseState::Skipped(_) | PhaseState::Failed(_)
        )
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseState::Pending => write!(f, "PENDING"),
            PhaseState::Running => write!(f, "RUNNING"),
            PhaseState::Done => write!(f, "DONE"),
            PhaseState::Skipped(_) => write!(f, "SKIPPED"),
            PhaseState::Failed(_) => write!(f, "FAILED"),
        }
    }
}

/// Something a pipeline runs against.
///
/// The executor notifies the target around every phase so it can start a
/// fresh expansion stage and persist progress.
pub trait PhaseTarget {
    /// Name used in diagnostics
    fn target_name(&self) -> String;

    /// Called right before a phase body runs.
    fn begin_phase(&mut self, _pipeline: Pipeline, _phase: &str) {}

    /// Called once a phase reached a terminal state.
    fn end_phase(&mut self, _pipeline: Pipeline, _phase: &str, _state: &PhaseState) {}
}

/// Phase body: reads the shared context, mutates the target.
pub type PhaseFn<C, T> = Arc<dyn Fn(&C, &mut T) -> Result<PhaseOutcome> + Send + Sync>;

/// Final state and duration of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub name: String,
    pub state: PhaseState,
    pub duration_ms: u64,
}

/// What happened during one `execute` call.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub pipeline: Pipeline,
    pub target: String,
    pub phases: Vec<PhaseRecord>,
}

impl PipelineReport {
    pub fn new(pipeline: Pipeline, target: impl Into<String>) -> Self {
        Self {
            pipeline,
            target: target.into(),
            phases: Vec::new(),
        }
    }

    pub fn state_of(&self, phase: &str) -> Option<&PhaseState> {
        self.phases
            .iter()
            .find(|record| record.name == phase)
            .map(|record| &record.state)
    }

    /// Names of the phases that ran to completion, in order.
    pub fn completed(&self) -> Vec<&str> {
        self.phases
            .iter()
            .filter(|record| record.state == PhaseState::Done)
            .map(|record| record.name.as_str())
            .collect()
    }

    pub fn skipped(&self) -> usize {
        self.phases
            .iter()
            .filter(|record| matches!(record.state, PhaseState::Skipped(_)))
            .count()
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.phases.iter().map(|record| record.duration_ms).sum()
    }
}

/// Registry plus bodies, generic over the shared context `C` and the
/// per-run target `T`.
pub struct PhaseGraph<C, T> {
    registry: PhaseRegistry,
    bodies: HashMap<String, PhaseFn<C, T>>,
    order_cache: Mutex<HashMap<Pipeline, Vec<String>>>,
}

impl<C, T> Default for PhaseGraph<C, T> {
    fn default() -> Self {
        Self {
            registry: PhaseRegistry::new(),
            bodies: HashMap::new(),
            order_cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<C, T> Clone for PhaseGraph<C, T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            bodies: self.bodies.clone(),
            order_cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<C, T> fmt::Debug for PhaseGraph<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bound: Vec<&String> = self.bodies.keys().collect();
        bound.sort();
        f.debug_struct("PhaseGraph")
            .field("registry", &self.registry)
            .field("bound", &bound)
            .finish()
    }
}

impl<C, T: PhaseTarget> PhaseGraph<C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every declaration and body for further specialization.
    pub fn derive(&self) -> Self {
        self.clone()
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// Declares a phase; see [`PhaseRegistry::register`].
    pub fn register<B, A>(&mut self, name: &str, pipeline: Pipeline, run_before: B, run_after: A)
    where
        B: IntoIterator,
        B::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        self.registry.register(name, pipeline, run_before, run_after);
        self.invalidate();
    }

    /// Binds (or rebinds) the body executed for a phase name in every
    /// pipeline it is registered in.
    pub fn bind<F>(&mut self, name: &str, body: F)
    where
        F: Fn(&C, &mut T) -> Result<PhaseOutcome> + Send + Sync + 'static,
    {
        self.bodies.insert(name.to_string(), Arc::new(body));
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Applies the declarations and bodies of `other` on top of this graph.
    pub fn overlay(&mut self, other: &PhaseGraph<C, T>) {
        self.registry.overlay(&other.registry);
        for (name, body) in &other.bodies {
            self.bodies.insert(name.clone(), Arc::clone(body));
        }
        self.invalidate();
    }

    pub fn phases(&self, pipeline: Pipeline) -> &[Phase] {
        self.registry.phases(pipeline)
    }

    /// Topological phase order of a pipeline, computed once and cached.
    pub fn build_order(&self, pipeline: Pipeline) -> Result<Vec<String>> {
        if let Ok(cache) = self.order_cache.lock() {
            if let Some(order) = cache.get(&pipeline) {
                return Ok(order.clone());
            }
        }

        let order = self.registry.build_order(pipeline)?;
        if let Ok(mut cache) = self.order_cache.lock() {
            cache.insert(pipeline, order.clone());
        }
        Ok(order)
    }

    /// Runs every phase of `pipeline` against `target`, in order.
    ///
    /// A failing or panicking phase aborts the remainder; the returned
    /// error is an [`Error::PhaseFailed`] naming phase, pipeline and target
    /// and carrying the records of the phases reached so far.
    pub fn execute(
        &self,
        pipeline: Pipeline,
        context: &C,
        target: &mut T,
    ) -> Result<PipelineReport> {
        let order = self.build_order(pipeline)?;
        let target_name = target.target_name();
        let mut report = PipelineReport::new(pipeline, target_name.clone());

        debug!(
            "Executing pipeline '{}' for '{}': {} phase(s)",
            pipeline,
            target_name,
            order.len()
        );

        for name in order {
            let Some(body) = self.bodies.get(&name) else {
                warn!(
                    "Phase '{}' of pipeline '{}' has no body, skipping",
                    name, pipeline
                );
                let state = PhaseState::Skipped("no body bound".to_string());
                target.end_phase(pipeline, &name, &state);
                report.phases.push(PhaseRecord {
                    name,
                    state,
                    duration_ms: 0,
                });
                continue;
            };

            target.begin_phase(pipeline, &name);
            info!("  [{}] {} ...", target_name, name);

            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| body(context, target)))
                .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
            let duration_ms = start.elapsed().as_millis() as u64;

            let state = match &result {
                Ok(PhaseOutcome::Done) => PhaseState::Done,
                Ok(PhaseOutcome::Skipped(reason)) => {
                    debug!("Phase '{}' skipped: {}", name, reason);
                    PhaseState::Skipped(reason.clone())
                }
                Err(e) => PhaseState::Failed(e.to_string()),
            };
            target.end_phase(pipeline, &name, &state);
            report.phases.push(PhaseRecord {
                name: name.clone(),
                state,
                duration_ms,
            });

            if let Err(source) = result {
                return Err(Error::PhaseFailed {
                    phase: name,
                    pipeline,
                    experiment: target_name,
                    source: Box::new(source),
                    phases: report.phases,
                });
            }
        }

        Ok(report)
    }

    fn invalidate(&mut self) {
        if let Ok(cache) = self.order_cache.get_mut() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[derive(Default)]
    struct Recorder {
        ran: Vec<String>,
        transitions: Vec<(String, String)>,
        stages_started: usize,
    }

    impl PhaseTarget for Recorder {
        fn target_name(&self) -> String {
            "recorder".to_string()
        }

        fn begin_phase(&mut self, _pipeline: Pipeline, _phase: &str) {
            self.stages_started += 1;
        }

        fn end_phase(&mut self, _pipeline: Pipeline, phase: &str, state: &PhaseState) {
            self.transitions.push((phase.to_string(), state.to_string()));
        }
    }

    fn recording(name: &'static str) -> impl Fn(&(), &mut Recorder) -> Result<PhaseOutcome> {
        move |_: &(), target: &mut Recorder| {
            target.ran.push(name.to_string());
            Ok(PhaseOutcome::Done)
        }
    }

    #[test]
    fn test_execute_in_dependency_order() {
        let mut graph: PhaseGraph<(), Recorder> = PhaseGraph::new();
        graph.register("A", Pipeline::Setup, NONE, NONE);
        graph.register("B", Pipeline::Setup, NONE, ["A"]);
        graph.register("C", Pipeline::Setup, ["A"], NONE);
        for name in ["A", "B", "C"] {
            graph.bind(name, recording(name));
        }

        let mut target = Recorder::default();
        let report = graph.execute(Pipeline::Setup, &(), &mut target).unwrap();

        assert_eq!(target.ran, vec!["C", "A", "B"]);
        assert_eq!(report.completed(), vec!["C", "A", "B"]);
        assert_eq!(target.stages_started, 3);
    }

    #[test]
    fn test_failure_aborts_remaining_phases() {
        let mut graph: PhaseGraph<(), Recorder> = PhaseGraph::new();
        graph.register("first", Pipeline::Analyze, NONE, NONE);
        graph.register("broken", Pipeline::Analyze, NONE, ["first"]);
        graph.register("last", Pipeline::Analyze, NONE, ["broken"]);
        graph.bind("first", recording("first"));
        graph.bind("broken", |_, _| {
            Err(Error::CyclicExpansion {
                chain: vec!["a".into(), "b".into(), "a".into()],
            })
        });
        graph.bind("last", recording("last"));

        let mut target = Recorder::default();
        let err = graph
            .execute(Pipeline::Analyze, &(), &mut target)
            .unwrap_err();

        match err {
            Error::PhaseFailed {
                phase,
                pipeline,
                experiment,
                source,
                phases,
            } => {
                assert_eq!(phase, "broken");
                assert_eq!(pipeline, Pipeline::Analyze);
                assert_eq!(experiment, "recorder");
                assert!(matches!(*source, Error::CyclicExpansion { .. }));
                let reached: Vec<(&str, &PhaseState)> =
                    phases.iter().map(|r| (r.name.as_str(), &r.state)).collect();
                assert_eq!(reached.len(), 2);
                assert_eq!(reached[0], ("first", &PhaseState::Done));
                assert_eq!(reached[1].0, "broken");
                assert!(matches!(reached[1].1, PhaseState::Failed(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(target.ran, vec!["first"]);
        assert_eq!(
            target.transitions.last().map(|(_, s)| s.as_str()),
            Some("FAILED")
        );
    }

    #[test]
    fn test_unbound_and_self_skipping_phases() {
        let mut graph: PhaseGraph<(), Recorder> = PhaseGraph::new();
        graph.register("unbound", Pipeline::Execute, NONE, NONE);
        graph.register("lazy", Pipeline::Execute, NONE, NONE);
        graph.bind("lazy", |_, _| Ok(PhaseOutcome::skipped("nothing to do")));

        let mut target = Recorder::default();
        let report = graph.execute(Pipeline::Execute, &(), &mut target).unwrap();

        assert_eq!(report.skipped(), 2);
        assert!(report.completed().is_empty());
        assert_eq!(
            report.state_of("lazy"),
            Some(&PhaseState::Skipped("nothing to do".to_string()))
        );
        // begin_phase only fires for phases with a body
        assert_eq!(target.stages_started, 1);
    }

    #[test]
    fn test_register_invalidates_cached_order() {
        let mut graph: PhaseGraph<(), Recorder> = PhaseGraph::new();
        graph.register("x", Pipeline::Setup, NONE, NONE);
        graph.register("y", Pipeline::Setup, NONE, NONE);
        assert_eq!(graph.build_order(Pipeline::Setup).unwrap(), vec!["x", "y"]);

        graph.register("x", Pipeline::Setup, NONE, ["y"]);
        assert_eq!(graph.build_order(Pipeline::Setup).unwrap(), vec!["y", "x"]);
    }

    #[test]
    fn test_derive_overrides_without_touching_base() {
        let mut base: PhaseGraph<(), Recorder> = PhaseGraph::new();
        base.register("run", Pipeline::Setup, NONE, NONE);
        base.bind("run", recording("base"));

        let mut derived = base.derive();
        derived.bind("run", recording("derived"));
        derived.register("prepare", Pipeline::Setup, ["run"], NONE);
        derived.bind("prepare", recording("prepare"));

        let mut target = Recorder::default();
        base.execute(Pipeline::Setup, &(), &mut target).unwrap();
        derived.execute(Pipeline::Setup, &(), &mut target).unwrap();
        assert_eq!(target.ran, vec!["base", "prepare", "derived"]);
    }

    #[test]
    fn test_cycle_fails_before_any_phase_runs() {
        let mut graph: PhaseGraph<(), Recorder> = PhaseGraph::new();
        graph.register("a", Pipeline::Setup, ["b"], NONE);
        graph.register("b", Pipeline::Setup, ["a"], NONE);
        graph.bind("a", recording("a"));

        let mut target = Recorder::default();
        assert!(matches!(
            graph.execute(Pipeline::Setup, &(), &mut target),
            Err(Error::PhaseCycle { .. })
        ));
        assert!(target.ran.is_empty());
    }
}
