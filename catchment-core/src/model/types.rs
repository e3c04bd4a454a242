//! Type definitions for the model module.

use super::discovery::DependencySet;
use crate::equation::EquationSpec;
use crate::handles::{EquationH, IndexSetH, InputH, ParameterH, SolverH};
use petgraph::Graph;

/// Registration details of an input.
#[derive(Debug, Clone)]
pub(crate) struct InputSpec {
    pub unit: String,
    pub index_sets: Vec<IndexSetH>,
}

/// An equation after finalize: its registration plus everything discovered about it.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedEquation {
    pub spec: EquationSpec,
    /// Index sets the equation's value varies over, sorted by handle.
    pub index_sets: Vec<IndexSetH>,
    pub dependencies: DependencySet,
}

/// `dependent` is evaluated after `dependency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge {
    pub dependent: EquationH,
    pub dependency: EquationH,
    /// The dependency is only read at explicit indices. Such edges order
    /// evaluation where the other edges allow it and never form a cycle.
    pub cross_index: bool,
}

/// Pre-batch dependency graph. Edges point from the dependent pre-batch to its dependency.
pub type ScheduleGraph = Graph<String, DependencyEdge>;

/// A unit of evaluation inside a batch group.
///
/// A plain batch evaluates its equations in order at every index combination of
/// its group. A solver batch integrates its ODE equations over the timestep,
/// re-evaluating its non-integrated equations whenever the derivatives are needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub solver: Option<SolverH>,
    /// Non-integrated equations in evaluation order.
    pub equations: Vec<EquationH>,
    /// Integrated equations, in state vector order. Empty for plain batches.
    pub odes: Vec<EquationH>,
    /// For every state column, the derivative rows that depend on it.
    pub(crate) jacobian_columns: Vec<Vec<usize>>,
}

impl Batch {
    pub(crate) fn plain(equations: Vec<EquationH>) -> Self {
        Self {
            solver: None,
            equations,
            odes: vec![],
            jacobian_columns: vec![],
        }
    }

    pub fn is_solver(&self) -> bool {
        self.solver.is_some()
    }

    /// All equations of the batch in the order their results are written.
    pub fn members(&self) -> impl Iterator<Item = EquationH> + '_ {
        self.equations.iter().chain(self.odes.iter()).copied()
    }
}

/// Values refreshed into the run caches at one point of a batch group walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LoadList {
    pub parameters: Vec<ParameterH>,
    pub inputs: Vec<InputH>,
    pub results: Vec<EquationH>,
    pub last_results: Vec<EquationH>,
}

impl LoadList {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
            && self.inputs.is_empty()
            && self.results.is_empty()
            && self.last_results.is_empty()
    }
}

/// What to load when a group is entered and at each of its index set levels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IterationPlan {
    pub start: LoadList,
    /// One list per entry of the group's index sets.
    pub levels: Vec<LoadList>,
}

/// A run of batches sharing one list of index sets, walked together.
#[derive(Debug, Clone)]
pub struct BatchGroup {
    pub index_sets: Vec<IndexSetH>,
    pub batches: Vec<Batch>,
    pub(crate) plan: IterationPlan,
}

impl BatchGroup {
    pub(crate) fn new(index_sets: Vec<IndexSetH>, batches: Vec<Batch>) -> Self {
        Self {
            index_sets,
            batches,
            plan: IterationPlan::default(),
        }
    }

    pub fn equations(&self) -> impl Iterator<Item = EquationH> + '_ {
        self.batches.iter().flat_map(|b| b.members())
    }
}
