//! The finalized model and its entry point for running data sets.

use super::execution::{run_timesteps, RunState};
use super::initial::run_initial_values;
use super::types::{BatchGroup, DependencyEdge, InputSpec, ResolvedEquation, ScheduleGraph};
use crate::arena::Pool;
use crate::config::RunOptions;
use crate::data::{DataSet, StorageStructures};
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, Index, IndexSetH, InputH, ParameterH, SolverH};
use crate::parameter::ParameterSpec;
use crate::solver::SolverSpec;
use log::{info, warn};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{EdgeReference, NodeIndex};
use std::fmt::Write;
use std::sync::Arc;

/// A compiled model.
///
/// Produced by [`ModelBuilder::build`](super::ModelBuilder::build). The model is
/// immutable: it only holds the execution plan and the registration details
/// needed to evaluate equations. All values live in a [`DataSet`], so one model
/// can run many data sets, also from several threads at once.
#[derive(Debug)]
pub struct Model {
    pub(crate) structures: Arc<StorageStructures>,
    pub(crate) equations: Pool<EquationH, ResolvedEquation>,
    pub(crate) parameters: Pool<ParameterH, ParameterSpec>,
    pub(crate) inputs: Pool<InputH, InputSpec>,
    pub(crate) solvers: Pool<SolverH, SolverSpec>,
    pub(crate) groups: Vec<BatchGroup>,
    /// Previous-timestep results that do not vary over any index set.
    pub(crate) global_last_results: Vec<EquationH>,
    pub(crate) initial_order: Vec<EquationH>,
    /// Pre-batch dependency graph the batches were ordered from.
    pub(crate) graph: ScheduleGraph,
    pub(crate) options: RunOptions,
}

impl Model {
    /// Create an empty data set for this model with default parameter values.
    pub fn new_data_set(&self, timesteps: usize) -> DataSet {
        DataSet::new(Arc::clone(&self.structures), timesteps)
    }

    /// Run every timestep of `data`.
    ///
    /// Results are overwritten, including the initial values in row 0. Parameters
    /// computed by initial-value equations are written back into `data`.
    pub fn run(&self, data: &mut DataSet) -> CatchmentResult<()> {
        if !data.shares_structures(&self.structures) {
            return Err(CatchmentError::IncompatibleDataSet(
                "storage structures differ".to_string(),
            ));
        }
        let offending = data.validate_parameters();
        if offending > 0 {
            warn!("{} parameter values are outside their declared bounds", offending);
        }

        data.results.fill(0.0);
        run_initial_values(self, data)?;
        let mut state = RunState::new(self, data)?;
        run_timesteps(self, data, &mut state)?;

        info!(
            "Ran {} timesteps over {} batch groups",
            data.timesteps(),
            self.groups.len()
        );
        Ok(())
    }

    /// The execution plan, in order.
    pub fn batch_groups(&self) -> &[BatchGroup] {
        &self.groups
    }

    pub fn structures(&self) -> &StorageStructures {
        &self.structures
    }

    pub fn equation(&self, name: &str) -> CatchmentResult<EquationH> {
        self.equations.find(name)
    }

    pub fn parameter(&self, name: &str) -> CatchmentResult<ParameterH> {
        self.parameters.find(name)
    }

    pub fn input(&self, name: &str) -> CatchmentResult<InputH> {
        self.inputs.find(name)
    }

    pub fn solver(&self, name: &str) -> CatchmentResult<SolverH> {
        self.solvers.find(name)
    }

    pub fn index_set(&self, name: &str) -> CatchmentResult<IndexSetH> {
        self.structures.indices.find(name)
    }

    /// Resolve an index by name, e.g. `model.index(reach, "Lower")`.
    pub fn index(&self, index_set: IndexSetH, name: &str) -> CatchmentResult<Index> {
        self.structures.indices.index(index_set, name)
    }

    pub fn equation_name(&self, equation: EquationH) -> &str {
        self.equations.name(equation)
    }

    /// Index sets the equation's value varies over, as resolved when the model was built.
    pub fn equation_index_sets(&self, equation: EquationH) -> CatchmentResult<&[IndexSetH]> {
        Ok(&self.equations.get(equation)?.index_sets)
    }

    /// Order in which initial values are computed.
    pub fn initial_value_order(&self) -> &[EquationH] {
        &self.initial_order
    }

    /// The pre-batch dependency graph in graphviz format.
    pub fn as_dot(&self) -> String {
        let edge_label = |_: &ScheduleGraph, er: EdgeReference<'_, DependencyEdge>| {
            let edge = er.weight();
            format!(
                "label = \"{} reads {}\"",
                self.equations.name(edge.dependent),
                self.equations.name(edge.dependency)
            )
        };
        let node_label = |_: &ScheduleGraph, (_, label): (NodeIndex, &String)| {
            let escaped = label.replace('\\', "\\\\").replace('"', "\\\"");
            format!("label = \"{}\"", escaped)
        };
        let dot = Dot::with_attr_getters(
            &self.graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &edge_label,
            &node_label,
        );
        format!("{:?}", dot)
    }

    /// Human-readable listing of the execution plan.
    pub fn structure_summary(&self) -> String {
        let indices = &self.structures.indices;
        let mut out = String::new();
        for (position, group) in self.groups.iter().enumerate() {
            let sets: Vec<&str> = group.index_sets.iter().map(|s| indices.name(*s)).collect();
            let _ = writeln!(out, "Group {} [{}]", position, sets.join(", "));
            for batch in &group.batches {
                let names: Vec<&str> = batch.members().map(|e| self.equations.name(e)).collect();
                match batch.solver {
                    Some(solver) => {
                        let _ = writeln!(
                            out,
                            "  solver \"{}\": {}",
                            self.solvers.name(solver),
                            names.join(", ")
                        );
                    }
                    None => {
                        let _ = writeln!(out, "  {}", names.join(", "));
                    }
                }
            }
        }
        out
    }
}
