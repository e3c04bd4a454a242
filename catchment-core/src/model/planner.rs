//! Iteration planning.
//!
//! For every batch group, decide at which point of the nested index walk each
//! value read directly by the group's equations is refreshed. A value is loaded
//! at the deepest level whose index set it varies over: all of its index sets
//! are fixed there and it does not change further down.

use super::types::{BatchGroup, IterationPlan, LoadList, ResolvedEquation};
use crate::arena::Pool;
use crate::data::StorageStructures;
use crate::errors::CatchmentResult;
use crate::handles::{EquationH, Handle, IndexSetH, InputH, ParameterH, SolverH};
use crate::layout::StorageStructure;
use crate::solver::{SolverSpec, SolverStep};
use std::collections::BTreeSet;

/// `None` means the value does not vary inside the group and is loaded when the group is entered.
fn level_for(group_sets: &[IndexSetH], value_sets: &[IndexSetH]) -> Option<usize> {
    group_sets.iter().rposition(|s| value_sets.contains(s))
}

fn sets_of(structure: &StorageStructure, position: usize) -> &[IndexSetH] {
    structure
        .layout(position)
        .map(|layout| layout.index_sets.as_slice())
        .unwrap_or(&[])
}

#[derive(Default)]
struct LoadSets {
    parameters: BTreeSet<ParameterH>,
    inputs: BTreeSet<InputH>,
    results: BTreeSet<EquationH>,
    last_results: BTreeSet<EquationH>,
}

impl From<LoadSets> for LoadList {
    fn from(sets: LoadSets) -> Self {
        LoadList {
            parameters: sets.parameters.into_iter().collect(),
            inputs: sets.inputs.into_iter().collect(),
            results: sets.results.into_iter().collect(),
            last_results: sets.last_results.into_iter().collect(),
        }
    }
}

/// Parameters an equation needs at its own index combination while running.
fn run_parameters(
    resolved: &ResolvedEquation,
    solvers: &Pool<SolverH, SolverSpec>,
) -> CatchmentResult<Vec<ParameterH>> {
    let mut parameters: Vec<ParameterH> = resolved.dependencies.direct_parameters().collect();
    if let Some(condition) = resolved.spec.condition {
        parameters.push(condition.parameter);
    }
    if let Some(solver) = resolved.spec.solver {
        let solver = solvers.get(solver)?;
        if let SolverStep::Parameter(step) = solver.step {
            parameters.push(step);
        }
        if let Some(condition) = solver.condition {
            parameters.push(condition.parameter);
        }
    }
    Ok(parameters)
}

pub(crate) fn plan_group(
    group: &BatchGroup,
    equations: &Pool<EquationH, ResolvedEquation>,
    solvers: &Pool<SolverH, SolverSpec>,
    structures: &StorageStructures,
) -> CatchmentResult<IterationPlan> {
    let sets = &group.index_sets;
    let mut start = LoadSets::default();
    let mut levels: Vec<LoadSets> = sets.iter().map(|_| LoadSets::default()).collect();
    let computed: BTreeSet<EquationH> = group.equations().collect();

    for equation in group.equations() {
        let resolved = equations.get(equation)?;
        let deps = &resolved.dependencies;

        for parameter in run_parameters(resolved, solvers)? {
            let value_sets = sets_of(&structures.parameters, parameter.position());
            match level_for(sets, value_sets) {
                Some(level) => levels[level].parameters.insert(parameter),
                None => start.parameters.insert(parameter),
            };
        }
        for input in deps.direct_inputs() {
            let value_sets = sets_of(&structures.inputs, input.position());
            match level_for(sets, value_sets) {
                Some(level) => levels[level].inputs.insert(input),
                None => start.inputs.insert(input),
            };
        }
        // Results computed in this group are cached as they are evaluated
        for result in deps.direct_results().filter(|r| !computed.contains(r)) {
            let value_sets = sets_of(&structures.results, result.position());
            match level_for(sets, value_sets) {
                Some(level) => levels[level].results.insert(result),
                None => start.results.insert(result),
            };
        }
        for result in deps.direct_last_results() {
            let value_sets = sets_of(&structures.results, result.position());
            // Loaded once per timestep instead
            if value_sets.is_empty() {
                continue;
            }
            match level_for(sets, value_sets) {
                Some(level) => levels[level].last_results.insert(result),
                None => start.last_results.insert(result),
            };
        }
    }

    Ok(IterationPlan {
        start: start.into(),
        levels: levels.into_iter().map(LoadList::from).collect(),
    })
}

/// Previous-timestep values that do not vary over any index set.
pub(crate) fn global_last_results(
    equations: &Pool<EquationH, ResolvedEquation>,
    structures: &StorageStructures,
) -> Vec<EquationH> {
    let mut globals = BTreeSet::new();
    for (_, resolved) in equations.iter() {
        for result in resolved.dependencies.direct_last_results() {
            if sets_of(&structures.results, result.position()).is_empty() {
                globals.insert(result);
            }
        }
    }
    globals.into_iter().collect()
}
