//! Index set closure.
//!
//! Works out which index sets the value of every equation varies over. An equation
//! varies over the index sets of everything it reads at its own index combination,
//! and inherits the index sets of every equation it reads except those it pins.

use super::builder::ModelBuilder;
use super::discovery::{Access, DependencySet};
use crate::arena::Pool;
use crate::config::ScheduleOptions;
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, Handle, IndexSetH, ParameterH, SolverH};
use crate::solver::{SolverSpec, SolverStep};
use log::trace;
use std::collections::BTreeSet;

type IndexSets = BTreeSet<IndexSetH>;

fn without_pinned<'a>(
    sets: &'a IndexSets,
    pinned: &[IndexSetH],
) -> impl Iterator<Item = IndexSetH> + 'a {
    let pinned = pinned.to_vec();
    sets.iter().copied().filter(move |s| !pinned.contains(s))
}

fn parameter_sets(builder: &ModelBuilder, parameter: ParameterH) -> CatchmentResult<IndexSets> {
    let spec = builder.parameters.get(parameter)?;
    let group = builder.parameter_groups.get(spec.group)?;
    Ok(group.index_sets.iter().copied().collect())
}

/// Index sets an equation varies over before anything is inherited from other equations.
fn base_sets(
    builder: &ModelBuilder,
    solvers: &Pool<SolverH, SolverSpec>,
    equation: EquationH,
    dependencies: &DependencySet,
) -> CatchmentResult<IndexSets> {
    let spec = builder.equations.get(equation)?;
    let mut sets = dependencies.index_sets.clone();

    for Access { target, pinned } in &dependencies.parameters {
        let parameter_sets = parameter_sets(builder, *target)?;
        sets.extend(without_pinned(&parameter_sets, pinned));
    }
    for Access { target, pinned } in &dependencies.inputs {
        let input_sets: IndexSets = builder.inputs.get(*target)?.index_sets.iter().copied().collect();
        sets.extend(without_pinned(&input_sets, pinned));
    }
    if let Some(condition) = spec.condition {
        sets.extend(parameter_sets(builder, condition.parameter)?);
    }
    if let Some(parameter) = spec.initial_value_parameter {
        sets.extend(parameter_sets(builder, parameter)?);
    }
    if let Some(solver) = spec.solver {
        let solver = solvers.get(solver)?;
        if let SolverStep::Parameter(parameter) = solver.step {
            sets.extend(parameter_sets(builder, parameter)?);
        }
        if let Some(condition) = solver.condition {
            sets.extend(parameter_sets(builder, condition.parameter)?);
        }
    }
    Ok(sets)
}

/// Resolve the index sets of every equation, in handle order.
///
/// Iterates until no set changes. Sets only ever grow, so the iteration limit is
/// only reached by a model whose structure is inconsistent.
pub(crate) fn resolve_index_sets(
    builder: &ModelBuilder,
    solvers: &Pool<SolverH, SolverSpec>,
    dependencies: &[DependencySet],
    options: &ScheduleOptions,
) -> CatchmentResult<Vec<IndexSets>> {
    let mut sets = Vec::with_capacity(dependencies.len());
    for (equation, deps) in builder.equations.handles().zip(dependencies) {
        sets.push(base_sets(builder, solvers, equation, deps)?);
    }

    for iteration in 0..options.closure_iteration_limit {
        let mut changed = false;

        for (equation, spec) in builder.equations.iter() {
            let deps = &dependencies[equation.position()];
            let mut updated = sets[equation.position()].clone();

            for Access { target, pinned } in deps.results.iter().chain(&deps.last_results) {
                updated.extend(without_pinned(&sets[target.position()], pinned));
            }
            if let Some(initial) = spec.initial_value_equation {
                updated.extend(sets[initial.position()].iter().copied());
            }

            if let Some(parameter) = spec.computes_parameter {
                let allowed = parameter_sets(builder, parameter)?;
                if let Some(extra) = updated.difference(&allowed).next() {
                    return Err(CatchmentError::ComputedParameterShape {
                        equation: builder.equations.name(equation).to_string(),
                        parameter: builder.parameters.name(parameter).to_string(),
                        index_set: builder.index_sets.name(*extra).to_string(),
                    });
                }
                // Evaluated once per slot of the parameter
                updated = allowed;
            }

            if updated != sets[equation.position()] {
                sets[equation.position()] = updated;
                changed = true;
            }
        }

        // All members of a solver are integrated together and share one index combination
        for solver in solvers.handles() {
            let members: Vec<EquationH> = builder
                .equations
                .iter()
                .filter(|(_, spec)| spec.solver == Some(solver))
                .map(|(equation, _)| equation)
                .collect();
            let union: IndexSets = members
                .iter()
                .flat_map(|m| sets[m.position()].iter().copied())
                .collect();
            for member in members {
                if sets[member.position()] != union {
                    sets[member.position()] = union.clone();
                    changed = true;
                }
            }
        }

        if !changed {
            trace!("Index set closure settled after {} iterations", iteration + 1);
            return Ok(sets);
        }
    }

    Err(CatchmentError::ClosureDidNotConverge {
        iterations: options.closure_iteration_limit,
    })
}
