//! Batch builder.
//!
//! Equations sharing a solver are collapsed into one pre-batch, every other
//! result-bearing equation forms a pre-batch of its own. Pre-batches are ordered
//! topologically over current-result dependencies. Reads at explicit indices
//! only order pre-batches where direct reads allow it, so an equation can read
//! its upstream neighbours along a branched index set.

use super::types::{Batch, DependencyEdge, ResolvedEquation, ScheduleGraph};
use crate::arena::Pool;
use crate::equation::EquationType;
use crate::errors::{CatchmentError, CatchmentResult, DependencyHop, DependencyRing};
use crate::handles::{EquationH, SolverH};
use crate::solver::SolverSpec;
use log::debug;
use petgraph::algo::toposort;
use petgraph::graph::{EdgeReference, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef, IntoEdgeReferences, IntoNeighborsDirected};
use petgraph::{Direction, Graph};
use std::collections::{BTreeMap, BTreeSet};

/// Equations to evaluate before `equation` in the same timestep.
///
/// Maps each dependency to whether it is only read at explicit indices. Besides
/// reads this orders writers after the equation they write to, and readers of a
/// written equation after its writers.
pub(crate) fn ordering_dependencies(
    equations: &Pool<EquationH, ResolvedEquation>,
    writers: &BTreeMap<EquationH, Vec<EquationH>>,
    equation: EquationH,
    resolved: &ResolvedEquation,
) -> BTreeMap<EquationH, bool> {
    let mut required: BTreeSet<EquationH> = resolved.dependencies.direct_results().collect();
    if let Some(cumulative) = resolved.spec.cumulative {
        required.insert(cumulative.source);
    }
    required.extend(resolved.spec.writes.iter().copied());
    let cross: BTreeSet<EquationH> = resolved
        .dependencies
        .all_results()
        .filter(|target| *target != equation && !required.contains(target))
        .collect();

    let mut dependencies: BTreeMap<EquationH, bool> = BTreeMap::new();
    let mut add = |target: EquationH, cross_index: bool| {
        dependencies
            .entry(target)
            .and_modify(|c| *c &= cross_index)
            .or_insert(cross_index);
    };
    for (targets, cross_index) in [(&cross, true), (&required, false)] {
        for target in targets {
            add(*target, cross_index);
            for writer in writers.get(target).into_iter().flatten() {
                if *writer != equation {
                    add(*writer, cross_index);
                }
            }
        }
    }
    dependencies.retain(|d, _| equations.get(*d).map_or(false, |e| e.spec.has_result()));
    dependencies
}

/// Map from written equation to the equations declaring writes to it.
pub(crate) fn writers(equations: &Pool<EquationH, ResolvedEquation>) -> BTreeMap<EquationH, Vec<EquationH>> {
    let mut writers: BTreeMap<EquationH, Vec<EquationH>> = BTreeMap::new();
    for (equation, resolved) in equations.iter() {
        for target in &resolved.spec.writes {
            writers.entry(*target).or_default().push(equation);
        }
    }
    writers
}

pub(crate) fn ring(
    edges: &[DependencyEdge],
    equations: &Pool<EquationH, ResolvedEquation>,
) -> DependencyRing {
    DependencyRing(
        edges
            .iter()
            .map(|edge| DependencyHop {
                dependent: equations.name(edge.dependent).to_string(),
                dependency: equations.name(edge.dependency).to_string(),
            })
            .collect(),
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    InProgress,
    Done,
}

/// Depth-first search for a cycle over edges that are not cross-index.
///
/// Returns the edges forming the ring, starting at the node where the ring was entered.
fn find_ring<N>(graph: &Graph<N, DependencyEdge>) -> Option<Vec<DependencyEdge>> {
    fn visit<N>(
        graph: &Graph<N, DependencyEdge>,
        node: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<(NodeIndex, Option<DependencyEdge>)>,
    ) -> Option<Vec<DependencyEdge>> {
        marks[node.index()] = Mark::InProgress;
        let mut edges: Vec<(NodeIndex, DependencyEdge)> = graph
            .edges(node)
            .filter(|edge| !edge.weight().cross_index)
            .map(|edge| (edge.target(), *edge.weight()))
            .collect();
        edges.sort_by_key(|(target, edge)| (target.index(), edge.dependent, edge.dependency));

        for (target, edge) in edges {
            match marks[target.index()] {
                Mark::Done => {}
                Mark::InProgress => {
                    let start = stack
                        .iter()
                        .position(|(n, _)| *n == target)
                        .map_or(stack.len(), |p| p + 1);
                    let mut ring: Vec<DependencyEdge> =
                        stack[start..].iter().filter_map(|(_, via)| *via).collect();
                    ring.push(edge);
                    return Some(ring);
                }
                Mark::New => {
                    stack.push((target, Some(edge)));
                    if let Some(ring) = visit(graph, target, marks, stack) {
                        return Some(ring);
                    }
                    stack.pop();
                }
            }
        }
        marks[node.index()] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; graph.node_count()];
    let mut stack = Vec::new();
    for node in graph.node_indices() {
        if marks[node.index()] == Mark::New {
            stack.push((node, None));
            if let Some(ring) = visit(graph, node, &mut marks, &mut stack) {
                return Some(ring);
            }
            stack.pop();
        }
    }
    None
}

/// Order nodes so that dependencies come before their dependents.
///
/// Edges point from dependent to dependency. Cross-index edges are followed
/// where the other edges allow it. Among the nodes that are ready the lowest
/// index goes first, so the order is deterministic. On a cycle the edges
/// forming the ring are returned.
pub(crate) fn topological_order<N>(
    graph: &Graph<N, DependencyEdge>,
) -> Result<Vec<NodeIndex>, Vec<DependencyEdge>> {
    let required = EdgeFiltered::from_fn(graph, |edge: EdgeReference<'_, DependencyEdge>| {
        !edge.weight().cross_index && edge.source() != edge.target()
    });
    if toposort(&required, None).is_err() {
        return Err(find_ring(graph).unwrap_or_default());
    }

    // Unplaced dependencies of every node
    let mut waiting = vec![0usize; graph.node_count()];
    for edge in required.edge_references() {
        waiting[edge.source().index()] += 1;
    }
    let mut preferred: Vec<Vec<NodeIndex>> = vec![Vec::new(); graph.node_count()];
    for edge in graph.edge_references() {
        if edge.weight().cross_index && edge.source() != edge.target() {
            preferred[edge.source().index()].push(edge.target());
        }
    }

    let mut ready: BTreeSet<NodeIndex> = graph
        .node_indices()
        .filter(|n| waiting[n.index()] == 0)
        .collect();
    let mut placed = vec![false; graph.node_count()];
    let mut order = Vec::with_capacity(graph.node_count());
    loop {
        let next = ready
            .iter()
            .copied()
            .find(|n| preferred[n.index()].iter().all(|d| placed[d.index()]))
            .or_else(|| ready.first().copied());
        let Some(next) = next else {
            break;
        };
        ready.remove(&next);
        placed[next.index()] = true;
        order.push(next);
        for dependent in required.neighbors_directed(next, Direction::Incoming) {
            waiting[dependent.index()] -= 1;
            if waiting[dependent.index()] == 0 {
                ready.insert(dependent);
            }
        }
    }
    Ok(order)
}

/// Batches in execution order together with the pre-batch graph they were sorted from.
pub(crate) struct Schedule {
    pub batches: Vec<Batch>,
    pub graph: ScheduleGraph,
}

struct PreBatch {
    solver: Option<SolverH>,
    equations: Vec<EquationH>,
}

pub(crate) fn order_batches(
    equations: &Pool<EquationH, ResolvedEquation>,
    solvers: &Pool<SolverH, SolverSpec>,
) -> CatchmentResult<Schedule> {
    let mut pre_batches: Vec<PreBatch> = Vec::new();
    let mut solver_batch: BTreeMap<SolverH, usize> = BTreeMap::new();
    let mut batch_of: BTreeMap<EquationH, usize> = BTreeMap::new();

    for (equation, resolved) in equations.iter() {
        if !resolved.spec.has_result() {
            continue;
        }
        let position = match resolved.spec.solver {
            Some(solver) => *solver_batch.entry(solver).or_insert_with(|| {
                pre_batches.push(PreBatch {
                    solver: Some(solver),
                    equations: vec![],
                });
                pre_batches.len() - 1
            }),
            None => {
                pre_batches.push(PreBatch {
                    solver: None,
                    equations: vec![],
                });
                pre_batches.len() - 1
            }
        };
        pre_batches[position].equations.push(equation);
        batch_of.insert(equation, position);
    }

    let mut graph: ScheduleGraph = Graph::new();
    let nodes: Vec<NodeIndex> = pre_batches
        .iter()
        .map(|pre_batch| graph.add_node(pre_batch_label(pre_batch, equations, solvers)))
        .collect();

    let writers = writers(equations);
    let mut edges: BTreeMap<(usize, usize), DependencyEdge> = BTreeMap::new();
    for (equation, resolved) in equations.iter() {
        let Some(&from) = batch_of.get(&equation) else {
            continue;
        };
        for (dependency, cross_index) in ordering_dependencies(equations, &writers, equation, resolved) {
            let Some(&to) = batch_of.get(&dependency) else {
                continue;
            };
            let edge = DependencyEdge {
                dependent: equation,
                dependency,
                cross_index,
            };
            if from == to {
                if pre_batches[from].solver.is_none() && !cross_index {
                    // A single equation reading its own current value
                    return Err(CatchmentError::CyclicDependency {
                        ring: ring(&[edge], equations),
                    });
                }
                // Resolved inside the solver
                continue;
            }
            match edges.get(&(from, to)) {
                Some(existing) if !existing.cross_index => {}
                _ => {
                    edges.insert((from, to), edge);
                }
            }
        }
    }
    for ((from, to), edge) in edges {
        graph.add_edge(nodes[from], nodes[to], edge);
    }

    let order = topological_order(&graph).map_err(|edges| CatchmentError::CyclicDependency {
        ring: ring(&edges, equations),
    })?;

    let mut batches = Vec::with_capacity(order.len());
    for node in order {
        let pre_batch = &pre_batches[node.index()];
        let batch = match pre_batch.solver {
            None => Batch::plain(pre_batch.equations.clone()),
            Some(solver) => solver_batch_contents(equations, solvers, solver, &pre_batch.equations)?,
        };
        debug!(
            "Batch {}: {}",
            batches.len(),
            batch
                .members()
                .map(|e| equations.name(e))
                .collect::<Vec<_>>()
                .join(", ")
        );
        batches.push(batch);
    }

    Ok(Schedule { batches, graph })
}

fn pre_batch_label(
    pre_batch: &PreBatch,
    equations: &Pool<EquationH, ResolvedEquation>,
    solvers: &Pool<SolverH, SolverSpec>,
) -> String {
    let names: Vec<&str> = pre_batch
        .equations
        .iter()
        .map(|e| equations.name(*e))
        .collect();
    match pre_batch.solver {
        Some(solver) => format!("{}: {}", solvers.name(solver), names.join(", ")),
        None => names.join(", "),
    }
}

/// Order the non-integrated members of a solver and work out the Jacobian sparsity.
fn solver_batch_contents(
    equations: &Pool<EquationH, ResolvedEquation>,
    solvers: &Pool<SolverH, SolverSpec>,
    solver: SolverH,
    members: &[EquationH],
) -> CatchmentResult<Batch> {
    let (odes, plain): (Vec<EquationH>, Vec<EquationH>) = members.iter().partition(|e| {
        equations
            .get(**e)
            .map_or(false, |r| r.spec.equation_type == EquationType::Ode)
    });

    let in_solver = |equation: EquationH| -> CatchmentResult<BTreeSet<EquationH>> {
        let resolved = equations.get(equation)?;
        Ok(resolved
            .dependencies
            .direct_results()
            .filter(|d| members.contains(d))
            .collect())
    };

    // ODE values are solver state, so only reads between non-integrated members constrain order
    let mut graph: Graph<EquationH, DependencyEdge> = Graph::new();
    let nodes: Vec<NodeIndex> = plain.iter().map(|e| graph.add_node(*e)).collect();
    for (i, equation) in plain.iter().enumerate() {
        for dependency in in_solver(*equation)? {
            if let Some(j) = plain.iter().position(|p| *p == dependency) {
                graph.add_edge(
                    nodes[i],
                    nodes[j],
                    DependencyEdge {
                        dependent: *equation,
                        dependency,
                        cross_index: false,
                    },
                );
            }
        }
    }
    let order = topological_order(&graph).map_err(|edges| CatchmentError::SolverCycle {
        solver: solvers.name(solver).to_string(),
        ring: ring(&edges, equations),
    })?;
    let ordered: Vec<EquationH> = order.into_iter().map(|n| graph[n]).collect();

    // Which states each derivative depends on, following reads through plain members
    let mut jacobian_columns = vec![Vec::new(); odes.len()];
    for (row, ode) in odes.iter().enumerate() {
        let mut reached: BTreeSet<EquationH> = BTreeSet::new();
        let mut pending: Vec<EquationH> = in_solver(*ode)?.into_iter().collect();
        while let Some(equation) = pending.pop() {
            // States are leaves
            if !reached.insert(equation) || odes.contains(&equation) {
                continue;
            }
            pending.extend(in_solver(equation)?);
        }
        for (column, state) in odes.iter().enumerate() {
            if reached.contains(state) {
                jacobian_columns[column].push(row);
            }
        }
    }

    Ok(Batch {
        solver: Some(solver),
        equations: ordered,
        odes,
        jacobian_columns,
    })
}
