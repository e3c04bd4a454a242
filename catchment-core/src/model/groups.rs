//! Batch group assembly.
//!
//! Batches in execution order are packed into groups that share one list of
//! index sets, so that each group is walked with a single nested index loop.
//! Fewer groups means fewer walks per timestep.

use super::batches::{ordering_dependencies, writers};
use super::types::{Batch, BatchGroup, ResolvedEquation};
use crate::arena::Pool;
use crate::config::ScheduleOptions;
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, IndexSetH};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
struct DraftGroup {
    index_sets: Vec<IndexSetH>,
    batches: Vec<usize>,
}

/// For each batch, the batches it reads from in the current timestep at any index.
fn batch_dependencies(
    equations: &Pool<EquationH, ResolvedEquation>,
    batches: &[Batch],
) -> CatchmentResult<Vec<BTreeSet<usize>>> {
    let mut batch_of: BTreeMap<EquationH, usize> = BTreeMap::new();
    for (position, batch) in batches.iter().enumerate() {
        for equation in batch.members() {
            batch_of.insert(equation, position);
        }
    }

    let writers = writers(equations);
    let mut dependencies = Vec::with_capacity(batches.len());
    for (position, batch) in batches.iter().enumerate() {
        let mut depends = BTreeSet::new();
        for equation in batch.members() {
            let resolved = equations.get(equation)?;
            let targets = ordering_dependencies(equations, &writers, equation, resolved)
                .into_keys()
                .chain(resolved.dependencies.all_results());
            for target in targets {
                if let Some(&other) = batch_of.get(&target) {
                    if other != position {
                        depends.insert(other);
                    }
                }
            }
        }
        dependencies.push(depends);
    }
    Ok(dependencies)
}

/// Pack batches into groups.
///
/// Each batch joins the most recent group with identical index sets that can be
/// reached without passing a group it depends on, or starts a new group. A
/// second pass then sinks batches into later identical groups until nothing
/// moves, which can leave earlier groups empty.
pub(crate) fn assemble_groups(
    equations: &Pool<EquationH, ResolvedEquation>,
    batches: Vec<Batch>,
    options: &ScheduleOptions,
) -> CatchmentResult<Vec<BatchGroup>> {
    let depends = batch_dependencies(equations, &batches)?;
    let mut batch_sets = Vec::with_capacity(batches.len());
    for batch in &batches {
        let sets = match batch.members().next() {
            Some(first) => equations.get(first)?.index_sets.clone(),
            None => vec![],
        };
        batch_sets.push(sets);
    }

    let mut groups: Vec<DraftGroup> = Vec::new();
    for (batch, sets) in batch_sets.iter().enumerate() {
        let mut target = None;
        for (position, group) in groups.iter().enumerate().rev() {
            if group.index_sets == *sets {
                target = Some(position);
                break;
            }
            if group.batches.iter().any(|b| depends[batch].contains(b)) {
                break;
            }
        }
        match target {
            Some(position) => groups[position].batches.push(batch),
            None => groups.push(DraftGroup {
                index_sets: sets.clone(),
                batches: vec![batch],
            }),
        }
    }
    debug!("First placement pass produced {} batch groups", groups.len());

    if options.sink_batches {
        sink(&mut groups, &depends, options.sink_iteration_limit)?;
    }

    let mut slots: Vec<Option<Batch>> = batches.into_iter().map(Some).collect();
    let mut assembled = Vec::with_capacity(groups.len());
    for draft in groups {
        let mut merged: Vec<Batch> = Vec::with_capacity(draft.batches.len());
        for position in draft.batches {
            let Some(batch) = slots[position].take() else {
                continue;
            };
            match merged.last_mut() {
                Some(previous) if !previous.is_solver() && !batch.is_solver() => {
                    previous.equations.extend(batch.equations);
                }
                _ => merged.push(batch),
            }
        }
        assembled.push(BatchGroup::new(draft.index_sets, merged));
    }
    Ok(assembled)
}

/// Move batches forward into the closest later group with identical index sets.
///
/// A batch only moves if no other batch of its group reads it and no group it
/// would pass over reads it. Batches only ever move forward, so the passes settle.
fn sink(
    groups: &mut Vec<DraftGroup>,
    depends: &[BTreeSet<usize>],
    iteration_limit: usize,
) -> CatchmentResult<()> {
    for pass in 0..iteration_limit {
        let mut moved = false;
        for g in 0..groups.len() {
            let mut i = groups[g].batches.len();
            while i > 0 {
                i -= 1;
                let batch = groups[g].batches[i];
                let read_in_group = groups[g]
                    .batches
                    .iter()
                    .any(|b| *b != batch && depends[*b].contains(&batch));
                if read_in_group {
                    continue;
                }
                if let Some(target) = sink_target(groups, depends, g, batch) {
                    groups[g].batches.remove(i);
                    groups[target].batches.insert(0, batch);
                    debug!("Sank batch {} from group {} into group {}", batch, g, target);
                    moved = true;
                }
            }
        }
        groups.retain(|group| !group.batches.is_empty());
        if !moved {
            debug!(
                "Sinking settled after {} passes with {} batch groups",
                pass + 1,
                groups.len()
            );
            return Ok(());
        }
    }
    Err(CatchmentError::SinkingDidNotConverge {
        iterations: iteration_limit,
    })
}

fn sink_target(
    groups: &[DraftGroup],
    depends: &[BTreeSet<usize>],
    from: usize,
    batch: usize,
) -> Option<usize> {
    for (position, group) in groups.iter().enumerate().skip(from + 1) {
        if group.index_sets == groups[from].index_sets {
            return Some(position);
        }
        if group.batches.iter().any(|b| depends[*b].contains(&batch)) {
            return None;
        }
    }
    None
}
