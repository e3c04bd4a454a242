//! The execution engine.
//!
//! Every batch group is walked with [`model_loop`], an explicit odometer over the
//! group's index sets. The same walk sizes the fast lookups, fills them and then
//! runs every timestep, so the three always visit index combinations in the same
//! order. Nothing is allocated inside the timestep loop.

use super::diagnostics::non_finite;
use super::runtime::Model;
use super::types::{Batch, LoadList, ResolvedEquation};
use crate::access::{Context, Mode, ValueAccess};
use crate::data::DataSet;
use crate::equation::CumulativeSpec;
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, Handle, Index, IndexSetH, InputH, ParameterH, SolverH};
use crate::index_set::IndexStructure;
use crate::layout::{IndexTuple, StorageStructure};
use crate::parameter::ParameterValue;
use crate::solver::{OdeSystem, SolverCall, SolverStep};
use log::trace;
use ndarray::{Array2, ArrayView1};

/// Points of a nested index walk at which loads and evaluations happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopEvent {
    /// The group is entered, before any index set is iterated.
    Enter,
    /// A new index was selected at this level; deeper levels restart at 0.
    Level(usize),
    /// Every index set of the group has an index selected.
    Bottom,
}

/// Walk the cartesian product of `index_sets` without recursion.
///
/// With no index sets the callback sees `Enter` followed by a single `Bottom`.
/// If any index set is empty there is no `Bottom` at all.
pub(crate) fn model_loop<F>(
    index_sets: &[IndexSetH],
    indices: &IndexStructure,
    tuple: &mut IndexTuple,
    mut callback: F,
) -> CatchmentResult<()>
where
    F: FnMut(LoopEvent, &IndexTuple) -> CatchmentResult<()>,
{
    callback(LoopEvent::Enter, tuple)?;
    let depth = index_sets.len();
    if depth == 0 {
        return callback(LoopEvent::Bottom, tuple);
    }
    if index_sets.iter().any(|set| indices.count(*set) == 0) {
        return Ok(());
    }

    for (level, set) in index_sets.iter().enumerate() {
        tuple.set(*set, 0);
        callback(LoopEvent::Level(level), tuple)?;
    }
    loop {
        callback(LoopEvent::Bottom, tuple)?;

        let mut level = depth;
        loop {
            if level == 0 {
                return Ok(());
            }
            level -= 1;
            let set = index_sets[level];
            let next = tuple.get(set) + 1;
            if next < indices.count(set) {
                tuple.set(set, next);
                break;
            }
        }
        callback(LoopEvent::Level(level), tuple)?;
        for (deeper, set) in index_sets.iter().enumerate().skip(level + 1) {
            tuple.set(*set, 0);
            callback(LoopEvent::Level(deeper), tuple)?;
        }
    }
}

/// Offset of a value read at explicit indices.
pub(crate) fn pinned_offset(
    structure: &StorageStructure,
    indices: &IndexStructure,
    position: usize,
    kind: &'static str,
    tuple: &IndexTuple,
    pins: &[Index],
) -> CatchmentResult<usize> {
    for pin in pins {
        let count = indices.count(pin.set);
        if pin.position >= count {
            return Err(CatchmentError::IndexOutOfRange {
                index_set: indices.name(pin.set).to_string(),
                index: pin.position,
                count,
            });
        }
    }
    let layout = structure.require(position, kind)?;
    Ok(layout.offset(&tuple.pinned(pins)))
}

/// Sum of the source over the summed index set at the current indices of the others.
pub(crate) fn cumulative_sum(
    model: &Model,
    cumulative: &CumulativeSpec,
    tuple: &IndexTuple,
    parameters: &[ParameterValue],
    results: ArrayView1<'_, f64>,
) -> f64 {
    let structures = &model.structures;
    let Some(source) = structures.results.layout(cumulative.source.position()) else {
        return 0.0;
    };
    let weight = cumulative
        .weight
        .and_then(|w| structures.parameters.layout(w.position()));

    let mut sum = 0.0;
    for position in 0..structures.indices.count(cumulative.over) {
        let pins = [Index::new(cumulative.over, position)];
        let pinned = tuple.pinned(&pins);
        let value = results[source.offset(&pinned)];
        let factor = weight.map_or(1.0, |layout| parameters[layout.offset(&pinned)].as_f64());
        sum += value * factor;
    }
    sum
}

/// Values of the entities read directly at the current index combination.
#[derive(Debug)]
struct ValueCache {
    parameters: Vec<ParameterValue>,
    input_offsets: Vec<usize>,
    results: Vec<f64>,
    /// Storage offset the cached result was read from or written to.
    result_offsets: Vec<usize>,
    last_results: Vec<f64>,
}

impl ValueCache {
    fn new(model: &Model) -> Self {
        let equations = model.equations.len();
        Self {
            parameters: vec![ParameterValue::Real(0.0); model.parameters.len()],
            input_offsets: vec![0; model.inputs.len()],
            results: vec![0.0; equations],
            result_offsets: vec![usize::MAX; equations],
            last_results: vec![0.0; equations],
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursors {
    parameters: usize,
    inputs: usize,
    results: usize,
    last_results: usize,
    writes: usize,
}

impl Cursors {
    fn count(&mut self, list: &LoadList) {
        self.parameters += list.parameters.len();
        self.inputs += list.inputs.len();
        self.results += list.results.len();
        self.last_results += list.last_results.len();
    }
}

/// Precomputed parameter values and storage offsets, in walk order.
#[derive(Debug, Default)]
struct FastLookup {
    parameters: Vec<ParameterValue>,
    inputs: Vec<usize>,
    results: Vec<usize>,
    last_results: Vec<usize>,
    /// Result offsets of every equation evaluated at every index combination.
    writes: Vec<usize>,
}

impl FastLookup {
    fn with_sizes(sizes: &Cursors) -> Self {
        Self {
            parameters: vec![ParameterValue::Real(0.0); sizes.parameters],
            inputs: vec![0; sizes.inputs],
            results: vec![0; sizes.results],
            last_results: vec![0; sizes.last_results],
            writes: vec![0; sizes.writes],
        }
    }

    /// Record the offsets of one load list at the current indices.
    fn fill(
        &mut self,
        model: &Model,
        data: &DataSet,
        list: &LoadList,
        tuple: &IndexTuple,
        cursors: &mut Cursors,
    ) -> CatchmentResult<()> {
        let structures = &model.structures;
        for parameter in &list.parameters {
            let layout = structures
                .parameters
                .require(parameter.position(), ParameterH::KIND)?;
            self.parameters[cursors.parameters] = data.parameters[layout.offset(tuple)];
            cursors.parameters += 1;
        }
        for input in &list.inputs {
            let layout = structures.inputs.require(input.position(), InputH::KIND)?;
            self.inputs[cursors.inputs] = layout.offset(tuple);
            cursors.inputs += 1;
        }
        for result in &list.results {
            let layout = structures.results.require(result.position(), EquationH::KIND)?;
            self.results[cursors.results] = layout.offset(tuple);
            cursors.results += 1;
        }
        for result in &list.last_results {
            let layout = structures.results.require(result.position(), EquationH::KIND)?;
            self.last_results[cursors.last_results] = layout.offset(tuple);
            cursors.last_results += 1;
        }
        Ok(())
    }

    /// Refresh the caches from one load list, consuming lookups in walk order.
    fn load(
        &self,
        list: &LoadList,
        cursors: &mut Cursors,
        cache: &mut ValueCache,
        results: &Array2<f64>,
        row: usize,
    ) {
        for parameter in &list.parameters {
            cache.parameters[parameter.position()] = self.parameters[cursors.parameters];
            cursors.parameters += 1;
        }
        for input in &list.inputs {
            cache.input_offsets[input.position()] = self.inputs[cursors.inputs];
            cursors.inputs += 1;
        }
        for result in &list.results {
            let offset = self.results[cursors.results];
            cache.results[result.position()] = results[[row, offset]];
            cache.result_offsets[result.position()] = offset;
            cursors.results += 1;
        }
        for result in &list.last_results {
            let offset = self.last_results[cursors.last_results];
            cache.last_results[result.position()] = results[[row - 1, offset]];
            cursors.last_results += 1;
        }
    }
}

/// Buffers of one solver batch, sized once per run.
#[derive(Debug, Default)]
struct SolverScratch {
    offsets: Vec<usize>,
    state: Vec<f64>,
    workspace: Vec<f64>,
    base: Vec<f64>,
    shifted: Vec<f64>,
    perturbed: Vec<f64>,
}

/// Mutable state of one run.
#[derive(Debug)]
pub(crate) struct RunState {
    tuple: IndexTuple,
    cache: ValueCache,
    fast: FastLookup,
    global_last_offsets: Vec<usize>,
    /// Per group, per batch. Plain batches get empty scratch.
    scratch: Vec<Vec<SolverScratch>>,
}

impl RunState {
    /// Size and fill all lookups for a data set whose parameters are final.
    pub fn new(model: &Model, data: &DataSet) -> CatchmentResult<Self> {
        let indices = &model.structures.indices;
        let mut tuple = IndexTuple::new(indices.len());

        let mut sizes = Cursors::default();
        for group in &model.groups {
            let members = group.equations().count();
            model_loop(&group.index_sets, indices, &mut tuple, |event, _| {
                match event {
                    LoopEvent::Enter => sizes.count(&group.plan.start),
                    LoopEvent::Level(level) => sizes.count(&group.plan.levels[level]),
                    LoopEvent::Bottom => sizes.writes += members,
                }
                Ok(())
            })?;
        }
        trace!(
            "Fast lookups: {} parameters, {} inputs, {} results, {} previous results, {} writes",
            sizes.parameters,
            sizes.inputs,
            sizes.results,
            sizes.last_results,
            sizes.writes
        );

        let mut fast = FastLookup::with_sizes(&sizes);
        let mut cursors = Cursors::default();
        for group in &model.groups {
            model_loop(&group.index_sets, indices, &mut tuple, |event, tuple| match event {
                LoopEvent::Enter => fast.fill(model, data, &group.plan.start, tuple, &mut cursors),
                LoopEvent::Level(level) => {
                    fast.fill(model, data, &group.plan.levels[level], tuple, &mut cursors)
                }
                LoopEvent::Bottom => {
                    for equation in group.equations() {
                        let layout = model
                            .structures
                            .results
                            .require(equation.position(), EquationH::KIND)?;
                        fast.writes[cursors.writes] = layout.offset(tuple);
                        cursors.writes += 1;
                    }
                    Ok(())
                }
            })?;
        }

        let mut global_last_offsets = Vec::with_capacity(model.global_last_results.len());
        for equation in &model.global_last_results {
            let layout = model
                .structures
                .results
                .require(equation.position(), EquationH::KIND)?;
            global_last_offsets.push(layout.base);
        }

        let mut scratch = Vec::with_capacity(model.groups.len());
        for group in &model.groups {
            let mut group_scratch = Vec::with_capacity(group.batches.len());
            for batch in &group.batches {
                group_scratch.push(match batch.solver {
                    None => SolverScratch::default(),
                    Some(solver) => solver_scratch(model, batch, solver)?,
                });
            }
            scratch.push(group_scratch);
        }

        Ok(Self {
            tuple,
            cache: ValueCache::new(model),
            fast,
            global_last_offsets,
            scratch,
        })
    }
}

fn solver_scratch(model: &Model, batch: &Batch, solver: SolverH) -> CatchmentResult<SolverScratch> {
    let spec = model.solvers.get(solver)?;
    let n = batch.odes.len();
    let jacobian = if spec.function.needs_jacobian() { n } else { 0 };
    Ok(SolverScratch {
        offsets: vec![0; batch.equations.len() + n],
        state: vec![0.0; n],
        workspace: vec![0.0; spec.function.workspace_size(n)],
        base: vec![0.0; jacobian],
        shifted: vec![0.0; jacobian],
        perturbed: vec![0.0; jacobian],
    })
}

/// Everything needed to evaluate equation bodies at one index combination of a timestep.
struct Frame<'a> {
    model: &'a Model,
    tuple: &'a IndexTuple,
    cache: &'a mut ValueCache,
    parameters: &'a [ParameterValue],
    inputs: ArrayView1<'a, f64>,
    input_provided: &'a [bool],
    results: &'a mut Array2<f64>,
    /// Result row of the current timestep.
    row: usize,
    check_non_finite: bool,
    /// First failed access of the body being evaluated.
    error: Option<CatchmentError>,
}

impl Frame<'_> {
    /// Evaluate an equation, honouring its conditional gate.
    fn evaluate(&mut self, equation: EquationH) -> CatchmentResult<f64> {
        let model = self.model;
        let resolved: &ResolvedEquation = model.equations.get(equation)?;
        if let Some(condition) = resolved.spec.condition {
            if self.cache.parameters[condition.parameter.position()].as_bool() != condition.value {
                return Ok(0.0);
            }
        }

        let value = match (&resolved.spec.cumulative, &resolved.spec.body) {
            (Some(cumulative), _) => cumulative_sum(
                model,
                cumulative,
                self.tuple,
                self.parameters,
                self.results.row(self.row),
            ),
            (None, Some(body)) => {
                let indices = &model.structures.indices;
                let mut context = Context::new(self, indices);
                let value = body(&mut context);
                if let Some(err) = self.error.take() {
                    return Err(err);
                }
                value
            }
            (None, None) => {
                return Err(CatchmentError::UndefinedEquationBody {
                    equation: model.equations.name(equation).to_string(),
                })
            }
        };

        if self.check_non_finite && !value.is_finite() {
            let tuple = self.tuple;
            return Err(non_finite(model, equation, equation, tuple, self));
        }
        Ok(value)
    }

    fn store(&mut self, equation: EquationH, offset: usize, value: f64) {
        self.results[[self.row, offset]] = value;
        self.cache.results[equation.position()] = value;
        self.cache.result_offsets[equation.position()] = offset;
    }

    /// Offset of a pinned access. A failure is kept until the body returns.
    fn pinned(
        &mut self,
        structure: &StorageStructure,
        position: usize,
        kind: &'static str,
        pins: &[Index],
    ) -> Option<usize> {
        let indices = &self.model.structures.indices;
        match pinned_offset(structure, indices, position, kind, self.tuple, pins) {
            Ok(offset) => Some(offset),
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err);
                }
                None
            }
        }
    }
}

impl ValueAccess for Frame<'_> {
    fn mode(&self) -> Mode {
        Mode::Evaluate
    }

    fn parameter(&mut self, parameter: ParameterH, pins: &[Index]) -> ParameterValue {
        if pins.is_empty() {
            return self.cache.parameters[parameter.position()];
        }
        let model = self.model;
        let structure = &model.structures.parameters;
        match self.pinned(structure, parameter.position(), ParameterH::KIND, pins) {
            Some(offset) => self.parameters[offset],
            None => ParameterValue::Real(0.0),
        }
    }

    fn input(&mut self, input: InputH, pins: &[Index]) -> f64 {
        let offset = if pins.is_empty() {
            Some(self.cache.input_offsets[input.position()])
        } else {
            let model = self.model;
            self.pinned(&model.structures.inputs, input.position(), InputH::KIND, pins)
        };
        offset.map_or(0.0, |offset| self.inputs[offset])
    }

    fn input_was_provided(&mut self, input: InputH, pins: &[Index]) -> bool {
        let offset = if pins.is_empty() {
            Some(self.cache.input_offsets[input.position()])
        } else {
            let model = self.model;
            self.pinned(&model.structures.inputs, input.position(), InputH::KIND, pins)
        };
        offset.map_or(false, |offset| self.input_provided[offset])
    }

    fn result(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        if pins.is_empty() {
            return self.cache.results[equation.position()];
        }
        let model = self.model;
        match self.pinned(&model.structures.results, equation.position(), EquationH::KIND, pins) {
            Some(offset) => self.results[[self.row, offset]],
            None => 0.0,
        }
    }

    fn last_result(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        if pins.is_empty() {
            return self.cache.last_results[equation.position()];
        }
        let model = self.model;
        match self.pinned(&model.structures.results, equation.position(), EquationH::KIND, pins) {
            Some(offset) => self.results[[self.row - 1, offset]],
            None => 0.0,
        }
    }

    fn current_index(&mut self, index_set: IndexSetH) -> usize {
        self.tuple.get(index_set)
    }

    fn write_result(&mut self, equation: EquationH, pins: &[Index], value: f64) {
        let model = self.model;
        let structure = &model.structures.results;
        let Some(offset) = self.pinned(structure, equation.position(), EquationH::KIND, pins) else {
            return;
        };
        self.results[[self.row, offset]] = value;
        if self.cache.result_offsets[equation.position()] == offset {
            self.cache.results[equation.position()] = value;
        }
    }

    fn timestep(&self) -> i64 {
        self.row as i64 - 1
    }
}

/// Finite difference buffers, present when the solver asked for a Jacobian.
struct DifferenceBuffers<'a> {
    base: &'a mut [f64],
    shifted: &'a mut [f64],
    perturbed: &'a mut [f64],
}

/// The ODE system of one solver batch at one index combination.
struct BatchSystem<'f, 'a> {
    frame: &'f mut Frame<'a>,
    batch: &'f Batch,
    differences: Option<DifferenceBuffers<'f>>,
}

/// Put the states into the caches, update the non-integrated members and evaluate the derivatives.
fn evaluate_system(
    frame: &mut Frame<'_>,
    batch: &Batch,
    x: &[f64],
    dx_dt: &mut [f64],
) -> CatchmentResult<()> {
    for (ode, value) in batch.odes.iter().zip(x) {
        frame.cache.results[ode.position()] = *value;
    }
    for equation in &batch.equations {
        let value = frame.evaluate(*equation)?;
        frame.cache.results[equation.position()] = value;
    }
    for (ode, derivative) in batch.odes.iter().zip(dx_dt.iter_mut()) {
        *derivative = frame.evaluate(*ode)?;
    }
    Ok(())
}

impl OdeSystem for BatchSystem<'_, '_> {
    fn evaluate(&mut self, x: &[f64], dx_dt: &mut [f64]) -> CatchmentResult<()> {
        evaluate_system(self.frame, self.batch, x, dx_dt)
    }

    /// Forward differences, perturbing only states some derivative depends on.
    fn jacobian(
        &mut self,
        x: &[f64],
        insert: &mut dyn FnMut(usize, usize, f64),
    ) -> CatchmentResult<()> {
        let Some(buffers) = self.differences.as_mut() else {
            return Err(CatchmentError::JacobianUnavailable);
        };
        evaluate_system(self.frame, self.batch, x, buffers.base)?;
        buffers.perturbed.copy_from_slice(x);

        for (column, rows) in self.batch.jacobian_columns.iter().enumerate() {
            if rows.is_empty() {
                continue;
            }
            let h = f64::EPSILON.sqrt() * x[column].abs().max(1.0);
            buffers.perturbed[column] = x[column] + h;
            evaluate_system(self.frame, self.batch, buffers.perturbed, buffers.shifted)?;
            buffers.perturbed[column] = x[column];

            for &row in rows {
                let derivative = (buffers.shifted[row] - buffers.base[row]) / h;
                if derivative != 0.0 {
                    insert(row, column, derivative);
                }
            }
        }
        Ok(())
    }
}

/// Seed, solve and write back one solver batch.
fn solve_batch(
    frame: &mut Frame<'_>,
    batch: &Batch,
    solver: SolverH,
    scratch: &mut SolverScratch,
) -> CatchmentResult<()> {
    let model = frame.model;
    let spec = model.solvers.get(solver)?;
    let plain_count = batch.equations.len();
    let SolverScratch {
        offsets,
        state,
        workspace,
        base,
        shifted,
        perturbed,
    } = scratch;

    if let Some(condition) = spec.condition {
        if frame.cache.parameters[condition.parameter.position()].as_bool() != condition.value {
            // States hold their previous value
            for (k, ode) in batch.odes.iter().enumerate() {
                let offset = offsets[plain_count + k];
                let previous = frame.results[[frame.row - 1, offset]];
                frame.store(*ode, offset, previous);
            }
            for (equation, offset) in batch.equations.iter().zip(offsets.iter()) {
                frame.store(*equation, *offset, 0.0);
            }
            return Ok(());
        }
    }

    for (k, ode) in batch.odes.iter().enumerate() {
        let resolved = model.equations.get(*ode)?;
        state[k] = if resolved.spec.reset_every_timestep {
            0.0
        } else {
            frame.results[[frame.row - 1, offsets[plain_count + k]]]
        };
    }

    let step = match spec.step {
        SolverStep::Constant(step) => step,
        SolverStep::Parameter(parameter) => frame.cache.parameters[parameter.position()].as_f64(),
    };
    let differences = if spec.function.needs_jacobian() {
        Some(DifferenceBuffers {
            base: base.as_mut_slice(),
            shifted: shifted.as_mut_slice(),
            perturbed: perturbed.as_mut_slice(),
        })
    } else {
        None
    };
    let mut system = BatchSystem {
        frame: &mut *frame,
        batch,
        differences,
    };
    let call = SolverCall {
        step,
        state: state.as_mut_slice(),
        workspace: workspace.as_mut_slice(),
        relative_error: spec.relative_error,
        absolute_error: spec.absolute_error,
    };
    spec.function.solve(call, &mut system)?;

    for (k, ode) in batch.odes.iter().enumerate() {
        let value = state[k];
        if frame.check_non_finite && !value.is_finite() {
            let tuple = frame.tuple;
            frame.cache.results[ode.position()] = value;
            return Err(non_finite(model, *ode, *ode, tuple, frame));
        }
        frame.store(*ode, offsets[plain_count + k], value);
    }
    // Non-integrated members at the final state
    for (equation, offset) in batch.equations.iter().zip(offsets.iter()) {
        let value = frame.evaluate(*equation)?;
        frame.store(*equation, *offset, value);
    }
    Ok(())
}

/// Run every timestep of a data set whose initial values have been computed.
pub(crate) fn run_timesteps(
    model: &Model,
    data: &mut DataSet,
    state: &mut RunState,
) -> CatchmentResult<()> {
    let indices = &model.structures.indices;
    let timesteps = data.timesteps();
    let check_non_finite = model.options.check_non_finite;
    let DataSet {
        parameters,
        inputs,
        input_provided,
        results,
        ..
    } = data;
    let RunState {
        tuple,
        cache,
        fast,
        global_last_offsets,
        scratch,
    } = state;

    for timestep in 0..timesteps {
        let row = timestep + 1;
        let mut cursors = Cursors::default();
        for (equation, offset) in model.global_last_results.iter().zip(global_last_offsets.iter()) {
            cache.last_results[equation.position()] = results[[timestep, *offset]];
        }

        for (group, group_scratch) in model.groups.iter().zip(scratch.iter_mut()) {
            model_loop(&group.index_sets, indices, tuple, |event, tuple| {
                match event {
                    LoopEvent::Enter => {
                        fast.load(&group.plan.start, &mut cursors, cache, results, row);
                        return Ok(());
                    }
                    LoopEvent::Level(level) => {
                        fast.load(&group.plan.levels[level], &mut cursors, cache, results, row);
                        return Ok(());
                    }
                    LoopEvent::Bottom => {}
                }

                let mut frame = Frame {
                    model,
                    tuple,
                    cache: &mut *cache,
                    parameters: parameters.as_slice(),
                    inputs: inputs.row(timestep),
                    input_provided: input_provided.as_slice(),
                    results: &mut *results,
                    row,
                    check_non_finite,
                    error: None,
                };
                for (batch, batch_scratch) in group.batches.iter().zip(group_scratch.iter_mut()) {
                    match batch.solver {
                        None => {
                            for equation in &batch.equations {
                                let offset = fast.writes[cursors.writes];
                                cursors.writes += 1;
                                let value = frame.evaluate(*equation)?;
                                frame.store(*equation, offset, value);
                            }
                        }
                        Some(solver) => {
                            let count = batch_scratch.offsets.len();
                            batch_scratch
                                .offsets
                                .copy_from_slice(&fast.writes[cursors.writes..cursors.writes + count]);
                            cursors.writes += count;
                            solve_batch(&mut frame, batch, solver, batch_scratch)?;
                        }
                    }
                }
                Ok(())
            })?;
        }
    }
    Ok(())
}
