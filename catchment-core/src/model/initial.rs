//! Initial values.
//!
//! Before the first timestep every result gets a starting value in row 0 of
//! result storage, and parameters computed by initial-value equations are filled
//! in. Equations are visited in an order of their own, since the bodies evaluated
//! here (initial-value equations in place of the regular ones) read different
//! values than while the model runs.

use super::batches::{ring, topological_order};
use super::diagnostics::non_finite;
use super::execution::{cumulative_sum, model_loop, pinned_offset, LoopEvent};
use super::runtime::Model;
use super::types::{DependencyEdge, ResolvedEquation};
use crate::access::{Context, Mode, ValueAccess};
use crate::arena::Pool;
use crate::data::DataSet;
use crate::equation::EquationType;
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, Handle, Index, IndexSetH, InputH, ParameterH};
use crate::layout::{IndexTuple, StorageStructure};
use crate::parameter::{ParameterSpec, ParameterType, ParameterValue};
use log::debug;
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use std::collections::{BTreeMap, BTreeSet};

/// True if the equation takes part in the initial pass.
fn has_initial_value(resolved: &ResolvedEquation) -> bool {
    resolved.spec.has_result() || resolved.spec.computes_parameter.is_some()
}

/// Equations whose initial value must be known before this one is computed,
/// mapped to whether they are only read at explicit indices.
///
/// Previous-value reads do not order initial values, so that equations coupled
/// through their previous values do not form a cycle here.
fn initial_dependencies(
    equations: &Pool<EquationH, ResolvedEquation>,
    parameters: &Pool<ParameterH, ParameterSpec>,
    equation: EquationH,
    resolved: &ResolvedEquation,
) -> CatchmentResult<BTreeMap<EquationH, bool>> {
    let spec = &resolved.spec;
    // Whose body runs in the initial pass
    let evaluated = match (spec.initial_value_equation, spec.initial_value_parameter) {
        (Some(initial), _) => Some(equations.get(initial)?),
        (None, Some(_)) => None,
        (None, None) if spec.equation_type == EquationType::Ode => None,
        (None, None) => Some(resolved),
    };

    let mut read_parameters: BTreeSet<ParameterH> = BTreeSet::new();
    let mut dependencies: BTreeMap<EquationH, bool> = BTreeMap::new();
    if let Some(evaluated) = evaluated {
        let deps = &evaluated.dependencies;
        for access in &deps.results {
            dependencies
                .entry(access.target)
                .and_modify(|c| *c &= !access.is_direct())
                .or_insert(!access.is_direct());
        }
        read_parameters.extend(deps.parameters.iter().map(|a| a.target));
        if let Some(cumulative) = evaluated.spec.cumulative {
            dependencies.insert(cumulative.source, false);
        }
    }
    read_parameters.extend(spec.initial_value_parameter);
    read_parameters.extend(spec.condition.map(|c| c.parameter));

    for parameter in read_parameters {
        if let Some(computed_by) = parameters.get(parameter)?.computed_by {
            dependencies.insert(computed_by, false);
        }
    }
    dependencies.remove(&equation);
    Ok(dependencies)
}

/// Order in which initial values are computed.
pub(crate) fn order_initial_values(
    equations: &Pool<EquationH, ResolvedEquation>,
    parameters: &Pool<ParameterH, ParameterSpec>,
) -> CatchmentResult<Vec<EquationH>> {
    let mut graph: Graph<EquationH, DependencyEdge> = Graph::new();
    let mut nodes: BTreeMap<EquationH, NodeIndex> = BTreeMap::new();
    for (equation, resolved) in equations.iter() {
        if has_initial_value(resolved) {
            nodes.insert(equation, graph.add_node(equation));
        }
    }

    for (equation, resolved) in equations.iter() {
        let Some(&from) = nodes.get(&equation) else {
            continue;
        };
        for (dependency, cross_index) in
            initial_dependencies(equations, parameters, equation, resolved)?
        {
            if let Some(&to) = nodes.get(&dependency) {
                graph.add_edge(
                    from,
                    to,
                    DependencyEdge {
                        dependent: equation,
                        dependency,
                        cross_index,
                    },
                );
            }
        }
    }

    let order = topological_order(&graph).map_err(|edges| CatchmentError::InitialValueCycle {
        ring: ring(&edges, equations),
    })?;
    Ok(order.into_iter().map(|node| graph[node]).collect())
}

/// Value access against row 0 of result storage.
struct InitialAccess<'a> {
    model: &'a Model,
    tuple: &'a IndexTuple,
    data: &'a mut DataSet,
    /// First failed access, reported once the value is computed.
    error: Option<CatchmentError>,
}

impl InitialAccess<'_> {
    fn offset(
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

    fn parameter_offset(&mut self, parameter: ParameterH, pins: &[Index]) -> Option<usize> {
        let model = self.model;
        self.offset(&model.structures.parameters, parameter.position(), ParameterH::KIND, pins)
    }

    fn input_offset(&mut self, input: InputH, pins: &[Index]) -> Option<usize> {
        let model = self.model;
        self.offset(&model.structures.inputs, input.position(), InputH::KIND, pins)
    }

    fn result_offset(&mut self, equation: EquationH, pins: &[Index]) -> Option<usize> {
        let model = self.model;
        self.offset(&model.structures.results, equation.position(), EquationH::KIND, pins)
    }
}

impl ValueAccess for InitialAccess<'_> {
    fn mode(&self) -> Mode {
        Mode::Evaluate
    }

    fn parameter(&mut self, parameter: ParameterH, pins: &[Index]) -> ParameterValue {
        match self.parameter_offset(parameter, pins) {
            Some(offset) => self.data.parameters[offset],
            None => ParameterValue::Real(0.0),
        }
    }

    /// Initial values see the inputs of the first timestep.
    fn input(&mut self, input: InputH, pins: &[Index]) -> f64 {
        let offset = self.input_offset(input, pins);
        if self.data.inputs.nrows() == 0 {
            return 0.0;
        }
        offset.map_or(0.0, |offset| self.data.inputs[[0, offset]])
    }

    fn input_was_provided(&mut self, input: InputH, pins: &[Index]) -> bool {
        self.input_offset(input, pins)
            .map_or(false, |offset| self.data.input_provided[offset])
    }

    fn result(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        self.result_offset(equation, pins)
            .map_or(0.0, |offset| self.data.results[[0, offset]])
    }

    /// There is no earlier timestep. Reads the initial value if it has been computed already.
    fn last_result(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        self.result(equation, pins)
    }

    fn current_index(&mut self, index_set: IndexSetH) -> usize {
        self.tuple.get(index_set)
    }

    fn write_result(&mut self, equation: EquationH, pins: &[Index], value: f64) {
        if let Some(offset) = self.result_offset(equation, pins) {
            self.data.results[[0, offset]] = value;
        }
    }

    fn timestep(&self) -> i64 {
        -1
    }
}

/// What produces the initial value of an equation.
enum Source<'a> {
    Body(&'a ResolvedEquation),
    Parameter(ParameterH),
    Cumulative,
    Zero,
}

fn source<'a>(
    model: &'a Model,
    resolved: &'a ResolvedEquation,
) -> CatchmentResult<Source<'a>> {
    let spec = &resolved.spec;
    Ok(match (spec.initial_value_equation, spec.initial_value_parameter) {
        (Some(initial), _) => Source::Body(model.equations.get(initial)?),
        (None, Some(parameter)) => Source::Parameter(parameter),
        (None, None) => match spec.equation_type {
            EquationType::Ode => Source::Zero,
            EquationType::Cumulative => Source::Cumulative,
            EquationType::Plain | EquationType::InitialValue => Source::Body(resolved),
        },
    })
}

fn evaluate_body(
    model: &Model,
    evaluated: &ResolvedEquation,
    equation: EquationH,
    access: &mut InitialAccess<'_>,
) -> CatchmentResult<f64> {
    let body = evaluated
        .spec
        .body
        .as_ref()
        .ok_or_else(|| CatchmentError::UndefinedEquationBody {
            equation: model.equations.name(equation).to_string(),
        })?;
    let mut context = Context::new(access, &model.structures.indices);
    Ok(body(&mut context))
}

/// Compute one initial value at the current index combination.
fn initial_value(
    model: &Model,
    equation: EquationH,
    resolved: &ResolvedEquation,
    access: &mut InitialAccess<'_>,
) -> CatchmentResult<f64> {
    if let Some(condition) = resolved.spec.condition {
        if access.parameter(condition.parameter, &[]).as_bool() != condition.value {
            return Ok(0.0);
        }
    }
    match source(model, resolved)? {
        Source::Body(evaluated) => evaluate_body(model, evaluated, equation, access),
        Source::Parameter(parameter) => Ok(access.parameter(parameter, &[]).as_f64()),
        Source::Zero => Ok(0.0),
        Source::Cumulative => {
            let Some(cumulative) = resolved.spec.cumulative else {
                return Ok(0.0);
            };
            Ok(cumulative_sum(
                model,
                &cumulative,
                access.tuple,
                &access.data.parameters,
                access.data.results.row(0),
            ))
        }
    }
}

/// Fill row 0 of the results and every computed parameter.
pub(crate) fn run_initial_values(model: &Model, data: &mut DataSet) -> CatchmentResult<()> {
    let indices = &model.structures.indices;
    let mut tuple = IndexTuple::new(indices.len());
    let check_non_finite = model.options.check_non_finite;

    for &equation in &model.initial_order {
        let resolved = model.equations.get(equation)?;
        let computed = resolved.spec.computes_parameter;

        model_loop(&resolved.index_sets, indices, &mut tuple, |event, tuple| {
            if event != LoopEvent::Bottom {
                return Ok(());
            }
            let mut access = InitialAccess {
                model,
                tuple,
                data: &mut *data,
                error: None,
            };
            let value = initial_value(model, equation, resolved, &mut access)?;
            if let Some(err) = access.error.take() {
                return Err(err);
            }
            if check_non_finite && !value.is_finite() {
                let evaluated = resolved.spec.initial_value_equation.unwrap_or(equation);
                return Err(non_finite(model, equation, evaluated, tuple, &mut access));
            }

            match computed {
                Some(parameter) => {
                    let layout = model
                        .structures
                        .parameters
                        .require(parameter.position(), ParameterH::KIND)?;
                    let parameter_type = model.parameters.get(parameter)?.parameter_type;
                    let computed = ParameterValue::from_f64(parameter_type, value).ok_or_else(|| {
                        CatchmentError::ParameterTypeMismatch {
                            parameter: model.parameters.name(parameter).to_string(),
                            expected: parameter_type.to_string(),
                            found: ParameterType::Real.to_string(),
                        }
                    })?;
                    data.parameters[layout.offset(tuple)] = computed;
                }
                None => {
                    let layout = model
                        .structures
                        .results
                        .require(equation.position(), EquationH::KIND)?;
                    data.results[[0, layout.offset(tuple)]] = value;
                }
            }
            Ok(())
        })?;
    }
    debug!("Computed initial values of {} equations", model.initial_order.len());
    Ok(())
}
