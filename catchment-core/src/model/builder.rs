//! Model builder: the registry of everything a model is made of.

use super::batches::{order_batches, Schedule};
use super::closure::resolve_index_sets;
use super::discovery::{discover_dependencies, DependencySet};
use super::groups::assemble_groups;
use super::initial::order_initial_values;
use super::planner::{global_last_results, plan_group};
use super::runtime::Model;
use super::types::{InputSpec, ResolvedEquation};
use crate::access::Context;
use crate::arena::Pool;
use crate::config::ModelConfig;
use crate::data::StorageStructures;
use crate::equation::{Condition, CumulativeSpec, EquationSpec, EquationType};
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{
    EquationH, Handle, Index, IndexSetH, InputH, ParameterGroupH, ParameterH, SolverH,
};
use crate::index_set::{IndexSetData, IndexStructure};
use crate::layout::StorageStructure;
use crate::parameter::{Date, ParameterGroupSpec, ParameterSpec, ParameterType, ParameterValue};
use crate::solver::{SolverFunction, SolverSpec, SolverStep};
use log::{info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Registers the entities of a model and compiles them into a [`Model`].
///
/// Registration only records what was declared. Everything that depends on
/// equation bodies (index sets of results, evaluation order, batching) is
/// worked out by [`ModelBuilder::build`], which can be called any number of
/// times.
///
/// ```
/// use catchment_core::model::ModelBuilder;
///
/// let mut builder = ModelBuilder::new();
/// let reach = builder.add_index_set("Reach", &["Upper", "Lower"]).unwrap();
/// let group = builder.add_parameter_group("Reach parameters", &[reach]).unwrap();
/// let area = builder
///     .add_parameter_real(group, "Area", "km2", 10.0, Some(0.0), None)
///     .unwrap();
/// let runoff = builder.add_input("Runoff", "mm/day", &[]).unwrap();
/// let flow = builder.add_equation("Flow", "m3/s").unwrap();
/// builder
///     .set_equation_body(flow, move |ctx| ctx.input(runoff) * ctx.par(area) / 86.4)
///     .unwrap();
///
/// let model = builder.build().unwrap();
/// assert_eq!(model.equation_index_sets(flow).unwrap(), &[reach]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    pub(crate) index_sets: Pool<IndexSetH, IndexSetData>,
    pub(crate) parameter_groups: Pool<ParameterGroupH, ParameterGroupSpec>,
    pub(crate) parameters: Pool<ParameterH, ParameterSpec>,
    pub(crate) inputs: Pool<InputH, InputSpec>,
    pub(crate) equations: Pool<EquationH, EquationSpec>,
    pub(crate) solvers: Pool<SolverH, SolverSpec>,
    config: ModelConfig,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration when building.
    pub fn with_config(&mut self, config: ModelConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn add_index_set(&mut self, name: &str, indices: &[&str]) -> CatchmentResult<IndexSetH> {
        let data = IndexSetData::flat(name, indices)?;
        self.index_sets.add(name, data)
    }

    /// Add an index set whose indices list the indices of the same set that feed into them.
    ///
    /// Branch inputs must be declared before the index they feed.
    pub fn add_branched_index_set(
        &mut self,
        name: &str,
        indices: &[(&str, &[&str])],
    ) -> CatchmentResult<IndexSetH> {
        let data = IndexSetData::branched(name, indices)?;
        self.index_sets.add(name, data)
    }

    pub fn add_parameter_group(
        &mut self,
        name: &str,
        index_sets: &[IndexSetH],
    ) -> CatchmentResult<ParameterGroupH> {
        for set in index_sets {
            self.index_sets.check(*set)?;
        }
        let mut unique = Vec::with_capacity(index_sets.len());
        for set in index_sets {
            if !unique.contains(set) {
                unique.push(*set);
            }
        }
        self.parameter_groups.add(
            name,
            ParameterGroupSpec {
                index_sets: unique,
            },
        )
    }

    fn add_parameter(
        &mut self,
        group: ParameterGroupH,
        name: &str,
        unit: &str,
        mut spec: ParameterSpec,
    ) -> CatchmentResult<ParameterH> {
        self.parameter_groups.check(group)?;
        spec.unit = unit.to_string();
        self.parameters.add(name, spec)
    }

    pub fn add_parameter_real(
        &mut self,
        group: ParameterGroupH,
        name: &str,
        unit: &str,
        default: f64,
        min: Option<f64>,
        max: Option<f64>,
    ) -> CatchmentResult<ParameterH> {
        let mut spec = ParameterSpec::new(group, ParameterValue::Real(default));
        spec.bounds.min = min.map(ParameterValue::Real);
        spec.bounds.max = max.map(ParameterValue::Real);
        self.add_parameter(group, name, unit, spec)
    }

    pub fn add_parameter_uint(
        &mut self,
        group: ParameterGroupH,
        name: &str,
        unit: &str,
        default: u64,
        min: Option<u64>,
        max: Option<u64>,
    ) -> CatchmentResult<ParameterH> {
        let mut spec = ParameterSpec::new(group, ParameterValue::UInt(default));
        spec.bounds.min = min.map(ParameterValue::UInt);
        spec.bounds.max = max.map(ParameterValue::UInt);
        self.add_parameter(group, name, unit, spec)
    }

    pub fn add_parameter_bool(
        &mut self,
        group: ParameterGroupH,
        name: &str,
        default: bool,
    ) -> CatchmentResult<ParameterH> {
        let spec = ParameterSpec::new(group, ParameterValue::Bool(default));
        self.add_parameter(group, name, "", spec)
    }

    pub fn add_parameter_time(
        &mut self,
        group: ParameterGroupH,
        name: &str,
        default: Date,
    ) -> CatchmentResult<ParameterH> {
        let spec = ParameterSpec::new(group, ParameterValue::Time(default));
        self.add_parameter(group, name, "", spec)
    }

    /// Add a parameter taking one of a fixed list of named variants.
    pub fn add_parameter_enum(
        &mut self,
        group: ParameterGroupH,
        name: &str,
        variants: &[&str],
        default: &str,
    ) -> CatchmentResult<ParameterH> {
        let position = variants
            .iter()
            .position(|v| *v == default)
            .ok_or_else(|| CatchmentError::UnknownName {
                kind: "enum variant",
                name: format!("{}/{}", name, default),
            })?;
        let mut spec = ParameterSpec::new(group, ParameterValue::Enum(position as u32));
        spec.variants = variants.iter().map(|v| v.to_string()).collect();
        self.add_parameter(group, name, "", spec)
    }

    pub fn set_parameter_description(
        &mut self,
        parameter: ParameterH,
        description: &str,
    ) -> CatchmentResult<()> {
        self.parameters.get_mut(parameter)?.description = description.to_string();
        Ok(())
    }

    pub fn add_input(
        &mut self,
        name: &str,
        unit: &str,
        index_sets: &[IndexSetH],
    ) -> CatchmentResult<InputH> {
        for set in index_sets {
            self.index_sets.check(*set)?;
        }
        self.inputs.add(
            name,
            InputSpec {
                unit: unit.to_string(),
                index_sets: index_sets.to_vec(),
            },
        )
    }

    pub fn add_equation(&mut self, name: &str, unit: &str) -> CatchmentResult<EquationH> {
        self.equations
            .add(name, EquationSpec::new(EquationType::Plain, unit))
    }

    /// Add an equation whose body gives the time derivative of its value.
    ///
    /// It must be assigned to a solver with [`ModelBuilder::set_solver`].
    pub fn add_ode_equation(&mut self, name: &str, unit: &str) -> CatchmentResult<EquationH> {
        self.equations
            .add(name, EquationSpec::new(EquationType::Ode, unit))
    }

    /// Add an equation that is only evaluated before the first timestep.
    pub fn add_initial_value_equation(
        &mut self,
        name: &str,
        unit: &str,
    ) -> CatchmentResult<EquationH> {
        self.equations
            .add(name, EquationSpec::new(EquationType::InitialValue, unit))
    }

    /// Add an equation summing `source` over the index set `over`, optionally weighted.
    pub fn add_cumulative_equation(
        &mut self,
        name: &str,
        unit: &str,
        source: EquationH,
        over: IndexSetH,
        weight: Option<ParameterH>,
    ) -> CatchmentResult<EquationH> {
        self.check_result_target(name, source)?;
        self.index_sets.check(over)?;
        if let Some(weight) = weight {
            self.expect_type(weight, ParameterType::Real)?;
        }
        let mut spec = EquationSpec::new(EquationType::Cumulative, unit);
        spec.cumulative = Some(CumulativeSpec {
            source,
            over,
            weight,
        });
        self.equations.add(name, spec)
    }

    pub fn set_equation_body<F>(&mut self, equation: EquationH, body: F) -> CatchmentResult<()>
    where
        F: Fn(&mut Context<'_>) -> f64 + Send + Sync + 'static,
    {
        let name = self.equations.name(equation).to_string();
        let spec = self.equations.get_mut(equation)?;
        if spec.equation_type == EquationType::Cumulative {
            return Err(CatchmentError::InvalidReference {
                equation: name.clone(),
                target: name,
                reason: "cumulative equations are computed from their source and take no body"
                    .to_string(),
            });
        }
        spec.body = Some(Arc::new(body));
        Ok(())
    }

    pub fn add_solver(
        &mut self,
        name: &str,
        function: Arc<dyn SolverFunction>,
        step: SolverStep,
    ) -> CatchmentResult<SolverH> {
        if let SolverStep::Parameter(parameter) = step {
            self.expect_type(parameter, ParameterType::Real)?;
        }
        self.solvers.add(name, SolverSpec::new(function, step))
    }

    /// Integrate an ODE equation with `solver`, or pin a plain equation into the solver's batch.
    pub fn set_solver(&mut self, equation: EquationH, solver: SolverH) -> CatchmentResult<()> {
        self.solvers.check(solver)?;
        let spec = self.equations.get(equation)?;
        match spec.equation_type {
            EquationType::Plain | EquationType::Ode => {}
            other => {
                return Err(CatchmentError::InvalidSolverMember {
                    equation: self.equations.name(equation).to_string(),
                    solver: self.solvers.name(solver).to_string(),
                    reason: format!("{:?} equations can not be part of a solver", other),
                })
            }
        }
        self.equations.get_mut(equation)?.solver = Some(solver);
        Ok(())
    }

    pub fn set_solver_tolerances(
        &mut self,
        solver: SolverH,
        relative_error: f64,
        absolute_error: f64,
    ) -> CatchmentResult<()> {
        let spec = self.solvers.get_mut(solver)?;
        spec.relative_error = relative_error;
        spec.absolute_error = absolute_error;
        Ok(())
    }

    /// Take the initial value of `equation` from a parameter.
    pub fn set_initial_value_parameter(
        &mut self,
        equation: EquationH,
        parameter: ParameterH,
    ) -> CatchmentResult<()> {
        self.parameters.check(parameter)?;
        let name = self.equations.name(equation).to_string();
        self.check_result_target(&name, equation)?;
        self.equations.get_mut(equation)?.initial_value_parameter = Some(parameter);
        Ok(())
    }

    /// Compute the initial value of `equation` with an initial-value equation.
    pub fn set_initial_value_equation(
        &mut self,
        equation: EquationH,
        initial: EquationH,
    ) -> CatchmentResult<()> {
        let name = self.equations.name(equation).to_string();
        self.check_result_target(&name, equation)?;
        if self.equations.get(initial)?.equation_type != EquationType::InitialValue {
            return Err(CatchmentError::InvalidReference {
                equation: name,
                target: self.equations.name(initial).to_string(),
                reason: "only initial-value equations can provide initial values".to_string(),
            });
        }
        self.equations.get_mut(equation)?.initial_value_equation = Some(initial);
        Ok(())
    }

    /// Start the ODE from zero every timestep instead of from its previous value.
    pub fn reset_every_timestep(&mut self, equation: EquationH) -> CatchmentResult<()> {
        let name = self.equations.name(equation).to_string();
        let spec = self.equations.get_mut(equation)?;
        if spec.equation_type != EquationType::Ode {
            return Err(CatchmentError::InvalidReference {
                equation: name.clone(),
                target: name,
                reason: "only ODE equations can be reset every timestep".to_string(),
            });
        }
        spec.reset_every_timestep = true;
        Ok(())
    }

    /// Let an initial-value equation compute `parameter` before the first timestep.
    ///
    /// Values supplied for the parameter in a data set are overwritten.
    pub fn set_computed_parameter(
        &mut self,
        equation: EquationH,
        parameter: ParameterH,
    ) -> CatchmentResult<()> {
        let name = self.equations.name(equation).to_string();
        if self.equations.get(equation)?.equation_type != EquationType::InitialValue {
            return Err(CatchmentError::InvalidReference {
                equation: name,
                target: self.parameters.name(parameter).to_string(),
                reason: "only initial-value equations can compute parameters".to_string(),
            });
        }
        if self.parameters.get(parameter)?.parameter_type == ParameterType::Time {
            return Err(CatchmentError::InvalidReference {
                equation: name,
                target: self.parameters.name(parameter).to_string(),
                reason: "dates can not be computed".to_string(),
            });
        }
        if let Some(existing) = self.parameters.get(parameter)?.computed_by {
            return Err(CatchmentError::InvalidReference {
                equation: name,
                target: self.parameters.name(parameter).to_string(),
                reason: format!(
                    "the parameter is already computed by \"{}\"",
                    self.equations.name(existing)
                ),
            });
        }
        self.parameters.get_mut(parameter)?.computed_by = Some(equation);
        self.equations.get_mut(equation)?.computes_parameter = Some(parameter);
        Ok(())
    }

    /// Only evaluate `equation` where the boolean `parameter` equals `value`. Elsewhere it is 0.
    pub fn set_conditional(
        &mut self,
        equation: EquationH,
        parameter: ParameterH,
        value: bool,
    ) -> CatchmentResult<()> {
        self.expect_type(parameter, ParameterType::Bool)?;
        self.equations.get_mut(equation)?.condition = Some(Condition { parameter, value });
        Ok(())
    }

    /// Only integrate `solver` where the boolean `parameter` equals `value`.
    ///
    /// Elsewhere its ODE equations keep their previous value and its other equations are 0.
    pub fn set_solver_conditional(
        &mut self,
        solver: SolverH,
        parameter: ParameterH,
        value: bool,
    ) -> CatchmentResult<()> {
        self.expect_type(parameter, ParameterType::Bool)?;
        self.solvers.get_mut(solver)?.condition = Some(Condition { parameter, value });
        Ok(())
    }

    /// Allow `equation` to overwrite values of `target` at explicit indices.
    pub fn declare_writes(&mut self, equation: EquationH, target: EquationH) -> CatchmentResult<()> {
        let name = self.equations.name(equation).to_string();
        self.check_result_target(&name, target)?;
        self.equations.get_mut(equation)?.writes.insert(target);
        Ok(())
    }

    /// Declare a current-value dependency that tracing can not see, for bodies
    /// that only read `target` on some branches.
    pub fn declare_result_dependency(
        &mut self,
        equation: EquationH,
        target: EquationH,
    ) -> CatchmentResult<()> {
        let name = self.equations.name(equation).to_string();
        self.check_result_target(&name, target)?;
        self.equations
            .get_mut(equation)?
            .declared_dependencies
            .insert(target);
        Ok(())
    }

    pub fn index_set(&self, name: &str) -> CatchmentResult<IndexSetH> {
        self.index_sets.find(name)
    }

    pub fn index(&self, index_set: IndexSetH, name: &str) -> CatchmentResult<Index> {
        let data = self.index_sets.get(index_set)?;
        data.position(name)
            .map(|position| Index::new(index_set, position))
            .ok_or_else(|| CatchmentError::UnknownName {
                kind: "index",
                name: format!("{}/{}", data.name, name),
            })
    }

    pub fn parameter_group(&self, name: &str) -> CatchmentResult<ParameterGroupH> {
        self.parameter_groups.find(name)
    }

    pub fn parameter(&self, name: &str) -> CatchmentResult<ParameterH> {
        self.parameters.find(name)
    }

    pub fn input(&self, name: &str) -> CatchmentResult<InputH> {
        self.inputs.find(name)
    }

    pub fn equation(&self, name: &str) -> CatchmentResult<EquationH> {
        self.equations.find(name)
    }

    pub fn solver(&self, name: &str) -> CatchmentResult<SolverH> {
        self.solvers.find(name)
    }

    fn expect_type(&self, parameter: ParameterH, expected: ParameterType) -> CatchmentResult<()> {
        let spec = self.parameters.get(parameter)?;
        if spec.parameter_type != expected {
            return Err(CatchmentError::ParameterTypeMismatch {
                parameter: self.parameters.name(parameter).to_string(),
                expected: expected.to_string(),
                found: spec.parameter_type.to_string(),
            });
        }
        Ok(())
    }

    /// Checks that `target` has a result that `equation` can refer to.
    fn check_result_target(&self, equation: &str, target: EquationH) -> CatchmentResult<()> {
        if !self.equations.get(target)?.has_result() {
            return Err(CatchmentError::InvalidReference {
                equation: equation.to_string(),
                target: self.equations.name(target).to_string(),
                reason: "initial-value equations have no result".to_string(),
            });
        }
        Ok(())
    }

    /// Solvers with configuration overrides applied.
    fn configured_solvers(&self) -> CatchmentResult<Pool<SolverH, SolverSpec>> {
        let mut solvers = self.solvers.clone();
        for (name, overrides) in &self.config.solvers {
            let solver = solvers.find(name)?;
            let spec = solvers.get_mut(solver)?;
            if let Some(function) = &overrides.function {
                spec.function = Arc::clone(function);
            }
            if let Some(step) = overrides.step {
                spec.step = SolverStep::Constant(step);
            }
            if let Some(relative_error) = overrides.relative_error {
                spec.relative_error = relative_error;
            }
            if let Some(absolute_error) = overrides.absolute_error {
                spec.absolute_error = absolute_error;
            }
        }
        Ok(solvers)
    }

    fn storage_structures(
        &self,
        indices: IndexStructure,
        equations: &Pool<EquationH, ResolvedEquation>,
    ) -> CatchmentResult<StorageStructures> {
        let mut parameter_sets = Vec::with_capacity(self.parameters.len());
        for (_, spec) in self.parameters.iter() {
            let group = self.parameter_groups.get(spec.group)?;
            parameter_sets.push(Some(group.index_sets.clone()));
        }
        let input_sets: Vec<Option<Vec<IndexSetH>>> = self
            .inputs
            .iter()
            .map(|(_, spec)| Some(spec.index_sets.clone()))
            .collect();
        let result_sets: Vec<Option<Vec<IndexSetH>>> = equations
            .iter()
            .map(|(_, resolved)| {
                resolved
                    .spec
                    .has_result()
                    .then(|| resolved.index_sets.clone())
            })
            .collect();

        Ok(StorageStructures {
            parameters: StorageStructure::build(
                self.parameters.names().to_vec(),
                &parameter_sets,
                &indices,
            ),
            parameter_types: self.parameters.iter().map(|(_, p)| p.parameter_type).collect(),
            parameter_defaults: self.parameters.iter().map(|(_, p)| p.default).collect(),
            parameter_bounds: self.parameters.iter().map(|(_, p)| p.bounds).collect(),
            inputs: StorageStructure::build(self.inputs.names().to_vec(), &input_sets, &indices),
            results: StorageStructure::build(
                equations.names().to_vec(),
                &result_sets,
                &indices,
            ),
            indices,
        })
    }

    /// Compile the registered entities into a runnable [`Model`].
    ///
    /// Equation bodies are traced to find what they read, index sets are
    /// resolved, equations are ordered into batches and batch groups and a load
    /// plan is made for every group.
    pub fn build(&self) -> CatchmentResult<Model> {
        let indices = IndexStructure::new(self.index_sets.iter().map(|(_, d)| d.clone()).collect());
        let solvers = self.configured_solvers()?;

        for (equation, spec) in self.equations.iter() {
            if spec.equation_type == EquationType::Ode && spec.solver.is_none() {
                return Err(CatchmentError::IntegratedWithoutSolver {
                    equation: self.equations.name(equation).to_string(),
                });
            }
        }

        let mut dependencies = discover_dependencies(self, &indices)?;
        let mut index_sets =
            resolve_index_sets(self, &solvers, &dependencies, &self.config.schedule)?;

        let equations = self.equations.clone().map(|equation, spec| {
            let position = equation.position();
            ResolvedEquation {
                spec,
                index_sets: std::mem::take(&mut index_sets[position]).into_iter().collect(),
                dependencies: std::mem::take::<DependencySet>(&mut dependencies[position]),
            }
        });

        let structures = self.storage_structures(indices, &equations)?;

        let Schedule { batches, graph } = order_batches(&equations, &solvers)?;
        let mut groups = assemble_groups(&equations, batches, &self.config.schedule)?;
        for group in groups.iter_mut() {
            let plan = plan_group(group, &equations, &solvers, &structures)?;
            group.plan = plan;
        }
        let global_last_results = global_last_results(&equations, &structures);
        let initial_order = order_initial_values(&equations, &self.parameters)?;

        let attached: BTreeSet<EquationH> = equations
            .iter()
            .filter_map(|(_, resolved)| resolved.spec.initial_value_equation)
            .collect();
        for (equation, resolved) in equations.iter() {
            let spec = &resolved.spec;
            if spec.equation_type == EquationType::InitialValue
                && spec.computes_parameter.is_none()
                && !attached.contains(&equation)
            {
                warn!(
                    "Initial-value equation \"{}\" is never used",
                    equations.name(equation)
                );
            }
        }

        info!(
            "Built model with {} equations in {} batch groups ({} solver batches)",
            equations.len(),
            groups.len(),
            groups
                .iter()
                .flat_map(|g| g.batches.iter())
                .filter(|b| b.is_solver())
                .count()
        );

        Ok(Model {
            structures: Arc::new(structures),
            equations,
            parameters: self.parameters.clone(),
            inputs: self.inputs.clone(),
            solvers,
            groups,
            global_last_results,
            initial_order,
            graph,
            options: self.config.run.clone(),
        })
    }
}
