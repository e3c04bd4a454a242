//! Equation registration types.

use crate::access::Context;
use crate::handles::{EquationH, IndexSetH, ParameterH, SolverH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// The body of an equation.
///
/// A body is a pure function of its [`Context`]. It is run once in trace mode
/// while the model is finalized and many times in evaluate mode while the model
/// runs, and must give the same accesses in both.
pub type EquationBody = Arc<dyn Fn(&mut Context<'_>) -> f64 + Send + Sync>;

/// How an equation's value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquationType {
    /// Recomputed for every index combination it varies over, every timestep.
    Plain,
    /// The body gives a time derivative; the value is solver state.
    Ode,
    /// Only run before the first timestep to seed another equation or compute a parameter.
    InitialValue,
    /// The sum of another equation over one index set.
    Cumulative,
}

/// Definition of a cumulative equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CumulativeSpec {
    pub source: EquationH,
    pub over: IndexSetH,
    /// Optional weight applied to each summed value.
    pub weight: Option<ParameterH>,
}

/// Gate on a boolean parameter.
///
/// The gated equation (or solver) only runs where the parameter equals `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub parameter: ParameterH,
    pub value: bool,
}

/// Registration details of an equation.
#[derive(Clone)]
pub struct EquationSpec {
    pub equation_type: EquationType,
    pub unit: String,
    pub body: Option<EquationBody>,
    pub solver: Option<SolverH>,
    pub initial_value_parameter: Option<ParameterH>,
    pub initial_value_equation: Option<EquationH>,
    pub reset_every_timestep: bool,
    pub condition: Option<Condition>,
    /// Equations whose results this equation is allowed to overwrite at explicit indices.
    pub writes: BTreeSet<EquationH>,
    /// Result dependencies declared up front, in addition to the traced ones.
    pub declared_dependencies: BTreeSet<EquationH>,
    pub cumulative: Option<CumulativeSpec>,
    /// Set when this initial-value equation computes a parameter.
    pub computes_parameter: Option<ParameterH>,
}

impl EquationSpec {
    pub fn new(equation_type: EquationType, unit: &str) -> Self {
        Self {
            equation_type,
            unit: unit.to_string(),
            body: None,
            solver: None,
            initial_value_parameter: None,
            initial_value_equation: None,
            reset_every_timestep: false,
            condition: None,
            writes: BTreeSet::new(),
            declared_dependencies: BTreeSet::new(),
            cumulative: None,
            computes_parameter: None,
        }
    }

    /// Returns true if the equation has a slot in result storage.
    pub fn has_result(&self) -> bool {
        self.equation_type != EquationType::InitialValue
    }
}

impl fmt::Debug for EquationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquationSpec")
            .field("equation_type", &self.equation_type)
            .field("unit", &self.unit)
            .field("has_body", &self.body.is_some())
            .field("solver", &self.solver)
            .field("initial_value_parameter", &self.initial_value_parameter)
            .field("initial_value_equation", &self.initial_value_equation)
            .field("reset_every_timestep", &self.reset_every_timestep)
            .field("condition", &self.condition)
            .field("cumulative", &self.cumulative)
            .finish()
    }
}
