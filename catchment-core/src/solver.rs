//! The contract between the execution engine and numerical solvers.
//!
//! A solver advances the state of a group of ODE equations over one timestep.
//! The engine owns scheduling; the solver only sees a state vector, a scratch
//! workspace and an [`OdeSystem`] through which it can evaluate derivatives and,
//! if it asked for one, estimate the Jacobian.
//!
//! Time inside a solver call runs from 0 to 1, one model timestep. The step size
//! is a fraction of the timestep.

use crate::errors::CatchmentResult;
use crate::equation::Condition;
use crate::handles::ParameterH;
use std::fmt;
use std::sync::Arc;

/// Everything a solver receives for one call besides the ODE system.
#[derive(Debug)]
pub struct SolverCall<'a> {
    /// Initial (or suggested, for adaptive solvers) step size as a fraction of the timestep.
    pub step: f64,
    /// ODE state. Holds the start state on entry and must hold the end state on return.
    pub state: &'a mut [f64],
    /// Scratch memory of length [`SolverFunction::workspace_size`].
    pub workspace: &'a mut [f64],
    pub relative_error: f64,
    pub absolute_error: f64,
}

impl SolverCall<'_> {
    /// Number of ODE equations being integrated.
    pub fn ode_count(&self) -> usize {
        self.state.len()
    }
}

/// The right-hand side of an ODE system as seen by a solver.
///
/// Both methods may be called any number of times. They update the engine's
/// value caches but never re-enter the scheduler.
pub trait OdeSystem {
    /// Evaluate the derivatives `dx_dt` at state `x`.
    fn evaluate(&mut self, x: &[f64], dx_dt: &mut [f64]) -> CatchmentResult<()>;

    /// Estimate the Jacobian at `x`, emitting every nonzero entry as `(row, column, value)`.
    ///
    /// Only available if the solver's [`SolverFunction::needs_jacobian`] returned true.
    fn jacobian(
        &mut self,
        x: &[f64],
        insert: &mut dyn FnMut(usize, usize, f64),
    ) -> CatchmentResult<()>;
}

/// A numerical integration strategy.
///
/// Implementations are serializable so that a model configuration can select one.
#[typetag::serde(tag = "type")]
pub trait SolverFunction: fmt::Debug + Send + Sync {
    /// Advance `call.state` over one timestep.
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()>;

    /// Length of the scratch workspace needed for `ode_count` equations.
    fn workspace_size(&self, ode_count: usize) -> usize;

    fn needs_jacobian(&self) -> bool {
        false
    }

    fn uses_error_tolerances(&self) -> bool {
        false
    }
}

/// Step size of a solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolverStep {
    Constant(f64),
    /// Read from a real-valued parameter, which may vary over index sets.
    Parameter(ParameterH),
}

/// Registration details of a solver.
#[derive(Debug, Clone)]
pub struct SolverSpec {
    pub function: Arc<dyn SolverFunction>,
    pub step: SolverStep,
    pub relative_error: f64,
    pub absolute_error: f64,
    pub condition: Option<Condition>,
}

impl SolverSpec {
    pub fn new(function: Arc<dyn SolverFunction>, step: SolverStep) -> Self {
        Self {
            function,
            step,
            relative_error: 1e-6,
            absolute_error: 1e-9,
            condition: None,
        }
    }
}
