use super::{check_step, fixed_steps};
use catchment_core::errors::CatchmentResult;
use catchment_core::solver::{OdeSystem, SolverCall, SolverFunction};
use serde::{Deserialize, Serialize};

/// Explicit Euler with a fixed step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Euler {}

#[typetag::serde]
impl SolverFunction for Euler {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        check_step("Euler", call.step)?;
        let n = call.ode_count();
        let derivatives = &mut call.workspace[..n];
        for h in fixed_steps(call.step) {
            system.evaluate(call.state, derivatives)?;
            for (x, dx) in call.state.iter_mut().zip(derivatives.iter()) {
                *x += h * dx;
            }
        }
        Ok(())
    }

    fn workspace_size(&self, ode_count: usize) -> usize {
        ode_count
    }
}
