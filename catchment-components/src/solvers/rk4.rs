use super::{check_step, fixed_steps};
use catchment_core::errors::CatchmentResult;
use catchment_core::solver::{OdeSystem, SolverCall, SolverFunction};
use serde::{Deserialize, Serialize};

/// Classical fourth order Runge-Kutta with a fixed step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rk4 {}

#[typetag::serde]
impl SolverFunction for Rk4 {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        check_step("Rk4", call.step)?;
        let n = call.ode_count();
        let (k1, rest) = call.workspace.split_at_mut(n);
        let (k2, rest) = rest.split_at_mut(n);
        let (k3, rest) = rest.split_at_mut(n);
        let (k4, rest) = rest.split_at_mut(n);
        let stage = &mut rest[..n];

        for h in fixed_steps(call.step) {
            system.evaluate(call.state, k1)?;
            for i in 0..n {
                stage[i] = call.state[i] + 0.5 * h * k1[i];
            }
            system.evaluate(stage, k2)?;
            for i in 0..n {
                stage[i] = call.state[i] + 0.5 * h * k2[i];
            }
            system.evaluate(stage, k3)?;
            for i in 0..n {
                stage[i] = call.state[i] + h * k3[i];
            }
            system.evaluate(stage, k4)?;
            for i in 0..n {
                call.state[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
            }
        }
        Ok(())
    }

    fn workspace_size(&self, ode_count: usize) -> usize {
        5 * ode_count
    }
}
