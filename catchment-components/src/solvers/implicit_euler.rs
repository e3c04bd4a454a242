use super::{check_step, failure, fixed_steps};
use catchment_core::errors::CatchmentResult;
use catchment_core::solver::{OdeSystem, SolverCall, SolverFunction};
use catchment_core::utils::linear_algebra::lu_solve_inplace;
use serde::{Deserialize, Serialize};

/// Backward Euler with a fixed step, for stiff systems.
///
/// Each step solves `x = x0 + h f(x)` with Newton iterations, using the
/// Jacobian estimated by the engine. Iteration stops once every correction is
/// within the solver's error tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitEuler {
    pub max_iterations: usize,
}

impl Default for ImplicitEuler {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

#[typetag::serde]
impl SolverFunction for ImplicitEuler {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        check_step("ImplicitEuler", call.step)?;
        let n = call.ode_count();
        let (derivatives, rest) = call.workspace.split_at_mut(n);
        let (start, rest) = rest.split_at_mut(n);
        let (correction, rest) = rest.split_at_mut(n);
        let matrix = &mut rest[..n * n];

        for h in fixed_steps(call.step) {
            start.copy_from_slice(call.state);
            let mut converged = false;
            for _ in 0..self.max_iterations {
                system.evaluate(call.state, derivatives)?;
                // Newton matrix I - h J
                matrix.fill(0.0);
                system.jacobian(call.state, &mut |row, column, value| {
                    matrix[row * n + column] = -h * value;
                })?;
                for i in 0..n {
                    matrix[i * n + i] += 1.0;
                    correction[i] = start[i] + h * derivatives[i] - call.state[i];
                }
                lu_solve_inplace(matrix, correction)
                    .map_err(|err| failure("ImplicitEuler", err.to_string()))?;

                converged = true;
                for (x, delta) in call.state.iter_mut().zip(correction.iter()) {
                    *x += delta;
                    if delta.abs() > call.absolute_error + call.relative_error * x.abs() {
                        converged = false;
                    }
                }
                if converged {
                    break;
                }
            }
            if !converged {
                return Err(failure(
                    "ImplicitEuler",
                    format!(
                        "Newton iteration did not converge in {} iterations",
                        self.max_iterations
                    ),
                ));
            }
        }
        Ok(())
    }

    fn workspace_size(&self, ode_count: usize) -> usize {
        3 * ode_count + ode_count * ode_count
    }

    fn needs_jacobian(&self) -> bool {
        true
    }

    fn uses_error_tolerances(&self) -> bool {
        true
    }
}
