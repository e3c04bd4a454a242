#![allow(dead_code)]

use crate::errors::{CatchmentError, CatchmentResult};
use crate::solver::{OdeSystem, SolverCall, SolverFunction};
use crate::utils::linear_algebra::lu_solve_inplace;
use serde::{Deserialize, Serialize};

fn substeps(step: f64) -> usize {
    (1.0 / step).round().max(1.0) as usize
}

/// Fixed step forward Euler, for tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TestEuler {}

#[typetag::serde]
impl SolverFunction for TestEuler {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        let n = call.ode_count();
        let steps = substeps(call.step);
        let h = 1.0 / steps as f64;
        let derivatives = &mut call.workspace[..n];
        for _ in 0..steps {
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

/// Fixed step backward Euler with Newton iterations, for tests of the Jacobian path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TestBackwardEuler {
    pub iterations: usize,
}

#[typetag::serde]
impl SolverFunction for TestBackwardEuler {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        let n = call.ode_count();
        let steps = substeps(call.step);
        let h = 1.0 / steps as f64;
        let (derivatives, rest) = call.workspace.split_at_mut(n);
        let (start, rest) = rest.split_at_mut(n);
        let (matrix, rest) = rest.split_at_mut(n * n);
        let correction = &mut rest[..n];

        for _ in 0..steps {
            start.copy_from_slice(call.state);
            for _ in 0..self.iterations {
                system.evaluate(call.state, derivatives)?;
                matrix.fill(0.0);
                system.jacobian(call.state, &mut |row, column, value| {
                    matrix[row * n + column] = -h * value;
                })?;
                for i in 0..n {
                    matrix[i * n + i] += 1.0;
                    correction[i] = start[i] + h * derivatives[i] - call.state[i];
                }
                lu_solve_inplace(matrix, correction).map_err(|err| {
                    CatchmentError::SolverFailed {
                        solver: "TestBackwardEuler".to_string(),
                        message: err.to_string(),
                    }
                })?;
                for (x, delta) in call.state.iter_mut().zip(correction.iter()) {
                    *x += delta;
                }
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
}
