//! Adaptive Runge-Kutta-Cash-Karp 4(5).
//!
//! Each step computes a fifth order solution and an embedded fourth order
//! estimate. The scaled difference between them decides whether the step is
//! accepted and how large the next one is.

use super::{check_step, failure};
use catchment_core::errors::CatchmentResult;
use catchment_core::solver::{OdeSystem, SolverCall, SolverFunction};
use log::trace;
use serde::{Deserialize, Serialize};

const A: [[f64; 5]; 5] = [
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
    [3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0, 0.0, 0.0],
    [-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0, 0.0],
    [
        1631.0 / 55296.0,
        175.0 / 512.0,
        575.0 / 13824.0,
        44275.0 / 110592.0,
        253.0 / 4096.0,
    ],
];

/// Fifth order weights.
const B5: [f64; 6] = [
    37.0 / 378.0,
    0.0,
    250.0 / 621.0,
    125.0 / 594.0,
    0.0,
    512.0 / 1771.0,
];

/// Fourth order weights.
const B4: [f64; 6] = [
    2825.0 / 27648.0,
    0.0,
    18575.0 / 48384.0,
    13525.0 / 55296.0,
    277.0 / 14336.0,
    1.0 / 4.0,
];

/// Time treated as the end of the timestep, absorbing rounding in the sum of steps.
const END: f64 = 1.0 - 1e-12;
const SAFETY: f64 = 0.9;
const MIN_SCALE: f64 = 0.2;
const MAX_SCALE: f64 = 5.0;

/// Adaptive step size solver controlled by the solver's error tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CashKarp {
    /// Smallest step before the solve is abandoned.
    pub min_step: f64,
    /// Upper bound on attempted steps per timestep.
    pub max_steps: usize,
}

impl Default for CashKarp {
    fn default() -> Self {
        Self {
            min_step: 1e-10,
            max_steps: 100_000,
        }
    }
}

#[typetag::serde]
impl SolverFunction for CashKarp {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        check_step("CashKarp", call.step)?;
        let n = call.ode_count();
        let (stages, rest) = call.workspace.split_at_mut(6 * n);
        let (stage_state, rest) = rest.split_at_mut(n);
        let candidate = &mut rest[..n];

        let mut t = 0.0;
        let mut h = call.step.min(1.0);
        let mut attempts = 0;
        while t < END {
            attempts += 1;
            if attempts > self.max_steps {
                return Err(failure(
                    "CashKarp",
                    format!("no solution after {} attempted steps", self.max_steps),
                ));
            }
            h = h.min(1.0 - t);

            system.evaluate(call.state, &mut stages[..n])?;
            for (s, row) in A.iter().enumerate() {
                for i in 0..n {
                    let mut sum = 0.0;
                    for (j, a) in row.iter().enumerate().take(s + 1) {
                        sum += a * stages[j * n + i];
                    }
                    stage_state[i] = call.state[i] + h * sum;
                }
                let (_, next) = stages.split_at_mut((s + 1) * n);
                system.evaluate(stage_state, &mut next[..n])?;
            }

            let mut error: f64 = 0.0;
            for i in 0..n {
                let mut high = 0.0;
                let mut low = 0.0;
                for j in 0..6 {
                    high += B5[j] * stages[j * n + i];
                    low += B4[j] * stages[j * n + i];
                }
                candidate[i] = call.state[i] + h * high;
                let scale = call.absolute_error + call.relative_error * candidate[i].abs();
                error = error.max((h * (high - low)).abs() / scale);
            }
            if !error.is_finite() {
                return Err(failure("CashKarp", "error estimate is not finite"));
            }

            if error <= 1.0 {
                t += h;
                call.state.copy_from_slice(candidate);
            }
            let factor = if error == 0.0 {
                MAX_SCALE
            } else {
                (SAFETY * error.powf(-0.2)).clamp(MIN_SCALE, MAX_SCALE)
            };
            h *= factor;
            if h < self.min_step && t < END {
                return Err(failure(
                    "CashKarp",
                    format!("step size fell below {} at t = {}", self.min_step, t),
                ));
            }
        }
        trace!("CashKarp finished after {} attempted steps", attempts);
        Ok(())
    }

    fn workspace_size(&self, ode_count: usize) -> usize {
        8 * ode_count
    }

    fn uses_error_tolerances(&self) -> bool {
        true
    }
}
