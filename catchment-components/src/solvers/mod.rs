//! Numerical solvers.
//!
//! All solvers integrate over one model timestep, from time 0 to time 1. Fixed
//! step solvers take steps of `SolverCall::step` and shorten the last one to end
//! exactly at 1. The adaptive [`CashKarp`] solver uses the step as its first
//! guess.

mod cash_karp;
mod euler;
mod implicit_euler;
mod rk4;

pub use cash_karp::CashKarp;
pub use euler::Euler;
pub use implicit_euler::ImplicitEuler;
pub use rk4::Rk4;

use catchment_core::errors::{CatchmentError, CatchmentResult};

pub(crate) fn failure(solver: &str, message: impl Into<String>) -> CatchmentError {
    CatchmentError::SolverFailed {
        solver: solver.to_string(),
        message: message.into(),
    }
}

pub(crate) fn check_step(solver: &str, step: f64) -> CatchmentResult<()> {
    if step.is_finite() && step > 0.0 {
        Ok(())
    } else {
        Err(failure(solver, format!("invalid step size {}", step)))
    }
}

/// Sizes of the fixed steps covering one timestep.
pub(crate) fn fixed_steps(step: f64) -> impl Iterator<Item = f64> {
    let mut t = 0.0;
    std::iter::from_fn(move || {
        // Remainders below this are rounding error from summing the steps
        if t >= 1.0 - 1e-12 {
            return None;
        }
        let h = step.min(1.0 - t);
        t += h;
        Some(h)
    })
}
