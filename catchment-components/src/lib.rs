//! Ready-made parts for `catchment` models.
//!
//! [`solvers`] holds numerical integrators implementing
//! [`SolverFunction`](catchment_core::solver::SolverFunction). They are
//! registered with `typetag`, so a model configuration can select any of them
//! by name. [`models`] holds small reference models.

pub mod models;
pub mod solvers;
