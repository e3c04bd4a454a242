//! A model is a network of equations over index sets, solved one timestep at a time.
//!
//! Client code registers index sets, parameters, inputs, equations and solvers
//! with a [`ModelBuilder`]. Building the model traces every equation body to find
//! what it reads, works out the index sets each result varies over and compiles
//! an execution plan: an ordered list of [`BatchGroup`]s, each walked with one
//! nested loop over its index sets. Running the model replays that plan for
//! every timestep of a [`DataSet`](crate::data::DataSet).
//!
//! Results only ever flow forward through the plan. An equation is evaluated
//! after every equation whose current value it reads at its own index
//! combination, and ODE equations sharing a solver are integrated together.

mod batches;
mod builder;
mod closure;
mod diagnostics;
mod discovery;
mod execution;
mod groups;
mod initial;
mod planner;
mod runtime;
mod types;

#[cfg(test)]
mod tests;

pub use builder::ModelBuilder;
pub use discovery::{Access, DependencySet};
pub use runtime::Model;
pub use types::{Batch, BatchGroup, DependencyEdge, ScheduleGraph};
