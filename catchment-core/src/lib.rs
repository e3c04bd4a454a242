pub mod access;
pub mod arena;
pub mod config;
pub mod data;
pub mod equation;
#[cfg(test)]
mod example_solvers;
pub mod handles;
pub mod index_set;
pub mod layout;
pub mod model;
pub mod parameter;
pub mod solver;
pub mod utils;

pub mod errors;
