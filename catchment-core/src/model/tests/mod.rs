//! Integration tests for the model module.
//!
//! These tests register small models through the public builder API, build and
//! run them, and check both the compiled schedule and the results.

#[cfg(test)]
mod closure;
#[cfg(test)]
mod cumulative;
#[cfg(test)]
mod explicit_indices;
#[cfg(test)]
mod non_finite;
#[cfg(test)]
mod scheduling;
#[cfg(test)]
mod solvers;
