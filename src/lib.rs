//! Declarative simulation of equation networks over index sets and time.
//!
//! The engine lives in [`catchment_core`]; solvers and a reference model in
//! [`catchment_components`].

pub use catchment_components;
pub use catchment_core;

pub use catchment_core::data::DataSet;
pub use catchment_core::errors::{CatchmentError, CatchmentResult};
pub use catchment_core::model::{Model, ModelBuilder};
