//! Reference models, registered into a caller's [`ModelBuilder`](catchment_core::model::ModelBuilder).

mod river_network;

pub use river_network::{RiverNetwork, M3_PER_MM_KM2, SECONDS_PER_DAY};
