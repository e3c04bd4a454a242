//! Model configuration.
//!
//! Configuration tunes how a model is compiled and run without changing its
//! structure. It can be written in TOML:
//!
//! ```toml
//! [schedule]
//! sink_batches = false
//!
//! [run]
//! check_non_finite = true
//!
//! [solvers."Soil solver"]
//! step = 0.05
//! relative_error = 1e-4
//! ```

use crate::errors::CatchmentResult;
use crate::solver::SolverFunction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Options for compiling the execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Upper bound on the number of index set closure iterations.
    pub closure_iteration_limit: usize,
    /// Move batches into later batch groups where possible to reduce the number of groups.
    pub sink_batches: bool,
    /// Upper bound on the number of sinking passes.
    pub sink_iteration_limit: usize,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            closure_iteration_limit: 1000,
            sink_batches: true,
            sink_iteration_limit: 100,
        }
    }
}

/// Options for running a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Fail the run if any equation produces a NaN or infinite value.
    pub check_non_finite: bool,
}

/// Replaces registration details of a named solver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOverride {
    pub function: Option<Arc<dyn SolverFunction>>,
    /// Constant step size, replacing a constant or parameter driven step.
    pub step: Option<f64>,
    pub relative_error: Option<f64>,
    pub absolute_error: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub schedule: ScheduleOptions,
    pub run: RunOptions,
    /// Overrides keyed by solver name.
    pub solvers: BTreeMap<String, SolverOverride>,
}

impl ModelConfig {
    pub fn from_toml_str(config: &str) -> CatchmentResult<Self> {
        Ok(toml::from_str(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let config = ModelConfig::from_toml_str(
            r#"
[schedule]
sink_batches = false

[solvers."Soil solver"]
step = 0.05
"#,
        )
        .unwrap();

        assert!(!config.schedule.sink_batches);
        assert_eq!(config.schedule.closure_iteration_limit, 1000);
        assert!(!config.run.check_non_finite);
        let soil = &config.solvers["Soil solver"];
        assert_eq!(soil.step, Some(0.05));
        assert!(soil.function.is_none());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = ModelConfig::from_toml_str("[schedule]\nsink_batches = 3").unwrap_err();
        assert!(matches!(err, crate::errors::CatchmentError::Config(_)));
    }
}
