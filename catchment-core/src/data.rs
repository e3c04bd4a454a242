//! Typed storage for parameter, input and result values.
//!
//! A [`DataSet`] is created for a finalized model, filled with parameter values
//! and input series, handed to [`Model::run`](crate::model::Model::run) and read
//! back afterwards. It carries the [`StorageStructures`] it was created with so
//! that it can be serialized and addressed without the model.

use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, Handle, Index, InputH, ParameterH};
use crate::index_set::IndexStructure;
use crate::layout::StorageStructure;
use crate::parameter::{ParameterBounds, ParameterType, ParameterValue};
use log::warn;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Addressing information for every kind of storage in a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStructures {
    pub indices: IndexStructure,
    pub parameters: StorageStructure,
    pub parameter_types: Vec<ParameterType>,
    pub parameter_defaults: Vec<ParameterValue>,
    pub parameter_bounds: Vec<ParameterBounds>,
    pub inputs: StorageStructure,
    pub results: StorageStructure,
}

/// Values of one model run.
///
/// Results are stored per timestep in rows. Row 0 holds the initial values and
/// row `t + 1` the values at the end of timestep `t`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    structures: Arc<StorageStructures>,
    timesteps: usize,
    pub(crate) parameters: Vec<ParameterValue>,
    pub(crate) inputs: Array2<f64>,
    pub(crate) input_provided: Vec<bool>,
    pub(crate) results: Array2<f64>,
}

impl DataSet {
    /// Create a data set with default parameter values and zeroed inputs.
    pub fn new(structures: Arc<StorageStructures>, timesteps: usize) -> Self {
        let mut parameters =
            vec![ParameterValue::Real(0.0); structures.parameters.size()];
        for (position, default) in structures.parameter_defaults.iter().enumerate() {
            if let Some(layout) = structures.parameters.layout(position) {
                for offset in layout.all_offsets(&structures.indices) {
                    parameters[offset] = *default;
                }
            }
        }
        let input_size = structures.inputs.size();
        let result_size = structures.results.size();
        Self {
            timesteps,
            parameters,
            inputs: Array2::zeros((timesteps, input_size)),
            input_provided: vec![false; input_size],
            results: Array2::zeros((timesteps + 1, result_size)),
            structures,
        }
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    pub fn structures(&self) -> &StorageStructures {
        &self.structures
    }

    pub(crate) fn shares_structures(&self, other: &Arc<StorageStructures>) -> bool {
        Arc::ptr_eq(&self.structures, other) || *self.structures == **other
    }

    pub fn set_parameter(
        &mut self,
        parameter: ParameterH,
        pins: &[Index],
        value: ParameterValue,
    ) -> CatchmentResult<()> {
        self.check_type(parameter, &value)?;
        let slot = slot(
            &self.structures.parameters,
            &self.structures.indices,
            parameter.position(),
            ParameterH::KIND,
            pins,
        )?;
        self.parameters[slot] = value;
        Ok(())
    }

    /// Set a parameter to the same value for every index combination.
    pub fn set_parameter_all(
        &mut self,
        parameter: ParameterH,
        value: ParameterValue,
    ) -> CatchmentResult<()> {
        self.check_type(parameter, &value)?;
        let layout = self
            .structures
            .parameters
            .require(parameter.position(), ParameterH::KIND)?;
        for offset in layout.all_offsets(&self.structures.indices) {
            self.parameters[offset] = value;
        }
        Ok(())
    }

    pub fn parameter(&self, parameter: ParameterH, pins: &[Index]) -> CatchmentResult<ParameterValue> {
        let slot = slot(
            &self.structures.parameters,
            &self.structures.indices,
            parameter.position(),
            ParameterH::KIND,
            pins,
        )?;
        Ok(self.parameters[slot])
    }

    /// Provide the full time series of an input at one index combination.
    pub fn set_input_series(
        &mut self,
        input: InputH,
        pins: &[Index],
        values: &[f64],
    ) -> CatchmentResult<()> {
        let slot = slot(
            &self.structures.inputs,
            &self.structures.indices,
            input.position(),
            InputH::KIND,
            pins,
        )?;
        if values.len() != self.timesteps {
            return Err(CatchmentError::DataShapeMismatch {
                entity: self.structures.inputs.name(input.position()).to_string(),
                expected: self.timesteps,
                found: values.len(),
            });
        }
        for (t, value) in values.iter().enumerate() {
            self.inputs[[t, slot]] = *value;
        }
        self.input_provided[slot] = true;
        Ok(())
    }

    pub fn input_series(&self, input: InputH, pins: &[Index]) -> CatchmentResult<Vec<f64>> {
        let slot = slot(
            &self.structures.inputs,
            &self.structures.indices,
            input.position(),
            InputH::KIND,
            pins,
        )?;
        Ok(self.inputs.column(slot).to_vec())
    }

    /// Values of an equation at the end of every timestep.
    pub fn result_series(&self, equation: EquationH, pins: &[Index]) -> CatchmentResult<Vec<f64>> {
        let slot = self.result_slot(equation, pins)?;
        Ok(self.results.column(slot).iter().skip(1).copied().collect())
    }

    /// Value of an equation before the first timestep.
    pub fn initial_result(&self, equation: EquationH, pins: &[Index]) -> CatchmentResult<f64> {
        let slot = self.result_slot(equation, pins)?;
        Ok(self.results[[0, slot]])
    }

    /// Raw result storage, one row per timestep plus the initial row.
    pub fn results(&self) -> ArrayView2<'_, f64> {
        self.results.view()
    }

    /// Warn about parameter values outside their declared bounds.
    ///
    /// Returns the number of offending values.
    pub fn validate_parameters(&self) -> usize {
        let structures = &self.structures;
        let mut offending = 0;
        for (position, bounds) in structures.parameter_bounds.iter().enumerate() {
            if bounds.is_unbounded() {
                continue;
            }
            let Some(layout) = structures.parameters.layout(position) else {
                continue;
            };
            for offset in layout.all_offsets(&structures.indices) {
                if !bounds.contains(&self.parameters[offset]) {
                    warn!(
                        "Parameter \"{}\" has value {} outside its bounds",
                        structures.parameters.name(position),
                        self.parameters[offset]
                    );
                    offending += 1;
                }
            }
        }
        offending
    }

    fn result_slot(&self, equation: EquationH, pins: &[Index]) -> CatchmentResult<usize> {
        slot(
            &self.structures.results,
            &self.structures.indices,
            equation.position(),
            EquationH::KIND,
            pins,
        )
    }

    fn check_type(&self, parameter: ParameterH, value: &ParameterValue) -> CatchmentResult<()> {
        let expected = self
            .structures
            .parameter_types
            .get(parameter.position())
            .ok_or(CatchmentError::UnknownHandle {
                kind: ParameterH::KIND,
                handle: parameter.0,
            })?;
        if *expected != value.parameter_type() {
            return Err(CatchmentError::ParameterTypeMismatch {
                parameter: self.structures.parameters.name(parameter.position()).to_string(),
                expected: expected.to_string(),
                found: value.parameter_type().to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve a fully specified index combination to a storage slot.
fn slot(
    structure: &StorageStructure,
    indices: &IndexStructure,
    position: usize,
    kind: &'static str,
    pins: &[Index],
) -> CatchmentResult<usize> {
    let layout = structure.require(position, kind)?;
    if let Some(missing) = layout.missing_index(pins) {
        return Err(CatchmentError::IncompleteIndex {
            entity: structure.name(position).to_string(),
            index_set: indices.name(missing).to_string(),
        });
    }
    for pin in pins {
        indices.check(*pin)?;
    }
    Ok(layout.offset(pins))
}
