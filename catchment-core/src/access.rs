//! Value access for equation bodies.
//!
//! Equation bodies never touch storage directly. They read values through a
//! [`Context`], which forwards to a [`ValueAccess`] implementation. While a model
//! is finalized the implementation records every access; while it runs the
//! implementation resolves real values. The body is the same function in both
//! cases and does not need to know which mode it is in.

use crate::handles::{EquationH, Index, IndexSetH, InputH, ParameterH};
use crate::index_set::IndexStructure;
use crate::parameter::{Date, ParameterValue};

/// Whether accesses are being recorded or resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Trace,
    Evaluate,
}

/// Resolves (or records) the values an equation body reads.
///
/// `pins` lists index sets that are explicitly indexed by the access. Index sets
/// that are not pinned take the index currently being evaluated.
pub trait ValueAccess {
    fn mode(&self) -> Mode;

    fn parameter(&mut self, parameter: ParameterH, pins: &[Index]) -> ParameterValue;

    fn input(&mut self, input: InputH, pins: &[Index]) -> f64;

    fn input_was_provided(&mut self, input: InputH, pins: &[Index]) -> bool;

    /// Value of an equation in the current timestep.
    fn result(&mut self, equation: EquationH, pins: &[Index]) -> f64;

    /// Value of an equation in the previous timestep.
    fn last_result(&mut self, equation: EquationH, pins: &[Index]) -> f64;

    fn current_index(&mut self, index_set: IndexSetH) -> usize;

    /// Overwrite the current-timestep value of another equation. The target must
    /// have been declared with `ModelBuilder::declare_writes`.
    fn write_result(&mut self, equation: EquationH, pins: &[Index], value: f64);

    /// Timestep being evaluated; -1 while computing initial values.
    fn timestep(&self) -> i64;
}

static TRACE_BRANCH_INPUTS: [usize; 1] = [0];

/// The handle an equation body uses to read model values.
pub struct Context<'a> {
    access: &'a mut dyn ValueAccess,
    indices: &'a IndexStructure,
}

impl<'a> Context<'a> {
    pub fn new(access: &'a mut dyn ValueAccess, indices: &'a IndexStructure) -> Self {
        Self { access, indices }
    }

    pub fn mode(&self) -> Mode {
        self.access.mode()
    }

    pub fn timestep(&self) -> i64 {
        self.access.timestep()
    }

    /// Numeric value of a parameter at the current indices.
    pub fn par(&mut self, parameter: ParameterH) -> f64 {
        self.access.parameter(parameter, &[]).as_f64()
    }

    pub fn par_at(&mut self, parameter: ParameterH, pins: &[Index]) -> f64 {
        self.access.parameter(parameter, pins).as_f64()
    }

    pub fn par_uint(&mut self, parameter: ParameterH) -> u64 {
        self.access.parameter(parameter, &[]).as_u64()
    }

    pub fn par_bool(&mut self, parameter: ParameterH) -> bool {
        self.access.parameter(parameter, &[]).as_bool()
    }

    /// Position of the selected variant of an enum parameter.
    pub fn par_enum(&mut self, parameter: ParameterH) -> u32 {
        self.access.parameter(parameter, &[]).as_u64() as u32
    }

    pub fn par_time(&mut self, parameter: ParameterH) -> Date {
        self.access.parameter(parameter, &[]).as_date()
    }

    pub fn input(&mut self, input: InputH) -> f64 {
        self.access.input(input, &[])
    }

    pub fn input_at(&mut self, input: InputH, pins: &[Index]) -> f64 {
        self.access.input(input, pins)
    }

    pub fn input_was_provided(&mut self, input: InputH) -> bool {
        self.access.input_was_provided(input, &[])
    }

    pub fn result(&mut self, equation: EquationH) -> f64 {
        self.access.result(equation, &[])
    }

    pub fn result_at(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        self.access.result(equation, pins)
    }

    /// Value of an equation at the end of the previous timestep.
    pub fn last(&mut self, equation: EquationH) -> f64 {
        self.access.last_result(equation, &[])
    }

    pub fn last_at(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        self.access.last_result(equation, pins)
    }

    /// Position of the index currently evaluated in `index_set`.
    pub fn index(&mut self, index_set: IndexSetH) -> usize {
        self.access.current_index(index_set)
    }

    pub fn index_count(&self, index_set: IndexSetH) -> usize {
        self.indices.count(index_set)
    }

    /// Branch inputs (upstream indices) of the current index of a branched index set.
    ///
    /// While tracing this yields a single placeholder index so that loops over
    /// branch inputs are traced.
    pub fn branch_inputs(&mut self, index_set: IndexSetH) -> &'a [usize] {
        let position = self.access.current_index(index_set);
        match self.access.mode() {
            Mode::Trace if self.indices.count(index_set) > 0 => &TRACE_BRANCH_INPUTS,
            Mode::Trace => &[],
            Mode::Evaluate => self.indices.branch_inputs(index_set, position),
        }
    }

    pub fn write_at(&mut self, equation: EquationH, pins: &[Index], value: f64) {
        self.access.write_result(equation, pins, value)
    }
}
