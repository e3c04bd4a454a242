//! Dependency discovery.
//!
//! Every equation body is run once against a [`TraceAccess`], which records what
//! the body reads instead of resolving values. Cumulative equations have no body;
//! their accesses are derived from their definition.

use super::builder::ModelBuilder;
use crate::access::{Context, Mode, ValueAccess};
use crate::equation::EquationType;
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{EquationH, Handle, Index, IndexSetH, InputH, ParameterH};
use crate::index_set::IndexStructure;
use crate::parameter::ParameterValue;
use log::debug;
use std::collections::BTreeSet;

/// One recorded access: the entity read and the index sets the read pinned explicitly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Access<H> {
    pub target: H,
    pub pinned: Vec<IndexSetH>,
}

impl<H> Access<H> {
    /// An access that pins no index set, so it reads at the current index combination.
    pub fn is_direct(&self) -> bool {
        self.pinned.is_empty()
    }
}

/// Everything an equation reads (and writes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    pub parameters: BTreeSet<Access<ParameterH>>,
    pub inputs: BTreeSet<Access<InputH>>,
    pub results: BTreeSet<Access<EquationH>>,
    pub last_results: BTreeSet<Access<EquationH>>,
    /// Index sets whose current index is queried.
    pub index_sets: BTreeSet<IndexSetH>,
    pub writes: BTreeSet<EquationH>,
}

impl DependencySet {
    pub fn direct_parameters(&self) -> impl Iterator<Item = ParameterH> + '_ {
        direct(&self.parameters)
    }

    pub fn direct_inputs(&self) -> impl Iterator<Item = InputH> + '_ {
        direct(&self.inputs)
    }

    pub fn direct_results(&self) -> impl Iterator<Item = EquationH> + '_ {
        direct(&self.results)
    }

    pub fn direct_last_results(&self) -> impl Iterator<Item = EquationH> + '_ {
        direct(&self.last_results)
    }

    /// Every equation whose current result is read, at any index.
    pub fn all_results(&self) -> impl Iterator<Item = EquationH> + '_ {
        self.results.iter().map(|a| a.target)
    }
}

fn direct<H: Copy>(accesses: &BTreeSet<Access<H>>) -> impl Iterator<Item = H> + '_ {
    accesses.iter().filter(|a| a.is_direct()).map(|a| a.target)
}

fn pinned_sets(pins: &[Index]) -> Vec<IndexSetH> {
    let mut sets: Vec<IndexSetH> = pins.iter().map(|p| p.set).collect();
    sets.sort();
    sets.dedup();
    sets
}

/// Records the accesses of one equation body.
///
/// Reads return neutral values. The first structural problem found is kept and
/// reported once the body returns.
pub(crate) struct TraceAccess<'a> {
    builder: &'a ModelBuilder,
    equation: EquationH,
    dependencies: DependencySet,
    error: Option<CatchmentError>,
}

impl<'a> TraceAccess<'a> {
    pub fn new(builder: &'a ModelBuilder, equation: EquationH) -> Self {
        Self {
            builder,
            equation,
            dependencies: DependencySet::default(),
            error: None,
        }
    }

    pub fn finish(self) -> CatchmentResult<DependencySet> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.dependencies),
        }
    }

    fn fail(&mut self, err: CatchmentError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn check_pins(&mut self, pins: &[Index]) -> bool {
        for pin in pins {
            if let Err(err) = self.builder.index_sets.check(pin.set) {
                self.fail(err);
                return false;
            }
        }
        true
    }

    /// Checks that `target` is an equation with a result slot.
    fn check_result(&mut self, target: EquationH) -> bool {
        match self.builder.equations.get(target) {
            Err(err) => {
                self.fail(err);
                false
            }
            Ok(spec) if !spec.has_result() => {
                self.fail(CatchmentError::InvalidReference {
                    equation: self.builder.equations.name(self.equation).to_string(),
                    target: self.builder.equations.name(target).to_string(),
                    reason: "initial-value equations have no result to read".to_string(),
                });
                false
            }
            Ok(_) => true,
        }
    }
}

impl ValueAccess for TraceAccess<'_> {
    fn mode(&self) -> Mode {
        Mode::Trace
    }

    fn parameter(&mut self, parameter: ParameterH, pins: &[Index]) -> ParameterValue {
        let parameter_type = match self.builder.parameters.get(parameter) {
            Ok(spec) => spec.parameter_type,
            Err(err) => {
                self.fail(err);
                return ParameterValue::Real(0.0);
            }
        };
        if self.check_pins(pins) {
            self.dependencies.parameters.insert(Access {
                target: parameter,
                pinned: pinned_sets(pins),
            });
        }
        ParameterValue::neutral(parameter_type)
    }

    fn input(&mut self, input: InputH, pins: &[Index]) -> f64 {
        if let Err(err) = self.builder.inputs.check(input) {
            self.fail(err);
        } else if self.check_pins(pins) {
            self.dependencies.inputs.insert(Access {
                target: input,
                pinned: pinned_sets(pins),
            });
        }
        0.0
    }

    fn input_was_provided(&mut self, input: InputH, pins: &[Index]) -> bool {
        // Reports the input as present so that the branch reading it is traced.
        self.input(input, pins);
        true
    }

    fn result(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        if self.check_result(equation) && self.check_pins(pins) {
            self.dependencies.results.insert(Access {
                target: equation,
                pinned: pinned_sets(pins),
            });
        }
        0.0
    }

    fn last_result(&mut self, equation: EquationH, pins: &[Index]) -> f64 {
        if self.check_result(equation) && self.check_pins(pins) {
            self.dependencies.last_results.insert(Access {
                target: equation,
                pinned: pinned_sets(pins),
            });
        }
        0.0
    }

    fn current_index(&mut self, index_set: IndexSetH) -> usize {
        match self.builder.index_sets.check(index_set) {
            Ok(()) => {
                self.dependencies.index_sets.insert(index_set);
            }
            Err(err) => self.fail(err),
        }
        0
    }

    fn write_result(&mut self, equation: EquationH, pins: &[Index], _value: f64) {
        if !self.check_result(equation) || !self.check_pins(pins) {
            return;
        }
        let declared = self
            .builder
            .equations
            .get(self.equation)
            .map_or(false, |spec| spec.writes.contains(&equation));
        if declared {
            self.dependencies.writes.insert(equation);
        } else {
            self.fail(CatchmentError::UndeclaredWrite {
                equation: self.builder.equations.name(self.equation).to_string(),
                target: self.builder.equations.name(equation).to_string(),
            });
        }
    }

    fn timestep(&self) -> i64 {
        0
    }
}

/// Discover the accesses of every registered equation, in handle order.
pub(crate) fn discover_dependencies(
    builder: &ModelBuilder,
    indices: &IndexStructure,
) -> CatchmentResult<Vec<DependencySet>> {
    let mut all = Vec::with_capacity(builder.equations.len());
    for (equation, spec) in builder.equations.iter() {
        let mut dependencies = if spec.equation_type == EquationType::Cumulative {
            cumulative_dependencies(builder, equation)?
        } else {
            let body = spec
                .body
                .as_ref()
                .ok_or_else(|| CatchmentError::UndefinedEquationBody {
                    equation: builder.equations.name(equation).to_string(),
                })?;
            let mut access = TraceAccess::new(builder, equation);
            let mut context = Context::new(&mut access, indices);
            body(&mut context);
            access.finish()?
        };

        for target in &spec.declared_dependencies {
            dependencies.results.insert(Access {
                target: *target,
                pinned: vec![],
            });
        }
        debug!(
            "Equation \"{}\" reads {} parameters, {} inputs, {} results and {} previous results",
            builder.equations.name(equation),
            dependencies.parameters.len(),
            dependencies.inputs.len(),
            dependencies.results.len(),
            dependencies.last_results.len()
        );
        all.push(dependencies);
    }
    Ok(all)
}

/// A cumulative equation reads its source (and weight) at every index of the
/// summed index set, which is recorded as an access pinning that set.
fn cumulative_dependencies(
    builder: &ModelBuilder,
    equation: EquationH,
) -> CatchmentResult<DependencySet> {
    let spec = builder.equations.get(equation)?;
    let Some(cumulative) = spec.cumulative else {
        return Err(CatchmentError::UnknownHandle {
            kind: EquationH::KIND,
            handle: equation.0,
        });
    };
    let mut dependencies = DependencySet::default();
    dependencies.results.insert(Access {
        target: cumulative.source,
        pinned: vec![cumulative.over],
    });
    if let Some(weight) = cumulative.weight {
        dependencies.parameters.insert(Access {
            target: weight,
            pinned: vec![cumulative.over],
        });
    }
    Ok(dependencies)
}
