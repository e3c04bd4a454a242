//! Solver batches.

use crate::errors::{CatchmentError, CatchmentResult};
use crate::example_solvers::{TestBackwardEuler, TestEuler};
use crate::model::ModelBuilder;
use crate::parameter::ParameterValue;
use crate::solver::{OdeSystem, SolverCall, SolverFunction, SolverStep};
use is_close::is_close;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Asks for a Jacobian without declaring it needs one.
#[derive(Debug, Serialize, Deserialize)]
struct JacobianProbe {}

#[typetag::serde]
impl SolverFunction for JacobianProbe {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        system.jacobian(call.state, &mut |_, _, _| {})
    }

    fn workspace_size(&self, _ode_count: usize) -> usize {
        0
    }
}

/// Records the Jacobian entries it is given in the state, then leaves the state unchanged.
#[derive(Debug, Serialize, Deserialize)]
struct JacobianRecorder {}

#[typetag::serde]
impl SolverFunction for JacobianRecorder {
    fn solve(&self, call: SolverCall<'_>, system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        let n = call.ode_count();
        let matrix = &mut call.workspace[..n * n];
        matrix.fill(0.0);
        system.jacobian(call.state, &mut |row, column, value| {
            matrix[row * n + column] = value;
        })?;
        // Report the row sums as the new state
        for (row, x) in call.state.iter_mut().enumerate() {
            *x = matrix[row * n..(row + 1) * n].iter().sum();
        }
        Ok(())
    }

    fn workspace_size(&self, ode_count: usize) -> usize {
        ode_count * ode_count
    }

    fn needs_jacobian(&self) -> bool {
        true
    }
}

/// Stores the error tolerances it was called with as the state.
#[derive(Debug, Serialize, Deserialize)]
struct ToleranceRecorder {}

#[typetag::serde]
impl SolverFunction for ToleranceRecorder {
    fn solve(&self, call: SolverCall<'_>, _system: &mut dyn OdeSystem) -> CatchmentResult<()> {
        call.state[0] = call.relative_error;
        call.state[1] = call.absolute_error;
        Ok(())
    }

    fn workspace_size(&self, _ode_count: usize) -> usize {
        0
    }

    fn uses_error_tolerances(&self) -> bool {
        true
    }
}

fn decay(function: Arc<dyn SolverFunction>, step: f64) -> f64 {
    let mut builder = ModelBuilder::new();
    let globals = builder.add_parameter_group("Globals", &[]).unwrap();
    let start = builder
        .add_parameter_real(globals, "Initial", "-", 1.0, None, None)
        .unwrap();
    let solver = builder
        .add_solver("Solver", function, SolverStep::Constant(step))
        .unwrap();
    let x = builder.add_ode_equation("X", "-").unwrap();
    builder
        .set_equation_body(x, move |ctx| -ctx.result(x))
        .unwrap();
    builder.set_solver(x, solver).unwrap();
    builder.set_initial_value_parameter(x, start).unwrap();

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(1);
    model.run(&mut data).unwrap();
    data.result_series(x, &[]).unwrap()[0]
}

#[test]
fn forward_euler_decay() {
    assert!(is_close!(decay(Arc::new(TestEuler {}), 0.5), 0.25));
}

#[test]
fn backward_euler_decay_uses_the_jacobian() {
    let x = decay(Arc::new(TestBackwardEuler { iterations: 4 }), 0.5);
    assert!(is_close!(x, 1.0 / 2.25), "got {}", x);
}

#[test]
fn jacobian_requires_opting_in() {
    let mut builder = ModelBuilder::new();
    let solver = builder
        .add_solver("Solver", Arc::new(JacobianProbe {}), SolverStep::Constant(1.0))
        .unwrap();
    let x = builder.add_ode_equation("X", "-").unwrap();
    builder.set_equation_body(x, |_| 1.0).unwrap();
    builder.set_solver(x, solver).unwrap();

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(1);
    let res = model.run(&mut data);
    assert!(matches!(res, Err(CatchmentError::JacobianUnavailable)));
}

#[test]
fn jacobian_follows_dependencies_through_plain_members() {
    let mut builder = ModelBuilder::new();
    let solver = builder
        .add_solver("Solver", Arc::new(JacobianRecorder {}), SolverStep::Constant(1.0))
        .unwrap();
    let soil = builder.add_ode_equation("Soil water", "mm").unwrap();
    let groundwater = builder.add_ode_equation("Groundwater", "mm").unwrap();
    let percolation = builder.add_equation("Percolation", "mm").unwrap();
    builder
        .set_equation_body(percolation, move |ctx| 0.25 * ctx.result(soil))
        .unwrap();
    builder
        .set_equation_body(soil, move |ctx| 1.0 - ctx.result(percolation))
        .unwrap();
    builder
        .set_equation_body(groundwater, move |ctx| {
            ctx.result(percolation) - 0.5 * ctx.result(groundwater)
        })
        .unwrap();
    for equation in [soil, groundwater, percolation] {
        builder.set_solver(equation, solver).unwrap();
    }

    let model = builder.build().unwrap();
    let batch = &model.batch_groups()[0].batches[0];
    assert_eq!(batch.equations, vec![percolation]);
    assert_eq!(batch.odes, vec![soil, groundwater]);

    let mut data = model.new_data_set(1);
    model.run(&mut data).unwrap();
    // Row sums of [[-0.25, 0], [0.25, -0.5]]
    let soil_sum = data.result_series(soil, &[]).unwrap()[0];
    let groundwater_sum = data.result_series(groundwater, &[]).unwrap()[0];
    assert!((soil_sum + 0.25).abs() < 1e-6, "got {}", soil_sum);
    assert!((groundwater_sum + 0.25).abs() < 1e-6, "got {}", groundwater_sum);
}

#[test]
fn plain_members_are_evaluated_at_the_final_state() {
    let mut builder = ModelBuilder::new();
    let solver = builder
        .add_solver("Solver", Arc::new(TestEuler {}), SolverStep::Constant(0.5))
        .unwrap();
    let storage = builder.add_ode_equation("Storage", "mm").unwrap();
    let outflow = builder.add_equation("Outflow", "mm").unwrap();
    builder
        .set_equation_body(storage, move |ctx| 2.0 - ctx.result(outflow))
        .unwrap();
    builder
        .set_equation_body(outflow, move |ctx| ctx.result(storage))
        .unwrap();
    builder.set_solver(storage, solver).unwrap();
    builder.set_solver(outflow, solver).unwrap();

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(1);
    model.run(&mut data).unwrap();
    // Two half steps of x' = 2 - x from 0: 1, then 1.5
    assert!(is_close!(data.result_series(storage, &[]).unwrap()[0], 1.5));
    assert!(is_close!(data.result_series(outflow, &[]).unwrap()[0], 1.5));
}

#[test]
fn step_size_can_vary_by_index() {
    let mut builder = ModelBuilder::new();
    let cell = builder.add_index_set("Cell", &["Coarse", "Fine"]).unwrap();
    let group = builder.add_parameter_group("Cell parameters", &[cell]).unwrap();
    let step = builder
        .add_parameter_real(group, "Step", "-", 1.0, Some(0.0), Some(1.0))
        .unwrap();
    let start = builder
        .add_parameter_real(group, "Initial", "-", 1.0, None, None)
        .unwrap();
    let solver = builder
        .add_solver("Solver", Arc::new(TestEuler {}), SolverStep::Parameter(step))
        .unwrap();
    let x = builder.add_ode_equation("X", "-").unwrap();
    builder
        .set_equation_body(x, move |ctx| -ctx.result(x))
        .unwrap();
    builder.set_solver(x, solver).unwrap();
    builder.set_initial_value_parameter(x, start).unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.equation_index_sets(x).unwrap(), &[cell]);

    let coarse = model.index(cell, "Coarse").unwrap();
    let fine = model.index(cell, "Fine").unwrap();
    let mut data = model.new_data_set(1);
    data.set_parameter(step, &[fine], ParameterValue::Real(0.5))
        .unwrap();
    model.run(&mut data).unwrap();
    assert!(is_close!(data.result_series(x, &[coarse]).unwrap()[0], 0.0));
    assert!(is_close!(data.result_series(x, &[fine]).unwrap()[0], 0.25));
}

#[test]
fn step_parameters_must_be_real() {
    let mut builder = ModelBuilder::new();
    let globals = builder.add_parameter_group("Globals", &[]).unwrap();
    let substeps = builder
        .add_parameter_uint(globals, "Substeps", "-", 2, None, None)
        .unwrap();
    let res = builder.add_solver("Solver", Arc::new(TestEuler {}), SolverStep::Parameter(substeps));
    assert!(matches!(
        res,
        Err(CatchmentError::ParameterTypeMismatch { .. })
    ));
}

#[test]
fn initial_value_equations_can_not_join_solvers() {
    let mut builder = ModelBuilder::new();
    let solver = builder
        .add_solver("Solver", Arc::new(TestEuler {}), SolverStep::Constant(1.0))
        .unwrap();
    let initial = builder.add_initial_value_equation("Initial", "-").unwrap();
    let res = builder.set_solver(initial, solver);
    assert!(matches!(
        res,
        Err(CatchmentError::InvalidSolverMember { .. })
    ));
}

#[test]
fn solvers_receive_their_tolerances() {
    let mut builder = ModelBuilder::new();
    let solver = builder
        .add_solver("Solver", Arc::new(ToleranceRecorder {}), SolverStep::Constant(1.0))
        .unwrap();
    let relative = builder.add_ode_equation("Relative", "-").unwrap();
    let absolute = builder.add_ode_equation("Absolute", "-").unwrap();
    for equation in [relative, absolute] {
        builder.set_equation_body(equation, |_| 0.0).unwrap();
        builder.set_solver(equation, solver).unwrap();
    }
    builder.set_solver_tolerances(solver, 1e-3, 1e-5).unwrap();

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(1);
    model.run(&mut data).unwrap();
    assert_eq!(data.result_series(relative, &[]).unwrap(), vec![1e-3]);
    assert_eq!(data.result_series(absolute, &[]).unwrap(), vec![1e-5]);
}
