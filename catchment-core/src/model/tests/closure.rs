//! Index set resolution.

use crate::config::ModelConfig;
use crate::errors::CatchmentError;
use crate::example_solvers::TestEuler;
use crate::model::ModelBuilder;
use crate::parameter::ParameterValue;
use crate::solver::SolverStep;
use std::sync::Arc;

#[test]
fn pinned_reads_drop_the_pinned_index_set() {
    let mut builder = ModelBuilder::new();
    let reach = builder.add_index_set("Reach", &["Upper", "Lower"]).unwrap();
    let lower = builder.index(reach, "Lower").unwrap();
    let group = builder.add_parameter_group("Reach parameters", &[reach]).unwrap();
    let area = builder
        .add_parameter_real(group, "Area", "km2", 1.0, None, None)
        .unwrap();
    let rain = builder.add_input("Rain", "mm", &[]).unwrap();
    // Registered before the equation it reads
    let outlet = builder.add_equation("Outlet flow", "m3").unwrap();
    let flow = builder.add_equation("Flow", "m3").unwrap();
    builder
        .set_equation_body(outlet, move |ctx| ctx.result_at(flow, &[lower]))
        .unwrap();
    builder
        .set_equation_body(flow, move |ctx| ctx.input(rain) * ctx.par(area))
        .unwrap();

    let model = builder.build().unwrap();
    assert!(model.equation_index_sets(outlet).unwrap().is_empty());
    assert_eq!(model.equation_index_sets(flow).unwrap(), &[reach]);

    let groups = model.batch_groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].index_sets, vec![reach]);
    assert!(groups[1].index_sets.is_empty());

    let mut data = model.new_data_set(2);
    data.set_parameter(area, &[lower], ParameterValue::Real(3.0))
        .unwrap();
    data.set_input_series(rain, &[], &[1.0, 2.0]).unwrap();
    model.run(&mut data).unwrap();
    assert_eq!(data.result_series(outlet, &[]).unwrap(), vec![3.0, 6.0]);
}

#[test]
fn index_sets_propagate_through_chains() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let y = builder.add_index_set("Y", &["y1", "y2", "y3"]).unwrap();
    let group = builder.add_parameter_group("Over X", &[x]).unwrap();
    let p = builder
        .add_parameter_real(group, "P", "-", 1.0, None, None)
        .unwrap();
    let forcing = builder.add_input("Forcing", "-", &[y]).unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    let c = builder.add_equation("C", "-").unwrap();
    builder.set_equation_body(a, move |ctx| ctx.par(p)).unwrap();
    builder
        .set_equation_body(b, move |ctx| ctx.result(a) * 2.0)
        .unwrap();
    builder
        .set_equation_body(c, move |ctx| ctx.result(b) + ctx.input(forcing))
        .unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.equation_index_sets(a).unwrap(), &[x]);
    assert_eq!(model.equation_index_sets(b).unwrap(), &[x]);
    assert_eq!(model.equation_index_sets(c).unwrap(), &[x, y]);
}

#[test]
fn previous_values_propagate_index_sets() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let group = builder.add_parameter_group("Over X", &[x]).unwrap();
    let p = builder
        .add_parameter_real(group, "P", "-", 1.0, None, None)
        .unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    builder.set_equation_body(a, move |ctx| ctx.par(p)).unwrap();
    builder
        .set_equation_body(b, move |ctx| ctx.last(a))
        .unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.equation_index_sets(b).unwrap(), &[x]);
}

#[test]
fn index_queries_add_the_index_set() {
    let mut builder = ModelBuilder::new();
    let layer = builder.add_index_set("Layer", &["Top", "Middle", "Bottom"]).unwrap();
    let depth = builder.add_equation("Depth", "-").unwrap();
    builder
        .set_equation_body(depth, move |ctx| ctx.index(layer) as f64)
        .unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.equation_index_sets(depth).unwrap(), &[layer]);

    let mut data = model.new_data_set(1);
    model.run(&mut data).unwrap();
    for (position, name) in ["Top", "Middle", "Bottom"].iter().enumerate() {
        let index = model.index(layer, name).unwrap();
        assert_eq!(
            data.result_series(depth, &[index]).unwrap(),
            vec![position as f64]
        );
    }
}

#[test]
fn solver_members_share_index_sets() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let group = builder.add_parameter_group("Over X", &[x]).unwrap();
    let rate = builder
        .add_parameter_real(group, "Rate", "1/day", 1.0, None, None)
        .unwrap();
    let solver = builder
        .add_solver("Solver", Arc::new(TestEuler {}), SolverStep::Constant(1.0))
        .unwrap();
    let a = builder.add_ode_equation("A", "-").unwrap();
    let b = builder.add_ode_equation("B", "-").unwrap();
    builder
        .set_equation_body(a, move |ctx| ctx.par(rate))
        .unwrap();
    builder.set_equation_body(b, |_| 1.0).unwrap();
    builder.set_solver(a, solver).unwrap();
    builder.set_solver(b, solver).unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.equation_index_sets(a).unwrap(), &[x]);
    assert_eq!(model.equation_index_sets(b).unwrap(), &[x]);
}

#[test]
fn computed_parameter_must_fit_the_parameter() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let over_x = builder.add_parameter_group("Over X", &[x]).unwrap();
    let globals = builder.add_parameter_group("Globals", &[]).unwrap();
    let p = builder
        .add_parameter_real(over_x, "P", "-", 1.0, None, None)
        .unwrap();
    let total = builder
        .add_parameter_real(globals, "Total", "-", 0.0, None, None)
        .unwrap();
    let compute = builder.add_initial_value_equation("Compute total", "-").unwrap();
    builder
        .set_equation_body(compute, move |ctx| ctx.par(p))
        .unwrap();
    builder.set_computed_parameter(compute, total).unwrap();

    let res = builder.build();
    assert!(matches!(
        res,
        Err(CatchmentError::ComputedParameterShape { ref index_set, .. }) if index_set == "X"
    ));
}

#[test]
fn closure_iteration_limit_is_enforced() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let group = builder.add_parameter_group("Over X", &[x]).unwrap();
    let p = builder
        .add_parameter_real(group, "P", "-", 1.0, None, None)
        .unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    builder.set_equation_body(a, move |ctx| ctx.par(p)).unwrap();
    builder
        .set_equation_body(b, move |ctx| ctx.result(a))
        .unwrap();

    let mut config = ModelConfig::default();
    config.schedule.closure_iteration_limit = 1;
    builder.with_config(config);

    let res = builder.build();
    assert!(matches!(
        res,
        Err(CatchmentError::ClosureDidNotConverge { iterations: 1 })
    ));
}
