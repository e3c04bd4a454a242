//! Batch and batch group structure.

use crate::config::ModelConfig;
use crate::example_solvers::TestEuler;
use crate::handles::{EquationH, Index};
use crate::model::{Model, ModelBuilder};
use crate::parameter::ParameterValue;
use crate::solver::SolverStep;
use std::sync::Arc;

/// `A` over X, `B` over nothing, `C` over X reading `B`.
fn interleaved(sink_batches: bool) -> ModelBuilder {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2", "x3"]).unwrap();
    let group = builder.add_parameter_group("Over X", &[x]).unwrap();
    let p = builder
        .add_parameter_real(group, "P", "-", 1.0, None, None)
        .unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    let c = builder.add_equation("C", "-").unwrap();
    builder
        .set_equation_body(a, move |ctx| ctx.par(p) + ctx.index(x) as f64)
        .unwrap();
    builder
        .set_equation_body(b, |ctx| ctx.timestep() as f64)
        .unwrap();
    builder
        .set_equation_body(c, move |ctx| ctx.par(p) * ctx.result(b))
        .unwrap();

    let mut config = ModelConfig::default();
    config.schedule.sink_batches = sink_batches;
    builder.with_config(config);
    builder
}

fn evaluation_order(model: &Model) -> Vec<EquationH> {
    model
        .batch_groups()
        .iter()
        .flat_map(|group| group.equations())
        .collect()
}

#[test]
fn sinking_merges_groups() {
    let unsunk = interleaved(false).build().unwrap();
    let sunk = interleaved(true).build().unwrap();
    assert_eq!(unsunk.batch_groups().len(), 3);
    assert_eq!(sunk.batch_groups().len(), 2);

    let a = sunk.equation("A").unwrap();
    let b = sunk.equation("B").unwrap();
    let c = sunk.equation("C").unwrap();
    assert_eq!(evaluation_order(&sunk), vec![b, a, c]);
    assert_eq!(sunk.structure_summary(), "Group 0 []\n  B\nGroup 1 [X]\n  A, C\n");
}

#[test]
fn sinking_does_not_change_results() {
    let mut results = Vec::new();
    for sink_batches in [false, true] {
        let model = interleaved(sink_batches).build().unwrap();
        let mut data = model.new_data_set(3);
        model.run(&mut data).unwrap();
        results.push(data.results().to_owned());
    }
    assert_eq!(results[0], results[1]);
}

#[test]
fn batches_never_read_later_batches() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let y = builder.add_index_set("Y", &["y1", "y2"]).unwrap();
    let over_x = builder.add_parameter_group("Over X", &[x]).unwrap();
    let over_y = builder.add_parameter_group("Over Y", &[y]).unwrap();
    let px = builder
        .add_parameter_real(over_x, "PX", "-", 1.0, None, None)
        .unwrap();
    let py = builder
        .add_parameter_real(over_y, "PY", "-", 2.0, None, None)
        .unwrap();
    let solver = builder
        .add_solver("Solver", Arc::new(TestEuler {}), SolverStep::Constant(1.0))
        .unwrap();

    // Registered in reverse dependency order
    let e = builder.add_equation("E", "-").unwrap();
    let d = builder.add_ode_equation("D", "-").unwrap();
    let c = builder.add_equation("C", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    builder.set_equation_body(a, move |ctx| ctx.par(px)).unwrap();
    builder.set_equation_body(b, move |ctx| ctx.par(py)).unwrap();
    builder
        .set_equation_body(c, move |ctx| ctx.result(a) + ctx.result(b))
        .unwrap();
    builder
        .set_equation_body(d, move |ctx| ctx.result(c))
        .unwrap();
    builder
        .set_equation_body(e, move |ctx| ctx.result(d) + ctx.last(e))
        .unwrap();
    builder.set_solver(d, solver).unwrap();

    let model = builder.build().unwrap();
    let order = evaluation_order(&model);
    assert_eq!(order.len(), 5);
    let position = |equation: EquationH| order.iter().position(|e| *e == equation).unwrap();
    for (dependent, dependency) in [(c, a), (c, b), (d, c), (e, d)] {
        assert!(
            position(dependency) < position(dependent),
            "{} is evaluated before {}",
            model.equation_name(dependent),
            model.equation_name(dependency),
        );
    }

    assert_eq!(model.equation_index_sets(c).unwrap(), &[x, y]);
    let x1 = model.index(x, "x1").unwrap();
    let y2 = model.index(y, "y2").unwrap();
    let mut data = model.new_data_set(2);
    model.run(&mut data).unwrap();
    assert_eq!(data.result_series(c, &[x1, y2]).unwrap(), vec![3.0, 3.0]);
    // D starts at 0 and gains 3 per timestep, E accumulates D
    assert_eq!(data.result_series(d, &[x1, y2]).unwrap(), vec![3.0, 6.0]);
    assert_eq!(data.result_series(e, &[x1, y2]).unwrap(), vec![3.0, 9.0]);
}

#[test]
fn river_networks_route_flow_downstream() {
    let mut builder = ModelBuilder::new();
    let headwater: &[&str] = &[];
    let confluence: &[&str] = &["Upper", "Tributary"];
    let reach = builder
        .add_branched_index_set(
            "Reach",
            &[
                ("Upper", headwater),
                ("Tributary", headwater),
                ("Lower", confluence),
            ],
        )
        .unwrap();
    let group = builder.add_parameter_group("Reach parameters", &[reach]).unwrap();
    let local = builder
        .add_parameter_real(group, "Local inflow", "m3/s", 1.0, Some(0.0), None)
        .unwrap();
    let inflow = builder.add_equation("Reach inflow", "m3/s").unwrap();
    let flow = builder.add_equation("Reach flow", "m3/s").unwrap();
    builder
        .set_equation_body(inflow, move |ctx| {
            let mut sum = 0.0;
            for upstream in ctx.branch_inputs(reach) {
                sum += ctx.result_at(flow, &[Index::new(reach, *upstream)]);
            }
            sum
        })
        .unwrap();
    builder
        .set_equation_body(flow, move |ctx| ctx.result(inflow) + ctx.par(local))
        .unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.batch_groups().len(), 1);
    assert_eq!(evaluation_order(&model), vec![inflow, flow]);
    assert_eq!(model.equation_index_sets(inflow).unwrap(), &[reach]);

    let tributary = model.index(reach, "Tributary").unwrap();
    let lower = model.index(reach, "Lower").unwrap();
    let mut data = model.new_data_set(2);
    data.set_parameter(local, &[tributary], ParameterValue::Real(2.0))
        .unwrap();
    data.set_parameter(local, &[lower], ParameterValue::Real(0.5))
        .unwrap();
    model.run(&mut data).unwrap();

    assert_eq!(data.result_series(flow, &[tributary]).unwrap(), vec![2.0, 2.0]);
    assert_eq!(data.result_series(inflow, &[lower]).unwrap(), vec![3.0, 3.0]);
    assert_eq!(data.result_series(flow, &[lower]).unwrap(), vec![3.5, 3.5]);
}
