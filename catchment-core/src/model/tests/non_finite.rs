use crate::config::ModelConfig;
use crate::errors::CatchmentError;
use crate::model::ModelBuilder;

fn ratio_model(check_non_finite: bool) -> ModelBuilder {
    let mut builder = ModelBuilder::new();
    let reach = builder.add_index_set("Reach", &["Upper", "Lower"]).unwrap();
    let group = builder.add_parameter_group("Reach parameters", &[reach]).unwrap();
    let width = builder
        .add_parameter_real(group, "Width", "m", 2.0, None, None)
        .unwrap();
    let flow = builder.add_input("Flow", "m3/s", &[]).unwrap();
    let ratio = builder.add_equation("Ratio", "-").unwrap();
    builder
        .set_equation_body(ratio, move |ctx| ctx.par(width) / ctx.input(flow))
        .unwrap();

    let mut config = ModelConfig::default();
    config.run.check_non_finite = check_non_finite;
    builder.with_config(config);
    builder
}

#[test]
fn non_finite_values_stop_the_run() {
    let model = ratio_model(true).build().unwrap();
    let flow = model.input("Flow").unwrap();

    let mut data = model.new_data_set(3);
    data.set_input_series(flow, &[], &[1.0, 2.0, 0.0]).unwrap();
    let err = model.run(&mut data).unwrap_err();

    match &err {
        CatchmentError::NonFiniteResult {
            equation,
            timestep,
            diagnostic,
        } => {
            assert_eq!(equation, "Ratio");
            assert_eq!(*timestep, 2);
            assert!(diagnostic.contains("Reach = \"Upper\""));
            assert!(diagnostic.contains("\"Width\" = 2"));
            assert!(diagnostic.contains("\"Flow\" = 0"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().starts_with("Equation \"Ratio\" produced a non-finite value at timestep 2"));
}

#[test]
fn initial_values_are_checked_too() {
    let model = ratio_model(true).build().unwrap();
    let flow = model.input("Flow").unwrap();

    let mut data = model.new_data_set(2);
    data.set_input_series(flow, &[], &[0.0, 1.0]).unwrap();
    let res = model.run(&mut data);
    assert!(matches!(
        res,
        Err(CatchmentError::NonFiniteResult { timestep: -1, .. })
    ));
}

#[test]
fn unchecked_runs_store_non_finite_values() {
    let model = ratio_model(false).build().unwrap();
    let flow = model.input("Flow").unwrap();
    let ratio = model.equation("Ratio").unwrap();
    let reach = model.index_set("Reach").unwrap();
    let upper = model.index(reach, "Upper").unwrap();

    let mut data = model.new_data_set(2);
    data.set_input_series(flow, &[], &[1.0, 0.0]).unwrap();
    model.run(&mut data).unwrap();

    let series = data.result_series(ratio, &[upper]).unwrap();
    assert_eq!(series[0], 2.0);
    assert!(series[1].is_infinite());
}

#[test]
fn initial_value_equations_are_described_by_their_own_reads() {
    let mut builder = ModelBuilder::new();
    let globals = builder.add_parameter_group("Globals", &[]).unwrap();
    let depth = builder
        .add_parameter_real(globals, "Depth", "m", 3.0, None, None)
        .unwrap();
    let flow = builder.add_input("Flow", "m3/s", &[]).unwrap();
    let level = builder.add_equation("Level", "m").unwrap();
    let initial = builder.add_initial_value_equation("Initial level", "m").unwrap();
    builder
        .set_equation_body(level, move |ctx| ctx.last(level) + 1.0)
        .unwrap();
    builder
        .set_equation_body(initial, move |ctx| ctx.par(depth) / ctx.input(flow))
        .unwrap();
    builder.set_initial_value_equation(level, initial).unwrap();
    let mut config = ModelConfig::default();
    config.run.check_non_finite = true;
    builder.with_config(config);

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(1);
    data.set_input_series(flow, &[], &[0.0]).unwrap();
    match model.run(&mut data).unwrap_err() {
        CatchmentError::NonFiniteResult {
            equation,
            timestep,
            diagnostic,
        } => {
            assert_eq!(equation, "Level");
            assert_eq!(timestep, -1);
            assert!(diagnostic.starts_with("Evaluated \"Initial level\""));
            assert!(diagnostic.contains("\"Depth\" = 3"));
            assert!(diagnostic.contains("\"Flow\" = 0"));
            assert!(!diagnostic.contains("Previous results"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
