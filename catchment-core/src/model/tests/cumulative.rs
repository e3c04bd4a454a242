use crate::errors::CatchmentError;
use crate::model::ModelBuilder;
use crate::parameter::ParameterValue;

#[test]
fn sums_over_an_index_set() {
    let mut builder = ModelBuilder::new();
    let reach = builder.add_index_set("Reach", &["Upper", "Lower"]).unwrap();
    let land = builder
        .add_index_set("Land use", &["Forest", "Arable", "Urban"])
        .unwrap();
    let land_parameters = builder
        .add_parameter_group("Land parameters", &[reach, land])
        .unwrap();
    let area = builder
        .add_parameter_real(land_parameters, "Area", "km2", 1.0, Some(0.0), None)
        .unwrap();
    let fraction = builder
        .add_parameter_real(land_parameters, "Fraction", "-", 0.5, Some(0.0), Some(1.0))
        .unwrap();
    let rain = builder.add_input("Rain", "mm", &[]).unwrap();
    let runoff = builder.add_equation("Runoff", "m3").unwrap();
    builder
        .set_equation_body(runoff, move |ctx| ctx.input(rain) * ctx.par(area))
        .unwrap();
    let total = builder
        .add_cumulative_equation("Total runoff", "m3", runoff, land, None)
        .unwrap();
    let weighted = builder
        .add_cumulative_equation("Weighted runoff", "m3", runoff, land, Some(fraction))
        .unwrap();
    let doubled = builder.add_equation("Doubled total", "m3").unwrap();
    builder
        .set_equation_body(doubled, move |ctx| 2.0 * ctx.result(total))
        .unwrap();

    let model = builder.build().unwrap();
    assert_eq!(model.equation_index_sets(runoff).unwrap(), &[reach, land]);
    assert_eq!(model.equation_index_sets(total).unwrap(), &[reach]);
    assert_eq!(model.equation_index_sets(weighted).unwrap(), &[reach]);
    assert_eq!(model.equation_index_sets(doubled).unwrap(), &[reach]);

    let upper = model.index(reach, "Upper").unwrap();
    let lower = model.index(reach, "Lower").unwrap();
    let urban = model.index(land, "Urban").unwrap();
    let mut data = model.new_data_set(2);
    data.set_parameter(area, &[lower, urban], ParameterValue::Real(4.0))
        .unwrap();
    data.set_parameter(fraction, &[lower, urban], ParameterValue::Real(1.0))
        .unwrap();
    data.set_input_series(rain, &[], &[1.0, 2.0]).unwrap();
    model.run(&mut data).unwrap();

    assert_eq!(data.result_series(total, &[upper]).unwrap(), vec![3.0, 6.0]);
    assert_eq!(data.result_series(total, &[lower]).unwrap(), vec![6.0, 12.0]);
    assert_eq!(data.result_series(doubled, &[lower]).unwrap(), vec![12.0, 24.0]);
    // 0.5 * 1 + 0.5 * 1 + 1.0 * 4 per unit of rain
    assert_eq!(data.result_series(weighted, &[lower]).unwrap(), vec![5.0, 10.0]);
    assert_eq!(data.initial_result(total, &[lower]).unwrap(), 6.0);
}

#[test]
fn cumulative_equations_have_no_body() {
    let mut builder = ModelBuilder::new();
    let land = builder.add_index_set("Land use", &["Forest", "Urban"]).unwrap();
    let source = builder.add_equation("Source", "-").unwrap();
    builder.set_equation_body(source, |_| 1.0).unwrap();
    let total = builder
        .add_cumulative_equation("Total", "-", source, land, None)
        .unwrap();
    let res = builder.set_equation_body(total, |_| 0.0);
    assert!(matches!(res, Err(CatchmentError::InvalidReference { .. })));
}

#[test]
fn weights_must_be_real() {
    let mut builder = ModelBuilder::new();
    let land = builder.add_index_set("Land use", &["Forest", "Urban"]).unwrap();
    let group = builder.add_parameter_group("Land parameters", &[land]).unwrap();
    let included = builder.add_parameter_bool(group, "Included", true).unwrap();
    let source = builder.add_equation("Source", "-").unwrap();
    let res = builder.add_cumulative_equation("Total", "-", source, land, Some(included));
    assert!(matches!(
        res,
        Err(CatchmentError::ParameterTypeMismatch { .. })
    ));
}
