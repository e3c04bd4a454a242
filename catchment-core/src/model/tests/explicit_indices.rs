//! Reads and writes at explicit indices computed while the model runs.

use crate::access::Context;
use crate::errors::CatchmentError;
use crate::handles::{Index, IndexSetH};
use crate::model::ModelBuilder;

fn out_of_range(err: &CatchmentError) -> bool {
    matches!(
        err,
        CatchmentError::IndexOutOfRange { index_set, index: 2, count: 2 } if index_set == "X"
    )
}

/// The index after the current one, from the first timestep on if `delayed`.
fn next(ctx: &mut Context<'_>, x: IndexSetH, delayed: bool) -> Index {
    let position = ctx.index(x);
    if delayed && ctx.timestep() < 0 {
        Index::new(x, position)
    } else {
        Index::new(x, position + 1)
    }
}

fn reading_the_next_result(delayed: bool) -> Result<(), CatchmentError> {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    builder
        .set_equation_body(a, move |ctx| ctx.index(x) as f64 + 1.0)
        .unwrap();
    builder
        .set_equation_body(b, move |ctx| {
            let pin = next(ctx, x, delayed);
            ctx.result_at(a, &[pin])
        })
        .unwrap();

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(2);
    model.run(&mut data)
}

#[test]
fn reading_past_the_last_index_fails() {
    let err = reading_the_next_result(false).unwrap_err();
    assert!(out_of_range(&err), "got {err:?}");

    let err = reading_the_next_result(true).unwrap_err();
    assert!(out_of_range(&err), "got {err:?}");
}

#[test]
fn reading_a_parameter_past_the_last_index_fails() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let group = builder.add_parameter_group("Per X", &[x]).unwrap();
    let p = builder
        .add_parameter_real(group, "P", "-", 1.0, None, None)
        .unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    builder
        .set_equation_body(a, move |ctx| {
            let pin = next(ctx, x, true);
            ctx.par_at(p, &[pin])
        })
        .unwrap();

    let model = builder.build().unwrap();
    let mut data = model.new_data_set(1);
    let err = model.run(&mut data).unwrap_err();
    assert!(out_of_range(&err), "got {err:?}");
}

#[test]
fn writing_past_the_last_index_fails() {
    for delayed in [false, true] {
        let mut builder = ModelBuilder::new();
        let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
        let target = builder.add_equation("Target", "-").unwrap();
        let writer = builder.add_equation("Writer", "-").unwrap();
        builder
            .set_equation_body(target, move |ctx| ctx.index(x) as f64)
            .unwrap();
        builder
            .set_equation_body(writer, move |ctx| {
                let pin = next(ctx, x, delayed);
                ctx.write_at(target, &[pin], 100.0);
                0.0
            })
            .unwrap();
        builder.declare_writes(writer, target).unwrap();

        let model = builder.build().unwrap();
        let mut data = model.new_data_set(1);
        let err = model.run(&mut data).unwrap_err();
        assert!(out_of_range(&err), "got {err:?}");
    }
}

#[test]
fn reads_within_range_still_work() {
    let mut builder = ModelBuilder::new();
    let x = builder.add_index_set("X", &["x1", "x2"]).unwrap();
    let a = builder.add_equation("A", "-").unwrap();
    let b = builder.add_equation("B", "-").unwrap();
    builder
        .set_equation_body(a, move |ctx| ctx.index(x) as f64 + 1.0)
        .unwrap();
    builder
        .set_equation_body(b, move |ctx| {
            let last = ctx.index_count(x) - 1;
            ctx.result_at(a, &[Index::new(x, last)])
        })
        .unwrap();

    let model = builder.build().unwrap();
    assert!(model.equation_index_sets(b).unwrap().is_empty());
    let mut data = model.new_data_set(1);
    model.run(&mut data).unwrap();
    assert_eq!(data.result_series(b, &[]).unwrap(), vec![2.0]);
}
