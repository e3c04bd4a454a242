//! Failure reports for numerical problems found while running.

use super::runtime::Model;
use crate::access::ValueAccess;
use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::EquationH;
use crate::layout::IndexTuple;
use std::fmt::Write;

/// Describe everything an equation read at the current index combination.
///
/// Values are re-read through `access`, so they are the values the body saw.
/// Accesses at explicit indices are listed without a value.
pub(crate) fn describe_evaluation(
    model: &Model,
    equation: EquationH,
    tuple: &IndexTuple,
    access: &mut dyn ValueAccess,
) -> CatchmentResult<String> {
    let resolved = model.equations.get(equation)?;
    let indices = &model.structures.indices;
    let deps = &resolved.dependencies;
    let mut out = String::new();

    let _ = write!(out, "Indices:");
    if resolved.index_sets.is_empty() {
        let _ = write!(out, " (none)");
    }
    for set in &resolved.index_sets {
        let _ = write!(
            out,
            " {} = \"{}\"",
            indices.name(*set),
            indices.index_name(*set, tuple.get(*set))
        );
    }
    let _ = writeln!(out);

    let pinned_note = |pinned: &[crate::handles::IndexSetH]| -> String {
        let names: Vec<&str> = pinned.iter().map(|s| indices.name(*s)).collect();
        format!("(at explicit {})", names.join(", "))
    };

    if !deps.parameters.is_empty() {
        let _ = writeln!(out, "Parameters:");
        for a in &deps.parameters {
            let name = model.parameters.name(a.target);
            if a.is_direct() {
                let _ = writeln!(out, "  \"{}\" = {}", name, access.parameter(a.target, &[]));
            } else {
                let _ = writeln!(out, "  \"{}\" {}", name, pinned_note(&a.pinned));
            }
        }
    }
    if !deps.inputs.is_empty() {
        let _ = writeln!(out, "Inputs:");
        for a in &deps.inputs {
            let name = model.inputs.name(a.target);
            if a.is_direct() {
                let _ = writeln!(out, "  \"{}\" = {}", name, access.input(a.target, &[]));
            } else {
                let _ = writeln!(out, "  \"{}\" {}", name, pinned_note(&a.pinned));
            }
        }
    }
    if !deps.results.is_empty() {
        let _ = writeln!(out, "Results:");
        for a in &deps.results {
            let name = model.equations.name(a.target);
            if a.is_direct() {
                let _ = writeln!(out, "  \"{}\" = {}", name, access.result(a.target, &[]));
            } else {
                let _ = writeln!(out, "  \"{}\" {}", name, pinned_note(&a.pinned));
            }
        }
    }
    if !deps.last_results.is_empty() {
        let _ = writeln!(out, "Previous results:");
        for a in &deps.last_results {
            let name = model.equations.name(a.target);
            if a.is_direct() {
                let _ = writeln!(out, "  \"{}\" = {}", name, access.last_result(a.target, &[]));
            } else {
                let _ = writeln!(out, "  \"{}\" {}", name, pinned_note(&a.pinned));
            }
        }
    }
    Ok(out)
}

/// Build the error for a non-finite value of `equation`.
///
/// `evaluated` is the equation whose body produced the value. It differs from
/// `equation` when an initial value comes from an initial-value equation.
pub(crate) fn non_finite(
    model: &Model,
    equation: EquationH,
    evaluated: EquationH,
    tuple: &IndexTuple,
    access: &mut dyn ValueAccess,
) -> CatchmentError {
    let timestep = access.timestep();
    let mut diagnostic = String::new();
    if evaluated != equation {
        let _ = writeln!(
            diagnostic,
            "Evaluated \"{}\"",
            model.equations.name(evaluated)
        );
    }
    match describe_evaluation(model, evaluated, tuple, access) {
        Ok(text) => diagnostic.push_str(&text),
        Err(err) => diagnostic.push_str(&err.to_string()),
    }
    CatchmentError::NonFiniteResult {
        equation: model.equations.name(equation).to_string(),
        timestep,
        diagnostic,
    }
}
