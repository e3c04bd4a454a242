//! Linear reservoir river network
//!
//! Every reach of a branched river network receives runoff from its own
//! catchment and the outflow of the reaches directly upstream of it, and drains
//! as a linear reservoir:
//!
//! $$ \frac{dV}{dt} = 86400 (Q_{in} - Q) \qquad Q = \frac{V}{86400 \tau} $$
//!
//! Where:
//! - $V$ is the reach volume (m3), integrated over days
//! - $Q_{in}$ is the reach inflow (m3/s)
//! - $Q$ is the reach outflow (m3/s)
//! - $\tau$ is the residence time (day)
//!
//! Upstream flows are read at explicit reach indices, so the whole network is
//! evaluated in one walk over the reaches, upstream first.

use catchment_core::errors::CatchmentResult;
use catchment_core::handles::{EquationH, Index, IndexSetH, InputH, ParameterH, SolverH};
use catchment_core::model::ModelBuilder;
use catchment_core::solver::{SolverFunction, SolverStep};
use std::sync::Arc;

pub const SECONDS_PER_DAY: f64 = 86400.0;
/// Volume of 1 mm of water over 1 km2.
pub const M3_PER_MM_KM2: f64 = 1000.0;

/// Handles of everything the river network registers.
#[derive(Debug, Clone, Copy)]
pub struct RiverNetwork {
    pub reach: IndexSetH,
    /// unit: km2
    pub catchment_area: ParameterH,
    /// Fraction of precipitation that runs off
    pub runoff_coefficient: ParameterH,
    /// unit: day
    pub residence_time: ParameterH,
    /// unit: m3
    pub initial_volume: ParameterH,
    /// unit: mm/day
    pub precipitation: InputH,
    pub runoff: EquationH,
    pub inflow: EquationH,
    pub volume: EquationH,
    pub flow: EquationH,
    /// Sum of the runoff of every reach
    pub total_runoff: EquationH,
    pub solver: SolverH,
}

impl RiverNetwork {
    /// Register a river network over `reaches`, given upstream first as
    /// `(reach, [reaches flowing into it])`.
    pub fn register(
        builder: &mut ModelBuilder,
        reaches: &[(&str, &[&str])],
        function: Arc<dyn SolverFunction>,
        step: f64,
    ) -> CatchmentResult<Self> {
        let reach = builder.add_branched_index_set("Reach", reaches)?;
        let group = builder.add_parameter_group("Reach parameters", &[reach])?;
        let catchment_area =
            builder.add_parameter_real(group, "Catchment area", "km2", 10.0, Some(0.0), None)?;
        let runoff_coefficient = builder.add_parameter_real(
            group,
            "Runoff coefficient",
            "dimensionless",
            0.3,
            Some(0.0),
            Some(1.0),
        )?;
        let residence_time =
            builder.add_parameter_real(group, "Residence time", "day", 1.0, Some(1e-3), None)?;
        let initial_volume =
            builder.add_parameter_real(group, "Initial volume", "m3", 0.0, Some(0.0), None)?;
        builder.set_parameter_description(
            residence_time,
            "Average time water spends in the reach",
        )?;
        let precipitation = builder.add_input("Precipitation", "mm/day", &[])?;

        let solver = builder.add_solver("Reach solver", function, SolverStep::Constant(step))?;
        let runoff = builder.add_equation("Catchment runoff", "m3/s")?;
        let inflow = builder.add_equation("Reach inflow", "m3/s")?;
        let volume = builder.add_ode_equation("Reach volume", "m3")?;
        let flow = builder.add_equation("Reach flow", "m3/s")?;

        builder.set_equation_body(runoff, move |ctx| {
            ctx.input(precipitation)
                * ctx.par(runoff_coefficient)
                * ctx.par(catchment_area)
                * M3_PER_MM_KM2
                / SECONDS_PER_DAY
        })?;
        builder.set_equation_body(inflow, move |ctx| {
            let mut upstream = 0.0;
            for position in ctx.branch_inputs(reach) {
                upstream += ctx.result_at(flow, &[Index::new(reach, *position)]);
            }
            upstream + ctx.result(runoff)
        })?;
        builder.set_equation_body(volume, move |ctx| {
            SECONDS_PER_DAY * (ctx.result(inflow) - ctx.result(flow))
        })?;
        builder.set_equation_body(flow, move |ctx| {
            ctx.result(volume) / (SECONDS_PER_DAY * ctx.par(residence_time))
        })?;
        builder.set_solver(volume, solver)?;
        builder.set_solver(flow, solver)?;
        builder.set_initial_value_parameter(volume, initial_volume)?;

        let total_runoff =
            builder.add_cumulative_equation("Total runoff", "m3/s", runoff, reach, None)?;

        Ok(Self {
            reach,
            catchment_area,
            runoff_coefficient,
            residence_time,
            initial_volume,
            precipitation,
            runoff,
            inflow,
            volume,
            flow,
            total_runoff,
            solver,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::Euler;
    use catchment_core::parameter::ParameterValue;

    const REACHES: [(&str, &[&str]); 3] = [
        ("Upper", &[]),
        ("Tributary", &[]),
        ("Lower", &["Upper", "Tributary"]),
    ];

    #[test]
    fn registers_one_walk_over_the_reaches() {
        let mut builder = ModelBuilder::new();
        let network =
            RiverNetwork::register(&mut builder, &REACHES, Arc::new(Euler {}), 0.1).unwrap();
        let model = builder.build().unwrap();

        for equation in [network.runoff, network.inflow, network.volume, network.flow] {
            assert_eq!(
                model.equation_index_sets(equation).unwrap(),
                &[network.reach]
            );
        }
        assert!(model
            .equation_index_sets(network.total_runoff)
            .unwrap()
            .is_empty());

        let groups = model.batch_groups();
        assert_eq!(groups.len(), 2);
        let first = &groups[0];
        assert_eq!(first.batches.len(), 2);
        assert_eq!(first.batches[0].equations, vec![network.runoff, network.inflow]);
        assert_eq!(first.batches[1].solver, Some(network.solver));
        assert_eq!(first.batches[1].odes, vec![network.volume]);
    }

    #[test]
    fn initial_flow_follows_the_initial_volume() {
        let mut builder = ModelBuilder::new();
        let network =
            RiverNetwork::register(&mut builder, &REACHES, Arc::new(Euler {}), 0.1).unwrap();
        let model = builder.build().unwrap();

        let upper = model.index(network.reach, "Upper").unwrap();
        let lower = model.index(network.reach, "Lower").unwrap();
        let mut data = model.new_data_set(1);
        data.set_parameter_all(network.initial_volume, ParameterValue::Real(SECONDS_PER_DAY))
            .unwrap();
        model.run(&mut data).unwrap();

        assert_eq!(data.initial_result(network.flow, &[upper]).unwrap(), 1.0);
        // Inflow is computed after every flow, so it sees both upstream reaches
        assert_eq!(data.initial_result(network.inflow, &[lower]).unwrap(), 2.0);
    }
}
