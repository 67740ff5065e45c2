/*
    Pontos, trajectory optimization for vehicle motion primitives
    Copyright (C) 2024-onwards Pontos Contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Generates a single ship motion primitive: steer from the origin to the
//! point (50, 30) over 20 seconds, arriving settled (zero yaw rate, cruise
//! speed restored, controls at rest), while penalizing yaw rate and
//! acceleration effort. The optimized trajectory is written to
//! `primitive_states.csv` and `primitive_controls.csv`.

extern crate pretty_env_logger;

use pontos::dynamics::ShipSteering;
use pontos::io::export_solution_csv;
use pontos::prelude::*;

use std::f64::consts::FRAC_PI_6;
use std::sync::Arc;

fn main() -> Result<(), PontosError> {
    pretty_env_logger::init();

    let ship = Arc::new(ShipSteering::default());
    let horizon = Horizon::new(0.0, 20.0, 20)?;

    // Integrated cost: 10 r^2 + a^2.
    let mut state_weights = [0.0; 5];
    state_weights[ShipSteering::YAW_RATE] = 10.0;
    let mut control_weights = [0.0; 2];
    control_weights[ShipSteering::ACCEL] = 1.0;
    let cost = Arc::new(QuadraticCost::lagrange_only(
        &state_weights,
        &control_weights,
    ));

    let constraints = vec![
        // Departure: at rest at the origin, at cruise speed.
        Constraint::pin(Attachment::AtStart, VarRef::State(ShipSteering::X), 0.0),
        Constraint::pin(Attachment::AtStart, VarRef::State(ShipSteering::Y), 0.0),
        Constraint::pin(Attachment::AtStart, VarRef::State(ShipSteering::YAW), 0.0),
        Constraint::pin(
            Attachment::AtStart,
            VarRef::State(ShipSteering::YAW_RATE),
            0.0,
        ),
        Constraint::pin(Attachment::AtStart, VarRef::State(ShipSteering::SPEED), 3.0),
        Constraint::pin(
            Attachment::AtStart,
            VarRef::Control(ShipSteering::RUDDER),
            0.0,
        ),
        Constraint::pin(
            Attachment::AtStart,
            VarRef::Control(ShipSteering::ACCEL),
            0.0,
        ),
        // Arrival: at the goal, settled, heading free.
        Constraint::pin(Attachment::AtEnd, VarRef::State(ShipSteering::X), 50.0),
        Constraint::pin(Attachment::AtEnd, VarRef::State(ShipSteering::Y), 30.0),
        Constraint::pin(
            Attachment::AtEnd,
            VarRef::State(ShipSteering::YAW_RATE),
            0.0,
        ),
        Constraint::pin(Attachment::AtEnd, VarRef::State(ShipSteering::SPEED), 3.0),
        Constraint::pin(Attachment::AtEnd, VarRef::Control(ShipSteering::RUDDER), 0.0),
        Constraint::pin(Attachment::AtEnd, VarRef::Control(ShipSteering::ACCEL), 0.0),
        // Actuator and envelope limits.
        Constraint::symmetric_bound(VarRef::Control(ShipSteering::RUDDER), FRAC_PI_6),
        Constraint::bound(VarRef::State(ShipSteering::SPEED), 0.0, 15.0),
        Constraint::lower_bound(VarRef::Control(ShipSteering::ACCEL), 0.0),
    ];

    let problem = OcpProblem::new(ship, horizon, cost, constraints)?;
    let opts = SolverOpts::builder().max_iterations(30).build();
    let driver = SqpDriver::new(problem, opts);
    let solution = driver.solve()?;

    println!("{solution}");
    if !solution.status.is_usable() {
        println!("no usable trajectory, not exporting");
        return Ok(());
    }

    export_solution_csv(
        &solution,
        &["x", "y", "yaw", "yaw_rate", "speed"],
        &["rudder", "accel"],
        "primitive_states.csv",
        "primitive_controls.csv",
    )?;

    Ok(())
}
