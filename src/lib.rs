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

/*! # pontos

[Pontos](https://en.wikipedia.org/wiki/Pontus_(mythology)): a multiple-shooting
trajectory optimization engine for generating dynamically feasible vehicle
motion primitives.

The engine transcribes a continuous-time optimal control problem -- nonlinear
ODE dynamics, an integrated cost, boundary conditions, and box constraints on
states and controls -- into a finite-dimensional nonlinear program via multiple
shooting, and solves it with a Gauss--Newton SQP iteration backed by an
active-set quadratic programming solver.
*/

/// Provides the dynamics contract (equations of motion plus Jacobians) and the vehicle models shipped with `pontos`.
pub mod dynamics;

/// Provides the fixed-step Runge-Kutta integrators with simultaneous sensitivity propagation.
pub mod propagators;

/// Optimal control problem definition: horizon, constraints, cost functionals, and construction-time validation.
pub mod ocp;

/// The transcription and optimization machinery: shooting grid, QP assembly, active-set QP solver, and the SQP driver.
pub mod opti;

/// Trajectory export (CSV) and solver configuration loading.
pub mod io;

mod errors;
/// Pontos will (almost) never panic and functions which may fail will return an error.
pub use self::errors::PontosError;

#[macro_use]
extern crate log;
extern crate nalgebra as na;

/// Re-export nalgebra
pub mod linalg {
    pub use na::base::*;
}

/// Re-export of the commonly needed types to set up and solve a problem.
pub mod prelude {
    pub use crate::dynamics::{Dynamics, DynamicsError};
    pub use crate::ocp::{
        Attachment, Constraint, CostFunction, Horizon, OcpProblem, QuadraticCost, VarRef,
    };
    pub use crate::opti::{SolverOpts, SolverStatus, SqpDriver};
    pub use crate::propagators::{ControlParametrization, Propagator, RK38Fixed, RK4Fixed};
    pub use crate::PontosError;
}
